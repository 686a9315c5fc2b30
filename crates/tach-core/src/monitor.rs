//! Per-fan edge counting and periodic latching.
//!
//! A [`FanMonitor`] is mutated only by the sampler thread. The values a reader
//! may look at live in [`FanShared`], each one a single atomic.

use crate::config::{FanConfig, SamplerConfig};
use crate::error::TachError;
use crate::hal::{PinId, TachInput};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// The fields of a fan that cross from the sampler to readers.
#[derive(Debug, Default)]
pub struct FanShared {
    published_speed: AtomicU32,
    latches: AtomicU64,
    read_failures: AtomicU64,
}

impl FanShared {
    /// Transitions counted during the last closed refresh window.
    pub fn speed(&self) -> u32 {
        self.published_speed.load(Ordering::Acquire)
    }

    /// Refresh windows closed so far; zero until the first latch.
    pub fn latches(&self) -> u64 {
        self.latches.load(Ordering::Acquire)
    }

    pub fn read_failures(&self) -> u64 {
        self.read_failures.load(Ordering::Relaxed)
    }

    fn latch(&self, transitions: u32) {
        self.published_speed.store(transitions, Ordering::Release);
        self.latches.fetch_add(1, Ordering::Release);
    }
}

pub struct FanMonitor<P: TachInput> {
    id: String,
    label: String,
    input: P,
    ticks_per_refresh: u32,
    tick_counter: u32,
    transition_count: u32,
    last_level: bool,
    failing: bool,
    shared: Arc<FanShared>,
}

impl<P: TachInput> FanMonitor<P> {
    /// Fails with `InvalidConfig` if `ticks_per_refresh` is zero.
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        input: P,
        ticks_per_refresh: u32,
    ) -> Result<Self, TachError> {
        let id = id.into();
        if ticks_per_refresh == 0 {
            return Err(TachError::invalid(id, "ticks_per_refresh must be at least 1"));
        }
        Ok(Self {
            id,
            label: label.into(),
            input,
            ticks_per_refresh,
            tick_counter: 0,
            transition_count: 0,
            last_level: false,
            failing: false,
            shared: Arc::new(FanShared::default()),
        })
    }

    pub fn from_config(
        sampler: &SamplerConfig,
        fan: &FanConfig,
        input: P,
    ) -> Result<Self, TachError> {
        let ticks = sampler.ticks_per_refresh(fan)?;
        Self::new(fan.id.clone(), fan.label.clone(), input, ticks)
    }

    /// Advance one sampling period.
    ///
    /// The window is closed before the new level is looked at, so an edge seen
    /// on a latching tick belongs to the next window.
    pub fn tick(&mut self) {
        self.tick_counter += 1;
        if self.tick_counter >= self.ticks_per_refresh {
            self.tick_counter = 0;
            self.shared.latch(self.transition_count);
            self.transition_count = 0;
        }

        let level = self.sample();
        if level != self.last_level {
            self.last_level = level;
            self.transition_count += 1;
        }
    }

    fn sample(&mut self) -> bool {
        match self.input.read_level() {
            Ok(level) => {
                if self.failing {
                    self.failing = false;
                    log::info!("{}: pin {} readable again", self.label, self.input.pin());
                }
                level
            }
            Err(err) => {
                self.shared.read_failures.fetch_add(1, Ordering::Relaxed);
                if !self.failing {
                    self.failing = true;
                    log::warn!("{}: {}; holding last level", self.label, err);
                }
                self.last_level
            }
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pin(&self) -> PinId {
        self.input.pin()
    }

    pub fn ticks_per_refresh(&self) -> u32 {
        self.ticks_per_refresh
    }

    pub fn tick_counter(&self) -> u32 {
        self.tick_counter
    }

    pub fn transition_count(&self) -> u32 {
        self.transition_count
    }

    pub fn published_speed(&self) -> u32 {
        self.shared.speed()
    }

    pub fn shared(&self) -> Arc<FanShared> {
        Arc::clone(&self.shared)
    }
}

/// Convert a transition count into revolutions per minute.
///
/// Each tachometer pulse produces two transitions. Returns `None` for a zero
/// interval or zero pulses per revolution.
pub fn transitions_to_rpm(
    transitions: u32,
    refresh_interval_ms: u64,
    pulses_per_rev: u32,
) -> Option<f64> {
    if refresh_interval_ms == 0 || pulses_per_rev == 0 {
        return None;
    }
    let revolutions = f64::from(transitions) / (2.0 * f64::from(pulses_per_rev));
    Some(revolutions * 60_000.0 / refresh_interval_ms as f64)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::PinError;
    use std::collections::VecDeque;

    /// Replays a level sequence, then holds the last one.
    pub(crate) struct Levels {
        pin: PinId,
        queue: VecDeque<Result<bool, ()>>,
        last: bool,
    }

    impl Levels {
        pub(crate) fn new(levels: &[u8]) -> Self {
            Self {
                pin: PinId(0),
                queue: levels.iter().map(|l| Ok(*l != 0)).collect(),
                last: false,
            }
        }

        pub(crate) fn with_failures(samples: Vec<Result<bool, ()>>) -> Self {
            Self {
                pin: PinId(0),
                queue: samples.into(),
                last: false,
            }
        }
    }

    impl TachInput for Levels {
        fn pin(&self) -> PinId {
            self.pin
        }

        fn read_level(&mut self) -> Result<bool, PinError> {
            match self.queue.pop_front() {
                Some(Ok(level)) => {
                    self.last = level;
                    Ok(level)
                }
                Some(Err(())) => Err(PinError {
                    pin: self.pin,
                    reason: "injected".to_string(),
                }),
                None => Ok(self.last),
            }
        }
    }

    #[test]
    fn edge_on_latching_tick_goes_to_next_window() {
        let mut fan = FanMonitor::new("fan1", "test", Levels::new(&[0, 1, 0, 1, 0]), 2).unwrap();
        fan.tick();
        fan.tick();
        assert_eq!(fan.published_speed(), 0);
        assert_eq!(fan.transition_count(), 1);
        fan.tick();
        assert_eq!(fan.transition_count(), 2);
        fan.tick();
        assert_eq!(fan.published_speed(), 2);
        assert_eq!(fan.transition_count(), 1);
        fan.tick();
        assert_eq!(fan.published_speed(), 2);
        assert_eq!(fan.transition_count(), 2);
    }

    #[test]
    fn latches_every_k_ticks() {
        let mut fan = FanMonitor::new("fan1", "test", Levels::new(&[]), 5).unwrap();
        let shared = fan.shared();
        for tick in 1..=20u64 {
            fan.tick();
            assert_eq!(shared.latches(), tick / 5);
            assert!(fan.tick_counter() < 5);
        }
    }

    #[test]
    fn constant_pin_never_counts() {
        let mut fan = FanMonitor::new("fan1", "test", Levels::new(&[0; 40]), 4).unwrap();
        for _ in 0..40 {
            fan.tick();
        }
        assert_eq!(fan.published_speed(), 0);
        assert_eq!(fan.shared().latches(), 10);
    }

    #[test]
    fn single_tick_window_latches_previous_tick() {
        let mut fan = FanMonitor::new("fan1", "test", Levels::new(&[1, 0, 0, 1]), 1).unwrap();
        fan.tick();
        assert_eq!(fan.published_speed(), 0);
        fan.tick();
        assert_eq!(fan.published_speed(), 1);
        fan.tick();
        assert_eq!(fan.published_speed(), 1);
        fan.tick();
        assert_eq!(fan.published_speed(), 0);
    }

    #[test]
    fn read_failure_holds_last_level() {
        let samples = vec![Ok(true), Err(()), Err(()), Ok(true), Ok(false)];
        let mut fan = FanMonitor::new("fan1", "test", Levels::with_failures(samples), 100).unwrap();
        for _ in 0..5 {
            fan.tick();
        }
        assert_eq!(fan.transition_count(), 2);
        assert_eq!(fan.shared().read_failures(), 2);
    }

    #[test]
    fn zero_window_is_rejected() {
        let res = FanMonitor::new("fan1", "test", Levels::new(&[]), 0);
        assert!(matches!(res, Err(TachError::InvalidConfig { ref fan, .. }) if fan == "fan1"));
    }

    #[test]
    fn rpm_conversion() {
        // 40 transitions in 2s with 2 pulses/rev: 10 revs in 2s = 300 rpm.
        assert_eq!(transitions_to_rpm(40, 2_000, 2), Some(300.0));
        assert_eq!(transitions_to_rpm(40, 0, 2), None);
        assert_eq!(transitions_to_rpm(40, 2_000, 0), None);
    }
}
