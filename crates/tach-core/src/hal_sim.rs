use crate::error::{PinError, TachError};
use crate::hal::{PinId, PinProvider, TachInput};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Simulated tachometer producing a square wave.
///
/// Time advances by one tick period per read, so the output depends only on
/// how often it is sampled, not on the wall clock.
#[derive(Debug)]
pub struct SimulatedTach {
    pin: PinId,
    rpm: Arc<AtomicU32>,
    failing: Arc<AtomicBool>,
    pulses_per_rev: u32,
    tick_s: f64,
    phase: f64,
    claims: Option<Arc<Mutex<HashSet<PinId>>>>,
}

impl SimulatedTach {
    pub fn new(pin: PinId, rpm: u32, pulses_per_rev: u32, tick_period: Duration) -> Self {
        Self {
            pin,
            rpm: Arc::new(AtomicU32::new(rpm)),
            failing: Arc::new(AtomicBool::new(false)),
            pulses_per_rev,
            tick_s: tick_period.as_secs_f64(),
            phase: 0.0,
            claims: None,
        }
    }

    /// Handle for changing the simulated speed while sampling.
    pub fn rpm_handle(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.rpm)
    }

    /// Handle that makes every read fail while set.
    pub fn fault_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.failing)
    }

    fn transitions_per_tick(&self) -> f64 {
        let rpm = f64::from(self.rpm.load(Ordering::Relaxed));
        rpm / 60.0 * f64::from(self.pulses_per_rev) * 2.0 * self.tick_s
    }
}

impl TachInput for SimulatedTach {
    fn pin(&self) -> PinId {
        self.pin
    }

    fn read_level(&mut self) -> Result<bool, PinError> {
        self.phase += self.transitions_per_tick();
        if self.failing.load(Ordering::Relaxed) {
            return Err(PinError {
                pin: self.pin,
                reason: "simulated fault".to_string(),
            });
        }
        Ok(self.phase.floor() as u64 % 2 == 1)
    }
}

impl Drop for SimulatedTach {
    fn drop(&mut self) {
        if let Some(claims) = &self.claims {
            claims
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&self.pin);
        }
    }
}

/// Replays a fixed level sequence, then holds the last level.
#[derive(Debug, Clone)]
pub struct ScriptedTach {
    pin: PinId,
    levels: VecDeque<bool>,
    last: bool,
}

impl ScriptedTach {
    pub fn new(pin: PinId, levels: impl IntoIterator<Item = bool>) -> Self {
        Self {
            pin,
            levels: levels.into_iter().collect(),
            last: false,
        }
    }
}

impl TachInput for ScriptedTach {
    fn pin(&self) -> PinId {
        self.pin
    }

    fn read_level(&mut self) -> Result<bool, PinError> {
        if let Some(level) = self.levels.pop_front() {
            self.last = level;
        }
        Ok(self.last)
    }
}

/// A board of simulated fans, one per configured pin.
#[derive(Debug)]
pub struct SimulatedBoard {
    tick_period: Duration,
    default_rpm: u32,
    pulses_per_rev: u32,
    rpm: HashMap<PinId, u32>,
    unavailable: HashSet<PinId>,
    claims: Arc<Mutex<HashSet<PinId>>>,
}

impl SimulatedBoard {
    pub fn new(tick_period: Duration, default_rpm: u32) -> Self {
        Self {
            tick_period,
            default_rpm,
            pulses_per_rev: 2,
            rpm: HashMap::new(),
            unavailable: HashSet::new(),
            claims: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_fan(mut self, pin: PinId, rpm: u32) -> Self {
        self.rpm.insert(pin, rpm);
        self
    }

    /// Make `acquire` fail for `pin`.
    pub fn with_unavailable(mut self, pin: PinId) -> Self {
        self.unavailable.insert(pin);
        self
    }

    pub fn claimed(&self) -> Vec<PinId> {
        let mut pins: Vec<PinId> = self
            .claims
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .copied()
            .collect();
        pins.sort();
        pins
    }
}

impl PinProvider for SimulatedBoard {
    type Input = SimulatedTach;

    fn acquire(&mut self, pin: PinId, label: &str) -> Result<SimulatedTach, TachError> {
        let unavailable = |reason: &str| TachError::PinUnavailable {
            pin,
            label: label.to_string(),
            reason: reason.to_string(),
        };
        if self.unavailable.contains(&pin) {
            return Err(unavailable("no such line"));
        }
        if !self
            .claims
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pin)
        {
            return Err(unavailable("already claimed"));
        }

        let rpm = self.rpm.get(&pin).copied().unwrap_or(self.default_rpm);
        let mut tach = SimulatedTach::new(pin, rpm, self.pulses_per_rev, self.tick_period);
        tach.claims = Some(Arc::clone(&self.claims));
        Ok(tach)
    }
}
