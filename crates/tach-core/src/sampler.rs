use crate::config::SamplerConfig;
use crate::error::TachError;
use crate::hal::{PinProvider, TachInput};
use crate::monitor::FanMonitor;
use crate::reading::SpeedBoard;
use crate::timer::{PeriodicTimer, TimerCounters, TimerStats};
use std::sync::Arc;
use std::time::Duration;

/// Every monitored fan, ticked together in configuration order.
pub struct FanSampler<P: TachInput> {
    period: Duration,
    fans: Vec<FanMonitor<P>>,
}

impl<P: TachInput> FanSampler<P> {
    pub fn new(period: Duration, fans: Vec<FanMonitor<P>>) -> Self {
        Self { period, fans }
    }

    /// Claim one input per configured fan.
    ///
    /// On failure the inputs claimed so far are released before the error is
    /// returned.
    pub fn from_config<Prov>(
        config: &SamplerConfig,
        provider: &mut Prov,
    ) -> Result<Self, TachError>
    where
        Prov: PinProvider<Input = P>,
    {
        config.validate()?;
        let mut fans = Vec::with_capacity(config.fans.len());
        for fan in &config.fans {
            let input = provider.acquire(fan.pin, &fan.label).map_err(|e| {
                log::warn!(
                    "{}: init failed, releasing {} claimed pin(s): {}",
                    fan.id,
                    fans.len(),
                    e
                );
                e
            })?;
            let monitor = FanMonitor::from_config(config, fan, input)?;
            log::info!(
                "{}: monitoring pin {} ({}), latch every {} ticks",
                monitor.id(),
                monitor.pin(),
                monitor.label(),
                monitor.ticks_per_refresh()
            );
            fans.push(monitor);
        }
        Ok(Self::new(config.tick_period(), fans))
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn fans(&self) -> &[FanMonitor<P>] {
        &self.fans
    }

    pub fn board(&self) -> SpeedBoard {
        SpeedBoard::from_monitors(&self.fans)
    }

    /// One firing of the sampler.
    pub fn tick_all(&mut self) {
        for fan in &mut self.fans {
            fan.tick();
        }
    }
}

impl<P: TachInput + 'static> FanSampler<P> {
    /// Start ticking on a dedicated thread every `period`.
    pub fn start(self) -> Result<RunningSampler<P>, TachError> {
        let board = self.board();
        let period = self.period;
        let timer = PeriodicTimer::register("fan-sampler", period, self, FanSampler::tick_all)?;
        log::info!("sampler started: {} fan(s), period {:?}", board.len(), period);
        Ok(RunningSampler { timer, board })
    }
}

pub struct RunningSampler<P: TachInput + 'static> {
    timer: PeriodicTimer<FanSampler<P>>,
    board: SpeedBoard,
}

impl<P: TachInput + 'static> RunningSampler<P> {
    pub fn board(&self) -> SpeedBoard {
        self.board.clone()
    }

    pub fn counters(&self) -> Arc<TimerCounters> {
        self.timer.counters()
    }

    pub fn stats(&self) -> TimerStats {
        self.timer.stats()
    }

    /// Cancel the periodic timer and hand the fans back.
    ///
    /// No tick runs after this returns, so the caller may drop the fans (and
    /// release their pins) right away.
    pub fn stop(self) -> Option<FanSampler<P>> {
        let stats = self.timer.stats();
        let sampler = self.timer.cancel();
        log::info!(
            "sampler stopped after {} firing(s), {} missed",
            stats.firings,
            stats.missed
        );
        sampler
    }
}
