//! Fixed-grid periodic execution on a dedicated thread.

use crate::error::TachError;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Clone, Default, Debug, PartialEq, Eq)]
pub struct TimerStats {
    pub firings: u64,
    pub missed: u64,
    pub max_lateness_us: u64,
}

/// Live counters, readable from any thread while the timer runs.
#[derive(Debug, Default)]
pub struct TimerCounters {
    firings: AtomicU64,
    missed: AtomicU64,
    max_lateness_us: AtomicU64,
}

impl TimerCounters {
    pub fn snapshot(&self) -> TimerStats {
        TimerStats {
            firings: self.firings.load(Ordering::Relaxed),
            missed: self.missed.load(Ordering::Relaxed),
            max_lateness_us: self.max_lateness_us.load(Ordering::Relaxed),
        }
    }

    fn record_firing(&self, lateness: Duration) {
        self.firings.fetch_add(1, Ordering::Relaxed);
        self.max_lateness_us
            .fetch_max(lateness.as_micros() as u64, Ordering::Relaxed);
    }
}

/// Next deadline on the grid `previous + n * period` that lies after `now`,
/// together with the number of grid points skipped on the way.
///
/// Grid points that already passed are not fired late; they count as missed.
/// A zero period has no grid; it yields `now` with nothing missed.
pub fn next_deadline(previous: Instant, period: Duration, now: Instant) -> (Instant, u64) {
    if period.is_zero() {
        return (now, 0);
    }
    let next = previous + period;
    if next > now {
        return (next, 0);
    }
    let behind = now.duration_since(next).as_nanos();
    let missed = (behind / period.as_nanos()) as u64 + 1;
    let skip = Duration::from_nanos((period.as_nanos() * u128::from(missed)) as u64);
    (next + skip, missed)
}

/// A callback fired every `period` until cancelled.
///
/// Owns `T` on the worker thread; [`PeriodicTimer::cancel`] hands it back once
/// the worker has exited, so no callback can run after `cancel` returns.
pub struct PeriodicTimer<T: Send + 'static> {
    name: String,
    stop: Arc<AtomicBool>,
    counters: Arc<TimerCounters>,
    worker: Option<JoinHandle<T>>,
}

impl<T: Send + 'static> PeriodicTimer<T> {
    pub fn register<F>(
        name: &str,
        period: Duration,
        mut state: T,
        mut callback: F,
    ) -> Result<Self, TachError>
    where
        F: FnMut(&mut T) + Send + 'static,
    {
        if period.is_zero() {
            return Err(TachError::InvalidConfig {
                fan: name.to_string(),
                reason: "timer period must be positive".to_string(),
            });
        }

        let stop = Arc::new(AtomicBool::new(false));
        let counters = Arc::new(TimerCounters::default());
        let stop_worker = Arc::clone(&stop);
        let counters_worker = Arc::clone(&counters);
        let thread_name = name.to_string();

        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut deadline = Instant::now() + period;
                loop {
                    let fired_at = loop {
                        if stop_worker.load(Ordering::Acquire) {
                            return state;
                        }
                        let now = Instant::now();
                        if now >= deadline {
                            break now;
                        }
                        thread::park_timeout(deadline - now);
                    };

                    callback(&mut state);
                    counters_worker.record_firing(fired_at.duration_since(deadline));

                    let (next, missed) = next_deadline(deadline, period, Instant::now());
                    if missed > 0 {
                        counters_worker.missed.fetch_add(missed, Ordering::Relaxed);
                        log::debug!("{}: overran by {} period(s)", thread_name, missed);
                    }
                    deadline = next;
                }
            })
            .map_err(TachError::TimerSpawn)?;

        log::debug!("{}: registered with period {:?}", name, period);

        Ok(Self {
            name: name.to_string(),
            stop,
            counters,
            worker: Some(worker),
        })
    }

    pub fn counters(&self) -> Arc<TimerCounters> {
        Arc::clone(&self.counters)
    }

    pub fn stats(&self) -> TimerStats {
        self.counters.snapshot()
    }

    /// Stop the timer and wait for the worker to exit.
    ///
    /// Returns the owned state, or `None` if the callback panicked.
    pub fn cancel(mut self) -> Option<T> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Option<T> {
        let worker = self.worker.take()?;
        self.stop.store(true, Ordering::Release);
        worker.thread().unpark();
        match worker.join() {
            Ok(state) => {
                log::debug!("{}: cancelled", self.name);
                Some(state)
            }
            Err(_) => {
                log::error!("{}: periodic callback panicked", self.name);
                None
            }
        }
    }
}

impl<T: Send + 'static> Drop for PeriodicTimer<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
