use std::sync::{atomic::AtomicBool, Arc};
use std::thread;
use std::time::Duration;
use tach_core::{transitions_to_rpm, FanConfig, SpeedBoard, TimerCounters};
use tach_io::metrics::{init_metrics, serve_metrics, MetricsUpdater};
use tracing::{debug, info};

const UPDATE_INTERVAL: Duration = Duration::from_millis(500);

pub fn init() {
    init_metrics();
}

pub fn start_metrics_server(addr: &Option<String>) -> Option<thread::JoinHandle<()>> {
    addr.as_ref().map(|addr| {
        info!(addr = %addr, "Starting metrics server");
        serve_metrics(addr.clone())
    })
}

/// Poll the board and timer counters, feed the metrics registry and log
/// readings whenever a fan latches a new window.
pub fn start_metrics_updater(
    board: SpeedBoard,
    counters: Arc<TimerCounters>,
    fans: Vec<FanConfig>,
    stop: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let mut updater = MetricsUpdater::new();
        let mut last_latches = vec![0u64; board.len()];
        while !stop.load(std::sync::atomic::Ordering::Relaxed) {
            let readings = board.snapshot();
            updater.update(&readings, &counters.snapshot());

            for (i, reading) in readings.iter().enumerate() {
                if reading.latches == last_latches[i] {
                    continue;
                }
                last_latches[i] = reading.latches;
                let rpm = fans
                    .iter()
                    .find(|f| f.id == reading.fan)
                    .and_then(|f| {
                        transitions_to_rpm(
                            reading.transitions,
                            f.refresh_interval_ms,
                            f.pulses_per_rev,
                        )
                    });
                debug!(
                    fan = %reading.fan,
                    transitions = reading.transitions,
                    rpm = rpm.unwrap_or_default(),
                    read_failures = reading.read_failures,
                    "Fan speed latched"
                );
            }

            thread::sleep(UPDATE_INTERVAL);
        }
    })
}
