//! Prometheus metrics for the fan tachometer sampler.
//!
//! The tick path never touches these; a telemetry thread copies the sampler's
//! atomics into them through [`MetricsUpdater`].

use prometheus::core::Collector;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::collections::HashMap;
use std::sync::LazyLock;
use std::thread;
use tach_core::{FanReading, TimerStats};
use tiny_http::{Response, Server};

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Per-fan metrics
// ============================================================================

/// Transitions latched in the last refresh window, per fan
pub static FAN_TRANSITIONS: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let gauge = IntGaugeVec::new(
        Opts::new(
            "fantach_transitions",
            "Tachometer transitions counted in the last refresh window",
        ),
        &["fan"],
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Refresh windows closed, per fan
pub static FAN_LATCHES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new("fantach_latches_total", "Refresh windows closed"),
        &["fan"],
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Ticks where the pin could not be read and the last level was held
pub static PIN_READ_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "fantach_pin_read_failures_total",
            "Pin reads that failed and fell back to the last known level",
        ),
        &["fan"],
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

// ============================================================================
// Sampler metrics
// ============================================================================

pub static TICKS_FIRED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter =
        IntCounter::new("fantach_ticks_fired_total", "Sampler firings executed").unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Grid points skipped because a firing overran
pub static TICKS_MISSED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "fantach_ticks_missed_total",
        "Sampler grid points skipped due to overruns",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

pub static TICK_LATENESS_US: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new(
        "fantach_tick_lateness_us",
        "Worst observed delay of a firing past its deadline in microseconds",
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Reader metrics
// ============================================================================

pub static READ_REQUESTS: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter =
        IntCounter::new("fantach_read_requests_total", "Read protocol requests served").unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

pub static UNKNOWN_FAN: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "fantach_unknown_fan_total",
        "Read requests naming a fan that is not registered",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

pub static CLIENTS_CONNECTED: LazyLock<IntGauge> = LazyLock::new(|| {
    let gauge = IntGauge::new(
        "fantach_clients_connected",
        "Read protocol clients currently connected",
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Updater
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
struct FanSeen {
    latches: u64,
    read_failures: u64,
}

/// Copies sampler state into the registry, turning absolute counts into
/// counter increments.
#[derive(Debug, Default)]
pub struct MetricsUpdater {
    fans: HashMap<String, FanSeen>,
    timer: TimerStats,
}

impl MetricsUpdater {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, readings: &[FanReading], timer: &TimerStats) {
        for reading in readings {
            let labels = [reading.fan.as_str()];
            FAN_TRANSITIONS
                .with_label_values(&labels)
                .set(i64::from(reading.transitions));

            let seen = self.fans.entry(reading.fan.clone()).or_default();
            FAN_LATCHES
                .with_label_values(&labels)
                .inc_by(reading.latches.saturating_sub(seen.latches));
            PIN_READ_FAILURES
                .with_label_values(&labels)
                .inc_by(reading.read_failures.saturating_sub(seen.read_failures));
            *seen = FanSeen {
                latches: reading.latches,
                read_failures: reading.read_failures,
            };
        }

        TICKS_FIRED.inc_by(timer.firings.saturating_sub(self.timer.firings));
        TICKS_MISSED.inc_by(timer.missed.saturating_sub(self.timer.missed));
        TICK_LATENESS_US.set(timer.max_lateness_us as i64);
        self.timer = timer.clone();
    }
}

// ============================================================================
// Metrics HTTP Server
// ============================================================================

fn is_ready() -> bool {
    FAN_LATCHES
        .collect()
        .iter()
        .flat_map(|family| family.get_metric())
        .any(|m| m.get_counter().get_value() > 0.0)
}

/// Start the metrics HTTP server on the given address.
/// Returns a join handle for the server thread.
pub fn serve_metrics(bind_addr: String) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let server = match Server::http(&bind_addr) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to start metrics server on {}: {}", bind_addr, e);
                return;
            }
        };

        tracing::info!("Metrics server listening on http://{}/metrics", bind_addr);

        for request in server.incoming_requests() {
            match request.url() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let metric_families = REGISTRY.gather();
                    let mut buffer = Vec::new();

                    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
                        tracing::warn!("Failed to encode metrics: {}", e);
                        let _ = request.respond(
                            Response::from_string("Internal Server Error").with_status_code(500),
                        );
                        continue;
                    }

                    let mut response = Response::from_data(buffer);
                    if let Ok(header) = tiny_http::Header::from_bytes(
                        &b"Content-Type"[..],
                        &b"text/plain; version=0.0.4"[..],
                    ) {
                        response = response.with_header(header);
                    }
                    let _ = request.respond(response);
                }
                "/health" => {
                    let _ = request.respond(Response::from_string("OK"));
                }
                "/ready" => {
                    // Ready once some fan has published a speed
                    if is_ready() {
                        let _ = request.respond(Response::from_string("Ready"));
                    } else {
                        let _ = request
                            .respond(Response::from_string("Not Ready").with_status_code(503));
                    }
                }
                _ => {
                    let _ =
                        request.respond(Response::from_string("Not Found").with_status_code(404));
                }
            }
        }
    })
}

/// Initialize all metrics (forces lazy initialization)
pub fn init_metrics() {
    let _ = FAN_TRANSITIONS.collect();
    let _ = FAN_LATCHES.collect();
    let _ = PIN_READ_FAILURES.collect();
    let _ = TICKS_FIRED.get();
    let _ = TICKS_MISSED.get();
    let _ = TICK_LATENESS_US.get();
    let _ = READ_REQUESTS.get();
    let _ = UNKNOWN_FAN.get();
    let _ = CLIENTS_CONNECTED.get();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tach_core::PinId;

    fn reading(fan: &str, transitions: u32, latches: u64) -> FanReading {
        FanReading {
            fan: fan.to_string(),
            label: fan.to_uppercase(),
            pin: PinId(1),
            transitions,
            latches,
            read_failures: 0,
        }
    }

    #[test]
    fn updater_turns_totals_into_increments() {
        init_metrics();
        let mut updater = MetricsUpdater::new();
        let before = FAN_LATCHES.with_label_values(&["metrics-test"]).get();

        updater.update(&[reading("metrics-test", 12, 3)], &TimerStats::default());
        updater.update(&[reading("metrics-test", 14, 5)], &TimerStats::default());

        assert_eq!(
            FAN_LATCHES.with_label_values(&["metrics-test"]).get() - before,
            5
        );
        assert_eq!(
            FAN_TRANSITIONS.with_label_values(&["metrics-test"]).get(),
            14
        );
        assert!(is_ready());
    }
}
