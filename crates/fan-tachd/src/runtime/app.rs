use crate::gpio::{self, SysfsGpio};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::logging::init_tracing;
use crate::runtime::telemetry;
use signal_hook::consts::{SIGINT, SIGTERM};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{atomic::AtomicBool, atomic::Ordering, Arc};
use std::thread;
use std::time::{Duration, Instant};
use tach_core::{
    transitions_to_rpm, FanSampler, PinProvider, SamplerConfig, SimulatedBoard, TachError,
};
use tach_io::{ReadServer, ServerConfig, ServerError};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("failed to read config {path}: {source}")]
    ConfigFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Tach(#[from] TachError),
    #[error(transparent)]
    Server(#[from] ServerError),
    #[error("failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),
}

pub fn run_from_args() -> ExitCode {
    let config = RuntimeConfig::from_env();
    if config.show_help {
        RuntimeConfig::print_help();
        return ExitCode::SUCCESS;
    }

    // Keep the file writer alive for the whole run
    let _log_guard = init_tracing(config.json_logs, config.log_dir.as_deref());

    if !config.invalid_args.is_empty() {
        for (flag, value) in &config.invalid_args {
            error!(flag = %flag, value = %value, "Invalid numeric option");
        }
        return ExitCode::FAILURE;
    }

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fan-tachd failed");
            ExitCode::FAILURE
        }
    }
}

fn load_sampler_config(config: &RuntimeConfig) -> Result<SamplerConfig, AppError> {
    let mut sampler = match &config.config_path {
        Some(path) => {
            let text = fs::read_to_string(path).map_err(|source| AppError::ConfigFile {
                path: path.clone(),
                source,
            })?;
            SamplerConfig::from_json(&text)?
        }
        None => SamplerConfig::default(),
    };
    if let Some(tick_ms) = config.tick_ms {
        sampler.tick_period_ms = tick_ms;
    }
    sampler.validate()?;
    Ok(sampler)
}

pub fn run(config: RuntimeConfig) -> Result<(), AppError> {
    let sampler_config = load_sampler_config(&config)?;

    if config.simulate {
        let mut board = SimulatedBoard::new(sampler_config.tick_period(), config.sim_rpm);
        // Simulated fans have two pulses per revolution, two transitions per pulse.
        let per_tick =
            f64::from(config.sim_rpm) / 60.0 * 4.0 * sampler_config.tick_period().as_secs_f64();
        if per_tick >= 1.0 {
            warn!(
                rpm = config.sim_rpm,
                transitions_per_tick = per_tick,
                "Simulated speed exceeds what the tick period can resolve"
            );
        }
        info!(rpm = config.sim_rpm, "Using simulated tachometer inputs");
        run_with(&config, &sampler_config, &mut board)
    } else {
        gpio::probe(&config.gpio_root)?;
        info!(root = %config.gpio_root.display(), "Using sysfs GPIO inputs");
        let mut gpio = SysfsGpio::new(&config.gpio_root);
        run_with(&config, &sampler_config, &mut gpio)
    }
}

fn run_with<P>(
    config: &RuntimeConfig,
    sampler_config: &SamplerConfig,
    provider: &mut P,
) -> Result<(), AppError>
where
    P: PinProvider,
    P::Input: 'static,
{
    telemetry::init();
    let _metrics_handle = telemetry::start_metrics_server(&config.metrics_addr);

    // Claims every pin or none
    let sampler = FanSampler::from_config(sampler_config, provider)?;
    for fan in &sampler_config.fans {
        let ticks = sampler_config.ticks_per_refresh(fan)?;
        // At most one transition is seen per tick.
        let max_rpm =
            transitions_to_rpm(ticks, fan.refresh_interval_ms, fan.pulses_per_rev).unwrap_or(0.0);
        info!(
            fan = %fan.id,
            label = %fan.label,
            pin = %fan.pin,
            ticks_per_refresh = ticks,
            max_measurable_rpm = max_rpm,
            "Fan configured"
        );
    }

    // Bind before sampling starts so a bad address unwinds cleanly
    let server = if config.server_enabled {
        Some(ReadServer::bind(ServerConfig {
            bind_addr: config.bind_addr.clone(),
            ..ServerConfig::default()
        })?)
    } else {
        info!("Read server disabled");
        None
    };

    // SIGINT/SIGTERM raise the flag the worker threads poll; a second one
    // while shutdown is pending exits immediately.
    let stop = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register_conditional_shutdown(signal, 1, Arc::clone(&stop))
            .map_err(AppError::Signal)?;
        signal_hook::flag::register(signal, Arc::clone(&stop)).map_err(AppError::Signal)?;
    }

    info!(
        tick_ms = sampler_config.tick_period_ms,
        fans = sampler_config.fans.len(),
        "Starting fan sampler"
    );
    let running = sampler.start()?;
    let board = running.board();

    let server_handle = server.map(|server| {
        let board = board.clone();
        let stop = Arc::clone(&stop);
        thread::spawn(move || server.run(board, stop))
    });

    let telemetry_handle = telemetry::start_metrics_updater(
        board.clone(),
        running.counters(),
        sampler_config.fans.clone(),
        Arc::clone(&stop),
    );

    info!("fan-tachd running");

    let deadline = config.run_seconds.map(|seconds| {
        info!(seconds, "Running for limited duration");
        Instant::now() + Duration::from_secs(seconds)
    });
    while !stop.load(Ordering::Relaxed) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        thread::sleep(Duration::from_millis(100));
    }
    if stop.load(Ordering::Relaxed) {
        info!("Shutdown signal received");
    }

    stop.store(true, Ordering::Relaxed);
    if let Some(handle) = server_handle {
        let _ = handle.join();
    }
    let _ = telemetry_handle.join();

    // Cancel ticking before the pins go away
    let stats = running.stats();
    let sampler = running.stop();
    for reading in board.snapshot() {
        info!(
            fan = %reading.fan,
            transitions = reading.transitions,
            latches = reading.latches,
            read_failures = reading.read_failures,
            "Final reading"
        );
    }
    drop(sampler);

    info!(
        firings = stats.firings,
        missed = stats.missed,
        max_lateness_us = stats.max_lateness_us,
        "Run complete"
    );
    Ok(())
}
