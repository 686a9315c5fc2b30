use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub run_seconds: Option<u64>,
    pub config_path: Option<PathBuf>,
    pub tick_ms: Option<u64>,
    pub bind_addr: String,
    pub server_enabled: bool,
    pub json_logs: bool,
    pub log_dir: Option<PathBuf>,
    pub metrics_addr: Option<String>,
    pub simulate: bool,
    pub sim_rpm: u32,
    pub gpio_root: PathBuf,
    /// Numeric options whose value did not parse, as `(flag, value)`.
    pub invalid_args: Vec<(String, String)>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            show_help: false,
            run_seconds: None,
            config_path: None,
            tick_ms: None,
            bind_addr: "127.0.0.1:7100".to_string(),
            server_enabled: true,
            json_logs: false,
            log_dir: None,
            metrics_addr: None,
            simulate: false,
            sim_rpm: 120,
            gpio_root: PathBuf::from("/sys/class/gpio"),
            invalid_args: Vec::new(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Self {
        let mut cfg = RuntimeConfig::default();
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--run-seconds" => {
                    if i + 1 < args.len() {
                        cfg.run_seconds = cfg.parse_number(&args[i], &args[i + 1]);
                        i += 1;
                    }
                }
                "--config" => {
                    if i + 1 < args.len() {
                        cfg.config_path = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--tick-ms" => {
                    if i + 1 < args.len() {
                        cfg.tick_ms = cfg.parse_number(&args[i], &args[i + 1]);
                        i += 1;
                    }
                }
                "--bind" => {
                    if i + 1 < args.len() {
                        cfg.bind_addr = args[i + 1].clone();
                        i += 1;
                    }
                }
                "--no-server" => {
                    cfg.server_enabled = false;
                }
                "--json-logs" => {
                    cfg.json_logs = true;
                }
                "--log-dir" => {
                    if i + 1 < args.len() {
                        cfg.log_dir = Some(PathBuf::from(&args[i + 1]));
                        i += 1;
                    }
                }
                "--metrics-addr" => {
                    if i + 1 < args.len() {
                        cfg.metrics_addr = Some(args[i + 1].clone());
                        i += 1;
                    }
                }
                "--simulate" => {
                    cfg.simulate = true;
                }
                "--sim-rpm" => {
                    if i + 1 < args.len() {
                        cfg.simulate = true;
                        if let Some(rpm) = cfg.parse_number(&args[i], &args[i + 1]) {
                            cfg.sim_rpm = rpm;
                        }
                        i += 1;
                    }
                }
                "--gpio-root" => {
                    if i + 1 < args.len() {
                        cfg.gpio_root = PathBuf::from(&args[i + 1]);
                        i += 1;
                    }
                }
                "--help" | "-h" => {
                    cfg.show_help = true;
                    break;
                }
                _ => {}
            }
            i += 1;
        }
        cfg
    }

    fn parse_number<T: std::str::FromStr>(&mut self, flag: &str, value: &str) -> Option<T> {
        let parsed = value.parse().ok();
        if parsed.is_none() {
            self.invalid_args.push((flag.to_string(), value.to_string()));
        }
        parsed
    }

    pub fn print_help() {
        println!(
            r#"fan-tachd - Fan tachometer sampler

USAGE:
    fan-tachd [OPTIONS]

OPTIONS:
    --config <PATH>         JSON sampler configuration (tick period, fans, pins)
    --tick-ms <MS>          Override the sampling period [default: 100]
    --bind <ADDR>           Read server TCP bind address [default: 127.0.0.1:7100]
    --no-server             Disable the read server
    --metrics-addr <ADDR>   Enable Prometheus metrics server on address (e.g., 0.0.0.0:9090)
    --simulate              Use simulated tachometer inputs instead of GPIO
    --sim-rpm <RPM>         Simulated fan speed, implies --simulate [default: 120]
    --gpio-root <DIR>       sysfs GPIO root [default: /sys/class/gpio]
    --run-seconds <SECS>    Run for a fixed duration then exit
    --json-logs             Output logs in JSON format (for log aggregation)
    --log-dir <DIR>         Also write JSON logs to a daily rotated file in DIR
    -h, --help              Print this help message

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log filter (e.g., RUST_LOG=debug,tach_core=trace)

EXAMPLES:
    # Two fans on the default pins, readable on 127.0.0.1:7100
    fan-tachd --metrics-addr 0.0.0.0:9090

    # Short simulated run
    fan-tachd --simulate --run-seconds 10

    # Read a fan
    echo '{{"type":"read","fan":"fan1"}}' | nc 127.0.0.1 7100
"#
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("fan-tachd")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn defaults_without_arguments() {
        let cfg = RuntimeConfig::from_args(&args(&[]));
        assert!(!cfg.show_help);
        assert!(cfg.server_enabled);
        assert!(!cfg.simulate);
        assert_eq!(cfg.bind_addr, "127.0.0.1:7100");
        assert_eq!(cfg.gpio_root, PathBuf::from("/sys/class/gpio"));
    }

    #[test]
    fn parses_options() {
        let cfg = RuntimeConfig::from_args(&args(&[
            "--config",
            "/etc/fan-tachd.json",
            "--tick-ms",
            "50",
            "--sim-rpm",
            "600",
            "--no-server",
            "--run-seconds",
            "3",
        ]));
        assert_eq!(cfg.config_path, Some(PathBuf::from("/etc/fan-tachd.json")));
        assert_eq!(cfg.tick_ms, Some(50));
        assert!(cfg.simulate);
        assert_eq!(cfg.sim_rpm, 600);
        assert!(!cfg.server_enabled);
        assert_eq!(cfg.run_seconds, Some(3));
    }

    #[test]
    fn unparseable_numbers_are_reported() {
        let cfg = RuntimeConfig::from_args(&args(&["--run-seconds", "3O", "--tick-ms", "50"]));
        assert_eq!(cfg.run_seconds, None);
        assert_eq!(cfg.tick_ms, Some(50));
        assert_eq!(
            cfg.invalid_args,
            vec![("--run-seconds".to_string(), "3O".to_string())]
        );
    }

    #[test]
    fn help_stops_parsing() {
        let cfg = RuntimeConfig::from_args(&args(&["-h", "--simulate"]));
        assert!(cfg.show_help);
        assert!(!cfg.simulate);
    }
}
