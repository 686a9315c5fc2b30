use crate::error::TachError;
use crate::hal::PinId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

pub const DEFAULT_TICK_PERIOD_MS: u64 = 100;
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 2_000;

fn default_pulses_per_rev() -> u32 {
    2
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FanConfig {
    /// External identifier used by readers, e.g. `fan1`.
    pub id: String,
    /// Diagnostic label attached to the claimed pin.
    pub label: String,
    pub pin: PinId,
    pub refresh_interval_ms: u64,
    /// Only used by consumers converting transitions to RPM.
    #[serde(default = "default_pulses_per_rev")]
    pub pulses_per_rev: u32,
}

impl FanConfig {
    pub fn new(id: impl Into<String>, label: impl Into<String>, pin: u32) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            pin: PinId(pin),
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
            pulses_per_rev: default_pulses_per_rev(),
        }
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplerConfig {
    pub tick_period_ms: u64,
    pub fans: Vec<FanConfig>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: DEFAULT_TICK_PERIOD_MS,
            fans: vec![
                FanConfig::new("fan1", "GPIO_FAN_TACH_1", 138),
                FanConfig::new("fan2", "GPIO_FAN_TACH_2", 139),
            ],
        }
    }
}

impl SamplerConfig {
    pub fn from_json(text: &str) -> Result<Self, TachError> {
        let cfg: SamplerConfig = serde_json::from_str(text)
            .map_err(|e| TachError::invalid("sampler", e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    /// Number of ticks between two latches of `fan`, truncated.
    pub fn ticks_per_refresh(&self, fan: &FanConfig) -> Result<u32, TachError> {
        if self.tick_period_ms == 0 {
            return Err(TachError::invalid("sampler", "tick period must be positive"));
        }
        let ticks = fan.refresh_interval_ms / self.tick_period_ms;
        if ticks == 0 {
            return Err(TachError::invalid(
                &fan.id,
                format!(
                    "refresh interval {}ms is shorter than the {}ms tick",
                    fan.refresh_interval_ms, self.tick_period_ms
                ),
            ));
        }
        u32::try_from(ticks).map_err(|_| TachError::invalid(&fan.id, "refresh interval too long"))
    }

    pub fn validate(&self) -> Result<(), TachError> {
        if self.fans.is_empty() {
            return Err(TachError::invalid("sampler", "no fans configured"));
        }
        let mut ids = HashSet::new();
        let mut pins = HashSet::new();
        for fan in &self.fans {
            if fan.id.is_empty() {
                return Err(TachError::invalid(&fan.label, "empty fan id"));
            }
            if !ids.insert(fan.id.as_str()) {
                return Err(TachError::invalid(&fan.id, "duplicate fan id"));
            }
            if !pins.insert(fan.pin) {
                return Err(TachError::invalid(
                    &fan.id,
                    format!("pin {} assigned twice", fan.pin),
                ));
            }
            self.ticks_per_refresh(fan)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_two_fan_board() {
        let cfg = SamplerConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.fans.len(), 2);
        assert_eq!(cfg.ticks_per_refresh(&cfg.fans[0]).unwrap(), 20);
        assert_eq!(cfg.fans[1].label, "GPIO_FAN_TACH_2");
    }

    #[test]
    fn truncates_refresh_to_whole_ticks() {
        let cfg = SamplerConfig::default();
        let fan = FanConfig::new("f", "f", 1).with_refresh_interval(Duration::from_millis(250));
        assert_eq!(cfg.ticks_per_refresh(&fan).unwrap(), 2);
    }

    #[test]
    fn rejects_refresh_shorter_than_tick() {
        let mut cfg = SamplerConfig::default();
        cfg.fans[0].refresh_interval_ms = 50;
        assert!(matches!(
            cfg.validate(),
            Err(TachError::InvalidConfig { ref fan, .. }) if fan == "fan1"
        ));
    }

    #[test]
    fn rejects_zero_tick_period() {
        let cfg = SamplerConfig {
            tick_period_ms: 0,
            ..SamplerConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_duplicates() {
        let mut cfg = SamplerConfig::default();
        cfg.fans[1].id = "fan1".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = SamplerConfig::default();
        cfg.fans[1].pin = cfg.fans[0].pin;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_json_with_default_pulses() {
        let raw = r#"{
            "tick_period_ms": 100,
            "fans": [
                {"id": "fan1", "label": "TACH_A", "pin": 10, "refresh_interval_ms": 500}
            ]
        }"#;
        let cfg = SamplerConfig::from_json(raw).expect("config should parse");
        assert_eq!(cfg.fans[0].pin, PinId(10));
        assert_eq!(cfg.fans[0].pulses_per_rev, 2);
        assert_eq!(cfg.ticks_per_refresh(&cfg.fans[0]).unwrap(), 5);
    }
}
