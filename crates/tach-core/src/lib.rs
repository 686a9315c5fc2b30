pub mod config;
pub mod error;
pub mod hal;
#[cfg(feature = "simulation")]
pub mod hal_sim;
pub mod monitor;
pub mod reading;
pub mod sampler;
pub mod timer;

pub use config::{FanConfig, SamplerConfig};
pub use error::{PinError, ReadError, TachError};
pub use hal::{PinId, PinProvider, TachInput};
#[cfg(feature = "simulation")]
pub use hal_sim::{ScriptedTach, SimulatedBoard, SimulatedTach};
pub use monitor::{transitions_to_rpm, FanMonitor, FanShared};
pub use reading::{FanReading, SpeedBoard, SpeedDevice};
pub use sampler::{FanSampler, RunningSampler};
pub use timer::{next_deadline, PeriodicTimer, TimerCounters, TimerStats};
