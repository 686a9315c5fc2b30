use std::io;
use thiserror::Error;

use crate::hal::PinId;

/// Startup and configuration failures.
#[derive(Debug, Error)]
pub enum TachError {
    #[error("invalid configuration for {fan}: {reason}")]
    InvalidConfig { fan: String, reason: String },

    #[error("pin {pin} ({label}) unavailable: {reason}")]
    PinUnavailable {
        pin: PinId,
        label: String,
        reason: String,
    },

    #[error("failed to start periodic sampler: {0}")]
    TimerSpawn(#[source] io::Error),
}

impl TachError {
    pub(crate) fn invalid(fan: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            fan: fan.into(),
            reason: reason.into(),
        }
    }
}

/// A single pin read that could not be completed.
#[derive(Debug, Error)]
#[error("pin {pin} read failed: {reason}")]
pub struct PinError {
    pub pin: PinId,
    pub reason: String,
}

/// Reading Interface lookup failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    #[error("unknown fan: {0}")]
    UnknownFan(String),
}

impl From<ReadError> for io::Error {
    fn from(err: ReadError) -> Self {
        io::Error::new(io::ErrorKind::NotFound, err)
    }
}
