use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{PinError, TachError};

/// Opaque identifier of a digital input line (a GPIO number on Linux).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PinId(pub u32);

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A claimed tachometer input. Dropping it releases the line.
///
/// `read_level` is called from the periodic tick and must not block.
pub trait TachInput: Send {
    fn pin(&self) -> PinId;
    fn read_level(&mut self) -> Result<bool, PinError>;
}

/// Source of tachometer inputs (a GPIO controller, a simulator).
pub trait PinProvider {
    type Input: TachInput;

    fn acquire(&mut self, pin: PinId, label: &str) -> Result<Self::Input, TachError>;
}
