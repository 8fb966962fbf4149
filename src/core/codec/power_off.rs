//! Auto power-off timer

use serde::{Deserialize, Serialize};
use std::fmt;

const OFF: u8 = 0x00;
const OFF_TIMER_DISABLED: u8 = 0xff;

/// Timer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PowerOffStatus {
    /// Device powers off now
    Off,
    /// Timer disabled
    Disabled,
    /// Minutes left, 1..=254
    Remaining {
        /// Minutes
        minutes: u8,
    },
}

impl PowerOffStatus {
    /// Map a timer byte
    pub fn from_byte(value: u8) -> Self {
        match value {
            OFF => Self::Off,
            OFF_TIMER_DISABLED => Self::Disabled,
            minutes => Self::Remaining { minutes },
        }
    }

    /// Timer byte
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Off => OFF,
            Self::Disabled => OFF_TIMER_DISABLED,
            Self::Remaining { minutes } => minutes,
        }
    }

    /// Encode a one-byte frame
    pub fn encode(self) -> Vec<u8> {
        vec![self.to_byte()]
    }

    /// Decode a read or notification payload. An empty payload reads as disabled.
    pub fn decode(data: &[u8]) -> Self {
        Self::from_byte(data.first().copied().unwrap_or(OFF_TIMER_DISABLED))
    }
}

impl From<u8> for PowerOffStatus {
    fn from(value: u8) -> Self {
        Self::from_byte(value)
    }
}

impl fmt::Display for PowerOffStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Disabled => write!(f, "disabled"),
            Self::Remaining { minutes } => write!(f, "{} min remaining", minutes),
        }
    }
}
