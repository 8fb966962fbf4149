//! Device operating mode

use super::{first_byte, DecodeError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pneumatic configuration of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfigMode {
    /// Independent ports
    General,
    /// Both pumps inflating in series
    InflationSeries,
    /// Both pumps inflating in parallel
    InflationParallel,
    /// Both pumps on vacuum in series
    VacuumSeries,
    /// Both pumps on vacuum in parallel
    VacuumParallel,
}

impl ConfigMode {
    /// Wire code
    pub const fn code(self) -> u8 {
        match self {
            Self::General => 0,
            Self::InflationSeries => 1,
            Self::InflationParallel => 2,
            Self::VacuumSeries => 3,
            Self::VacuumParallel => 4,
        }
    }

    /// Decode a wire code
    pub fn from_code(code: u8) -> Result<Self, DecodeError> {
        match code {
            0 => Ok(Self::General),
            1 => Ok(Self::InflationSeries),
            2 => Ok(Self::InflationParallel),
            3 => Ok(Self::VacuumSeries),
            4 => Ok(Self::VacuumParallel),
            _ => Err(DecodeError::UnknownCode { kind: "configuration", code }),
        }
    }

    /// Encode a one-byte frame
    pub fn encode(self) -> Vec<u8> {
        vec![self.code()]
    }

    /// Decode a read payload
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        Self::from_code(first_byte("configuration", data)?)
    }

    /// Get all modes
    pub fn all() -> &'static [ConfigMode] {
        &[
            Self::General,
            Self::InflationSeries,
            Self::InflationParallel,
            Self::VacuumSeries,
            Self::VacuumParallel,
        ]
    }

    /// Get name
    pub fn name(&self) -> &'static str {
        match self {
            Self::General => "GENERAL",
            Self::InflationSeries => "INFLATION_SERIES",
            Self::InflationParallel => "INFLATION_PARALLEL",
            Self::VacuumSeries => "VACUUM_SERIES",
            Self::VacuumParallel => "VACUUM_PARALLEL",
        }
    }
}

impl fmt::Display for ConfigMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ConfigMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('-', "_").to_ascii_uppercase();
        Self::all()
            .iter()
            .copied()
            .find(|mode| mode.name() == wanted)
            .ok_or_else(|| format!("Unknown configuration: {}", s))
    }
}
