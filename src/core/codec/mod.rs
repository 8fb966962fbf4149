//! Wire codecs for every FlowIO sub-protocol
//!
//! Each submodule turns typed values into the exact byte frames the
//! firmware expects and back. Codecs are pure: no I/O, no state.
//!
//! Multi-byte fields are little-endian throughout:
//! - hardware status (`u16`)
//! - analog samples (`16 × u16`)
//! - PID gains (`f32`) and PID goals (`5 × u16`)

pub mod analog;
pub mod battery;
pub mod config;
pub mod control;
pub mod pid;
pub mod power_off;

pub use analog::{AnalogMode, AnalogSamples, ANALOG_CHANNELS, ANALOG_FRAME_LEN};
pub use battery::BatteryLevel;
pub use config::ConfigMode;
pub use control::{Action, ControlCommand, HardwareStatus, PortSet, Ports, PUMP_MAX_PWM};
pub use pid::{PidControl, PidGoals, PidSettings};
pub use power_off::PowerOffStatus;

/// Codec errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Payload length does not match the frame layout
    #[error("Invalid {frame} frame length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Frame name
        frame: &'static str,
        /// Required length
        expected: usize,
        /// Received length
        actual: usize,
    },

    /// Enumeration byte outside the known table
    #[error("Unrecognised {kind} code 0x{code:02x}")]
    UnknownCode {
        /// Enumeration name
        kind: &'static str,
        /// Offending byte
        code: u8,
    },
}

/// Reject payloads that are not exactly `expected` bytes long
pub(crate) fn expect_len(frame: &'static str, data: &[u8], expected: usize) -> Result<(), DecodeError> {
    if data.len() == expected {
        Ok(())
    } else {
        Err(DecodeError::InvalidLength {
            frame,
            expected,
            actual: data.len(),
        })
    }
}

/// First byte of a single-byte frame
pub(crate) fn first_byte(frame: &'static str, data: &[u8]) -> Result<u8, DecodeError> {
    data.first().copied().ok_or(DecodeError::InvalidLength {
        frame,
        expected: 1,
        actual: 0,
    })
}
