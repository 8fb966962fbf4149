//! CLI Exit Codes
//!
//! Stable process exit codes so scripts can tell a missing device from a
//! rejected command.

use crate::core::error::DriverError;
use crate::core::transport::TransportError;

/// Exit code constants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCodes;

impl ExitCodes {
    /// Success
    pub const SUCCESS: u8 = 0;

    /// General error
    pub const ERROR: u8 = 1;

    /// Connection or capability initialisation failed
    pub const CONNECTION_FAILED: u8 = 3;

    /// Connection timeout
    pub const TIMEOUT: u8 = 4;

    /// Configuration file could not be loaded
    pub const CONFIG_ERROR: u8 = 8;

    /// Payload could not be decoded
    pub const PROTOCOL_ERROR: u8 = 9;

    /// No device matched the name prefix
    pub const DEVICE_NOT_FOUND: u8 = 12;

    /// Peripheral busy with a previous GATT operation
    pub const DEVICE_BUSY: u8 = 13;

    /// Map a driver failure to its exit code
    pub fn for_driver_error(error: &DriverError) -> u8 {
        if error.is_busy() {
            return Self::DEVICE_BUSY;
        }
        match error {
            DriverError::TransportAcquisition(TransportError::DeviceNotFound(_)) => Self::DEVICE_NOT_FOUND,
            DriverError::SessionEstablishment(TransportError::Timeout(_)) => Self::TIMEOUT,
            DriverError::TransportAcquisition(_)
            | DriverError::SessionEstablishment(_)
            | DriverError::CapabilityInit { .. }
            | DriverError::ReconnectExhausted { .. } => Self::CONNECTION_FAILED,
            DriverError::Decode(_) => Self::PROTOCOL_ERROR,
            _ => Self::ERROR,
        }
    }
}

/// Exit code description
pub fn exit_code_description(code: u8) -> &'static str {
    match code {
        ExitCodes::SUCCESS => "Success",
        ExitCodes::ERROR => "General error",
        ExitCodes::CONNECTION_FAILED => "Connection failed",
        ExitCodes::TIMEOUT => "Connection timeout",
        ExitCodes::CONFIG_ERROR => "Configuration error",
        ExitCodes::PROTOCOL_ERROR => "Protocol error",
        ExitCodes::DEVICE_NOT_FOUND => "Device not found",
        ExitCodes::DEVICE_BUSY => "Device busy",
        _ => "Unknown error",
    }
}
