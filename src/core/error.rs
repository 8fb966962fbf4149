//! Driver error kinds

use crate::core::capability::CapabilityId;
use crate::core::codec::DecodeError;
use crate::core::state_machine::SessionState;
use crate::core::transport::TransportError;
use thiserror::Error;

/// Errors surfaced by session and capability operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    /// No matching device found, or selection cancelled
    #[error("Transport acquisition failed: {0}")]
    TransportAcquisition(#[source] TransportError),

    /// GATT connect failed
    #[error("Session establishment failed: {0}")]
    SessionEstablishment(#[source] TransportError),

    /// A capability could not discover its characteristics or do its initial read
    #[error("{capability} initialisation failed: {source}")]
    CapabilityInit {
        /// Which capability
        capability: CapabilityId,
        /// Underlying failure
        #[source]
        source: Box<DriverError>,
    },

    /// Peripheral or transport rejected a write
    #[error("Write failed: {0}")]
    Write(#[source] TransportError),

    /// Read failed at the transport level
    #[error("Read failed: {0}")]
    Read(#[source] TransportError),

    /// Payload of unexpected length or unknown enumeration code
    #[error("Decode failed: {0}")]
    Decode(#[from] DecodeError),

    /// Capability used before its `init` completed
    #[error("{0} used before initialisation")]
    Precondition(CapabilityId),

    /// Operation not allowed in the current session state
    #[error("Cannot {operation} while {state:?}")]
    InvalidState {
        /// Attempted operation
        operation: &'static str,
        /// Session state at the time
        state: SessionState,
    },

    /// Every reconnect attempt failed
    #[error("Reconnect failed after {attempts} attempts: {last}")]
    ReconnectExhausted {
        /// Failed attempts, including the first
        attempts: u32,
        /// Error of the final attempt
        #[source]
        last: Box<DriverError>,
    },
}

impl DriverError {
    /// Wrap a handler failure with the capability it came from
    pub fn capability_init(capability: CapabilityId, source: impl Into<DriverError>) -> Self {
        Self::CapabilityInit {
            capability,
            source: Box::new(source.into()),
        }
    }

    /// Check if the root cause is a busy peripheral
    pub fn is_busy(&self) -> bool {
        match self {
            Self::Write(e) | Self::Read(e) => e.is_busy(),
            _ => false,
        }
    }
}

impl From<TransportError> for DriverError {
    /// Transport failures inside a capability default to the read/write side
    /// they came from; discovery failures are reported as reads.
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::WriteError(_) | TransportError::Busy => Self::Write(err),
            other => Self::Read(other),
        }
    }
}

/// Result type alias
pub type Result<T, E = DriverError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_init_display() {
        let err = DriverError::capability_init(
            CapabilityId::Control,
            TransportError::ServiceNotFound(uuid::Uuid::nil()),
        );
        assert!(err.to_string().starts_with("control-service initialisation failed"));
    }

    #[test]
    fn test_busy() {
        assert!(DriverError::Write(TransportError::Busy).is_busy());
        assert!(DriverError::from(TransportError::Busy).is_busy());
        assert!(!DriverError::Write(TransportError::NotConnected).is_busy());
        assert!(!DriverError::Precondition(CapabilityId::Pid).is_busy());
    }
}
