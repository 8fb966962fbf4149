//! Transport collaborator contract
//!
//! The driver core never talks to a radio directly. It consumes the four
//! traits below, which any BLE stack can implement:
//! - [`Transport`] finds a device by name prefix and advertised services
//! - [`TransportHandle`] is the acquired device identity, reusable across reconnects
//! - [`GattSession`] is one live GATT connection
//! - [`GattService`] / [`Characteristic`] expose read, write and notifications
//!
//! A `btleplug` implementation lives in [`bluetooth`].

pub mod bluetooth;

pub use bluetooth::{BluetoothConfig, BluetoothTransport};

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Callback invoked with the raw payload of every characteristic notification
pub type NotificationHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Callback invoked when the transport reports an out-of-band disconnect
pub type DisconnectHandler = Arc<dyn Fn() + Send + Sync>;

/// Write acknowledgement mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteMode {
    /// Wait for the peripheral to acknowledge the write
    WithResponse,
    /// Fire and forget
    WithoutResponse,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WithResponse => write!(f, "with-response"),
            Self::WithoutResponse => write!(f, "without-response"),
        }
    }
}

/// Transport error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No device matched the discovery filter
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection timeout
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// Primary service missing on the peripheral
    #[error("Service not found: {0}")]
    ServiceNotFound(Uuid),

    /// Characteristic missing in a service
    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(Uuid),

    /// A previous GATT operation has not completed yet
    #[error("GATT operation already in progress")]
    Busy,

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Read error
    #[error("Read error: {0}")]
    ReadError(String),

    /// Write error
    #[error("Write error: {0}")]
    WriteError(String),

    /// Subscribe error
    #[error("Subscribe error: {0}")]
    SubscribeError(String),
}

impl TransportError {
    /// Check if the error only means the peripheral was still busy with an earlier operation
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy)
    }
}

/// One addressable value on the peripheral
#[async_trait]
pub trait Characteristic: Send + Sync {
    /// Characteristic UUID
    fn uuid(&self) -> Uuid;

    /// Read the current value
    async fn read(&self) -> Result<Vec<u8>, TransportError>;

    /// Write a value
    async fn write(&self, data: &[u8], mode: WriteMode) -> Result<(), TransportError>;

    /// Enable notifications and deliver every changed value to `handler`
    async fn subscribe(&self, handler: NotificationHandler) -> Result<(), TransportError>;
}

/// A primary GATT service
#[async_trait]
pub trait GattService: Send + Sync {
    /// Service UUID
    fn uuid(&self) -> Uuid;

    /// Look up a characteristic of this service
    async fn characteristic(&self, uuid: Uuid) -> Result<Arc<dyn Characteristic>, TransportError>;
}

/// A live GATT connection
#[async_trait]
pub trait GattSession: Send + Sync {
    /// Check if the link is still up
    fn is_connected(&self) -> bool;

    /// Look up a primary service
    async fn primary_service(&self, uuid: Uuid) -> Result<Arc<dyn GattService>, TransportError>;

    /// Close the link
    async fn disconnect(&self) -> Result<(), TransportError>;
}

/// An acquired device identity
#[async_trait]
pub trait TransportHandle: Send + Sync {
    /// Opaque device identifier
    fn id(&self) -> String;

    /// Human-readable device name
    fn name(&self) -> String;

    /// Establish (or re-establish) a GATT session
    async fn open_session(&self) -> Result<Arc<dyn GattSession>, TransportError>;

    /// Register a listener for asynchronous link loss
    fn on_disconnect(&self, handler: DisconnectHandler);
}

/// Device discovery
#[async_trait]
pub trait Transport: Send + Sync {
    /// Find a device whose name starts with `name_prefix` and which exposes `services`
    async fn discover(
        &self,
        name_prefix: &str,
        services: &[Uuid],
    ) -> Result<Arc<dyn TransportHandle>, TransportError>;
}
