//! # FlowIO Core Library
//!
//! Client-side driver for the FlowIO pneumatic actuator, reached over
//! Bluetooth Low Energy. The peripheral exposes one GATT service per
//! capability:
//! - Actuator control and hardware status
//! - 16-channel analog sampling
//! - Closed-loop PID settings and goals
//! - Pneumatic configuration mode
//! - Auto power-off timer
//! - Battery level
//!
//! A [`Session`] finds a device, connects, initialises every capability
//! handler and publishes connection changes, notifications and command
//! outcomes on its [`EventBus`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use flowio_core::{BluetoothConfig, BluetoothTransport, DomainEvent, PortSet, Session, SessionConfig, Topic};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = Arc::new(BluetoothTransport::new(BluetoothConfig::default()));
//!     let mut session = Session::new(transport, SessionConfig::default());
//!     session.connect("FlowIO", None).await?;
//!
//!     let mut status = session.bus().subscribe_channel(Topic::HardwareStatus);
//!     let control = session.capabilities().control();
//!     control.start_inflation(PortSet::ports(&[1, 2]), Some(200)).await?;
//!
//!     if let Some(DomainEvent::HardwareStatusChanged(s)) = status.recv().await {
//!         println!("pump 1 running: {}", s.pump1);
//!     }
//!
//!     control.stop_all_actions().await?;
//!     session.disconnect().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::config::{AppConfig, DeviceSettings, LoggingSettings};
pub use crate::core::capability::{CapabilityId, CapabilityRegistry, Pump};
pub use crate::core::codec::{
    Action, AnalogMode, AnalogSamples, ConfigMode, ControlCommand, DecodeError, HardwareStatus, PidControl,
    PidGoals, PidSettings, PortSet, Ports, PowerOffStatus,
};
pub use crate::core::error::DriverError;
pub use crate::core::event::{ConnectionEvent, ConnectionKind, ConnectionReason, DomainEvent, EventBus, Topic};
pub use crate::core::session::{Session, SessionConfig};
pub use crate::core::state_machine::{ReconnectPolicy, SessionState};
pub use crate::core::transport::{BluetoothConfig, BluetoothTransport, Transport, TransportError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
