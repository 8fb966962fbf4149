//! Core module containing the FlowIO driver
//!
//! This module provides:
//! - Transport traits for the GATT collaborator, and a btleplug implementation
//! - Wire codecs for every sub-protocol
//! - One capability handler per GATT service
//! - Session management with state machine and bounded reconnect
//! - Event bus for connection changes and notifications
//! - Simulated peripheral for tests and offline use

pub mod capability;
pub mod codec;
pub mod error;
pub mod event;
pub mod session;
pub mod simulator;
pub mod state_machine;
pub mod transport;
