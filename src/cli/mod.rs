//! CLI Module
//!
//! Support code for the `flowio-cli` binary:
//! - Exit codes for automation

pub mod exit_codes;

pub use exit_codes::{exit_code_description, ExitCodes};
