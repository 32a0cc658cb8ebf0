//! W4RP bridge firmware library.
//!
//! Exposes the pure-logic modules for integration testing and fuzzing.
//! All ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each module, next to a host simulation.
//!
//! ```text
//!  CAN ──▶ rules (decode · evaluate) ──▶ capabilities
//!  BLE ──▶ link (commands · uploads) ──┬─▶ rules / watch set
//!                                      └─▶ ota (ring · pages · patch) ──▶ flash
//! ```

#![deny(unused_must_use)]

pub mod adapters;
pub mod app;
pub mod channels;
pub mod config;
pub mod error;
pub mod link;
pub mod ota;
pub mod rules;

pub use error::{Error, HardwareError, Result};
