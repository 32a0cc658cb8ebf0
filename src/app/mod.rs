//! Application core — pure domain logic, zero I/O.
//!
//! The bridge service, capability registry and ruleset persistence policy.
//! All interaction with hardware happens through **port traits** defined
//! in [`ports`], keeping this layer fully testable without real peripherals.

pub mod capabilities;
pub mod ports;
pub mod service;
pub mod slots;
