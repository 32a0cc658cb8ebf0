//! Unified error types for the W4RP firmware.
//!
//! A single `Error` enum that every subsystem converts into, so the main
//! loop and the patch worker handle failures the same way. Variants carry
//! only `Copy` data so they cross the worker/main-loop boundary without
//! allocation.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the firmware funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Malformed ruleset, watch list or command header.
    Parse(&'static str),
    /// Accumulated payload length differs from the declared length.
    LengthMismatch { expected: u32, actual: u32 },
    /// Accumulated payload CRC32 differs from the declared CRC32.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// A fixed limit was exceeded (ring overflow, oversized payload, table full).
    ResourceExhausted(&'static str),
    /// The patch engine asked for a page outside the cache window.
    ProtocolViolation { requested: u32, current: u32 },
    /// Partition, flash, bus or storage failure.
    Hardware(HardwareError),
    /// The incoming stream stalled while filling a page.
    Timeout(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(msg) => write!(f, "parse: {msg}"),
            Self::LengthMismatch { expected, actual } => {
                write!(f, "length mismatch: expected {expected}, got {actual}")
            }
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "CRC mismatch: expected 0x{expected:08X}, got 0x{actual:08X}")
            }
            Self::ResourceExhausted(what) => write!(f, "resource exhausted: {what}"),
            Self::ProtocolViolation { requested, current } => {
                write!(f, "page {requested} requested while on page {current}")
            }
            Self::Hardware(e) => write!(f, "hardware: {e}"),
            Self::Timeout(what) => write!(f, "timeout: {what}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Hardware errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareError {
    /// Running or update partition could not be resolved.
    NoPartition,
    /// Reading the running image failed.
    FlashRead,
    /// Writing the update image failed.
    FlashWrite,
    /// The update write handle could not be opened.
    OtaBegin,
    /// Image finalisation (validation) failed.
    OtaFinalize,
    /// Marking the update partition as boot target failed.
    BootSet,
    /// Bus controller start/stop/receive failed.
    Bus,
    /// Persistent store read/write failed.
    Storage,
}

impl fmt::Display for HardwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPartition => write!(f, "no OTA partition available"),
            Self::FlashRead => write!(f, "flash read failed"),
            Self::FlashWrite => write!(f, "flash write failed"),
            Self::OtaBegin => write!(f, "OTA begin failed"),
            Self::OtaFinalize => write!(f, "OTA finalize failed"),
            Self::BootSet => write!(f, "set boot partition failed"),
            Self::Bus => write!(f, "bus controller error"),
            Self::Storage => write!(f, "storage error"),
        }
    }
}

impl From<HardwareError> for Error {
    fn from(e: HardwareError) -> Self {
        Self::Hardware(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
