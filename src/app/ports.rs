//! Port traits — the hexagonal boundary between domain logic and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ BridgeService (domain)
//! ```
//!
//! Driven adapters (bus controller, wireless link, storage, flash) implement
//! these traits. The [`BridgeService`](super::service::BridgeService) and the
//! patch worker consume them via generics, so the domain core never touches
//! hardware directly.
//!
//! ## Notes
//!
//! - **ConfigPort** implementations MUST validate before persisting.
//! - **PartitionPort** implementations MUST leave the running image as boot
//!   target whenever an update is aborted.
//! - All port errors are typed — callers must handle every variant explicitly.

use crate::config::ModuleConfig;
use crate::error::Result;
use crate::ota::{ReadAt, WriteSeq};
use crate::rules::model::Params;

// ───────────────────────────────────────────────────────────────
// Bus port (driven adapter: CAN controller ↔ domain)
// ───────────────────────────────────────────────────────────────

/// One received bus frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CanFrame {
    pub id: u32,
    pub data: [u8; 8],
    pub len: u8,
}

impl CanFrame {
    pub fn new(id: u32, payload: &[u8]) -> Self {
        let mut data = [0u8; 8];
        let len = payload.len().min(8);
        data[..len].copy_from_slice(&payload[..len]);
        Self {
            id,
            data,
            len: len as u8,
        }
    }
}

/// Non-blocking access to the bus controller.
pub trait BusPort {
    /// Next queued frame, if any. Never blocks.
    fn poll(&mut self) -> Option<CanFrame>;

    /// Resume reception after an update.
    fn start(&mut self) -> Result<()>;

    /// Halt reception for the duration of an update.
    fn stop(&mut self) -> Result<()>;
}

// ───────────────────────────────────────────────────────────────
// Link port (driven adapter: domain → wireless characteristics)
// ───────────────────────────────────────────────────────────────

/// Outbound side of the wireless link.
///
/// Inbound writes do not pass through this trait: the adapter pushes them
/// into [`INBOUND`](crate::channels::INBOUND) and the main loop drains it.
pub trait LinkPort {
    /// Notify one packet on the data (TX) characteristic.
    /// Returns `false` if no client is subscribed.
    fn notify(&mut self, data: &[u8]) -> bool;

    /// Notify one packet on the status characteristic.
    fn notify_status(&mut self, data: &[u8]) -> bool;

    fn is_connected(&self) -> bool;

    /// Negotiated ATT MTU.
    fn mtu(&self) -> u16;
}

// ───────────────────────────────────────────────────────────────
// Action delegate (decouples the rule graph from capability handlers)
// ───────────────────────────────────────────────────────────────

/// Callback the rule graph invokes when an action node fires.
///
/// The graph ignores whatever the handler does; traversal continues to the
/// action's successors either way.
pub trait ActionDelegate {
    fn on_action(&mut self, capability_id: &str, params: &Params);
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic millisecond clock. Wraps at `u32::MAX`; callers compare with
/// `wrapping_sub`.
pub trait Clock {
    fn now_ms(&self) -> u32;
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }
}

// ───────────────────────────────────────────────────────────────
// Partition port (driven adapter: patch worker ↔ flash)
// ───────────────────────────────────────────────────────────────

/// Firmware partitions as seen by the patch worker.
///
/// An update handle is opened with [`begin_update`](Self::begin_update)
/// and must end in exactly one of [`complete_update`](Self::complete_update)
/// or [`abort_update`](Self::abort_update).
pub trait PartitionPort {
    /// Random-access reader over the running image.
    type Reader: ReadAt;
    /// Sequential writer into the inactive slot.
    type Writer: WriteSeq;

    fn open_running(&mut self) -> Result<Self::Reader>;

    fn begin_update(&mut self) -> Result<Self::Writer>;

    /// Validate the written image and make it the next boot target.
    fn complete_update(&mut self, writer: Self::Writer) -> Result<()>;

    /// Discard the partial image. The running image stays bootable.
    fn abort_update(&mut self, writer: Self::Writer);

    /// Reboot into whatever is marked as boot target.
    fn restart(&mut self);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists module configuration.
///
/// Implementations MUST validate config values before persisting.
/// Invalid ranges are rejected with [`ConfigError::ValidationFailed`],
/// not silently clamped.
pub trait ConfigPort {
    /// Load configuration from persistent storage.
    /// Returns [`ModuleConfig::default()`] if no stored config exists.
    fn load(&self) -> core::result::Result<ModuleConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &ModuleConfig) -> core::result::Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage (ruleset slots, boot counter).
///
/// - Keys are namespaced to prevent collisions between subsystems.
/// - Write operations MUST be atomic — no partial writes on power loss.
///   The ESP-IDF NVS API guarantees this natively; in-memory simulation
///   achieves it trivially.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(
        &self,
        namespace: &str,
        key: &str,
        buf: &mut [u8],
    ) -> core::result::Result<usize, StorageError>;

    /// Write a value atomically and commit.
    fn write(
        &mut self,
        namespace: &str,
        key: &str,
        data: &[u8],
    ) -> core::result::Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> core::result::Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`ConfigPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    /// The `&'static str` describes which field and why.
    ValidationFailed(&'static str),
    /// Underlying storage is full.
    StorageFull,
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Value larger than the caller's buffer.
    TooLarge,
    /// Generic I/O error.
    IoError,
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::StorageFull => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::TooLarge => write!(f, "value too large"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl From<StorageError> for crate::error::Error {
    fn from(_: StorageError) -> Self {
        crate::error::HardwareError::Storage.into()
    }
}
