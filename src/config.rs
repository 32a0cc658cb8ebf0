//! Module configuration parameters
//!
//! All tunable parameters for the W4RP module. Values can be overridden via
//! the persisted config blob in NVS; anything absent falls back to defaults.

use serde::{Deserialize, Serialize};

use crate::app::ports::ConfigError;

/// Maximum signals per ruleset.
pub const MAX_SIGNALS: usize = 128;
/// Maximum nodes per ruleset.
pub const MAX_NODES: usize = 64;
/// Maximum flows per ruleset.
pub const MAX_FLOWS: usize = 32;
/// Maximum accepted ruleset / watch payload size in bytes.
pub const MAX_PAYLOAD_BYTES: u32 = 16 * 1024;

/// TWAI controller operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CanMode {
    /// Standard TX/RX with ACK.
    Normal,
    /// Receive only, no ACK (safe on vehicle buses).
    ListenOnly,
    /// TX/RX without waiting for ACK.
    NoAck,
}

/// Core module configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    // --- Identity ---
    /// Replaces the MAC-derived module id when set.
    pub module_id_override: Option<heapless::String<24>>,
    /// Hardware model reported in status and profile.
    pub hw_model: heapless::String<32>,
    /// Firmware version reported in status and profile.
    pub fw_version: heapless::String<24>,
    /// Serial / VIN label.
    pub serial: Option<heapless::String<32>>,
    /// Advertised BLE name; module id when absent.
    pub ble_name: Option<heapless::String<29>>,

    // --- CAN ---
    pub can_tx_pin: i32,
    pub can_rx_pin: i32,
    pub can_mode: CanMode,
    /// Bus bitrate in bit/s.
    pub can_bitrate: u32,

    // --- Main loop timing ---
    /// Yield between main-loop iterations (milliseconds)
    pub loop_yield_ms: u32,
    /// Status push interval while connected (milliseconds)
    pub status_interval_ms: u32,
    /// Minimum spacing between debug telemetry bursts (milliseconds)
    pub debug_interval_ms: u32,
    /// Frames drained from the bus per tick
    pub max_frames_per_tick: u16,
    /// Debug lines emitted per telemetry burst
    pub max_debug_updates: u16,

    // --- OTA data plane ---
    /// RingChannel capacity in bytes
    pub ring_capacity: u32,
    /// PageCache page size; matches the patch engine buffer size
    pub page_size: u32,
    /// Stall timeout while filling one page (milliseconds)
    pub page_timeout_ms: u32,
    /// Worker poll period while idle (milliseconds)
    pub worker_idle_ms: u32,

    // --- Link ---
    /// Outbound notification chunk size
    pub chunk_size: u16,
    /// Delay between outbound chunks (milliseconds)
    pub chunk_delay_ms: u32,
    /// Negotiated ATT MTU requested at init
    pub mtu: u16,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        let mut hw_model = heapless::String::new();
        let _ = hw_model.push_str("esp32c3-mini-1");
        let mut fw_version = heapless::String::new();
        let _ = fw_version.push_str(env!("CARGO_PKG_VERSION"));

        Self {
            // Identity
            module_id_override: None,
            hw_model,
            fw_version,
            serial: None,
            ble_name: None,

            // CAN
            can_tx_pin: 21,
            can_rx_pin: 20,
            can_mode: CanMode::Normal,
            can_bitrate: 500_000,

            // Timing
            loop_yield_ms: 5,
            status_interval_ms: 5000,
            debug_interval_ms: 300, // ~3 Hz
            max_frames_per_tick: 128,
            max_debug_updates: 20,

            // OTA
            ring_capacity: 8192,
            page_size: 1024,
            page_timeout_ms: 5000,
            worker_idle_ms: 100,

            // Link
            chunk_size: 180,
            chunk_delay_ms: 5,
            mtu: 247,
        }
    }
}

impl ModuleConfig {
    /// Range-check every field. Invalid values are rejected, never clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(
            self.can_bitrate,
            125_000 | 250_000 | 500_000 | 800_000 | 1_000_000
        ) {
            return Err(ConfigError::ValidationFailed(
                "can_bitrate must be 125k, 250k, 500k, 800k or 1M",
            ));
        }
        if !(64..=4096).contains(&self.page_size) {
            return Err(ConfigError::ValidationFailed("page_size must be 64–4096"));
        }
        if self.ring_capacity < self.page_size * 2 {
            return Err(ConfigError::ValidationFailed(
                "ring_capacity must hold at least two pages",
            ));
        }
        if !(20..=244).contains(&self.chunk_size) {
            return Err(ConfigError::ValidationFailed("chunk_size must be 20–244"));
        }
        if self.page_timeout_ms == 0
            || self.status_interval_ms == 0
            || self.debug_interval_ms == 0
            || self.worker_idle_ms == 0
        {
            return Err(ConfigError::ValidationFailed("intervals must be nonzero"));
        }
        if self.max_frames_per_tick == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_frames_per_tick must be nonzero",
            ));
        }
        Ok(())
    }
}
