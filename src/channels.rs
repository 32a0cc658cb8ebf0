//! Inter-task channels.
//!
//! The BLE host stack delivers characteristic writes on its own task. They
//! are copied into [`INBOUND`] and drained by the main loop, so the rule
//! engine and the upload state machine only ever run on one context.
//!
//! ```text
//! ┌──────────────┐  InboundPacket  ┌──────────────┐
//! │  BLE host    │────────────────▶│  Main loop   │
//! │  (callback)  │                 │  (sync)      │
//! └──────────────┘                 └──────────────┘
//! ```

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

/// Largest write a client can issue at MTU 247 (ATT header excluded).
pub const MAX_PACKET: usize = 512;

/// One characteristic write.
pub type InboundPacket = heapless::Vec<u8, MAX_PACKET>;

/// Queue depth. Firmware streams arrive faster than one main-loop tick.
const INBOUND_DEPTH: usize = 32;

/// RX characteristic writes: BLE callback → main loop.
pub static INBOUND: Channel<CriticalSectionRawMutex, InboundPacket, INBOUND_DEPTH> =
    Channel::new();

/// Copy a write into the inbound queue. Returns `false` if the packet
/// was too long or the queue was full.
pub fn push_inbound(data: &[u8]) -> bool {
    let Ok(packet) = InboundPacket::from_slice(data) else {
        return false;
    };
    INBOUND.try_send(packet).is_ok()
}

/// Next queued write, if any.
pub fn pop_inbound() -> Option<InboundPacket> {
    INBOUND.try_receive().ok()
}
