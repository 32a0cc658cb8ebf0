//! Control-channel protocol over the wireless link.
//!
//! Inbound: ASCII colon-delimited commands, raw payload chunks, and a
//! literal `END` terminator ([`command`], [`ingest`]). Outbound: chunked
//! JSON dumps with a trailing length/CRC footer ([`writer`], [`profile`])
//! and live debug lines ([`telemetry`]).

pub mod command;
pub mod ingest;
pub mod profile;
pub mod telemetry;
pub mod writer;

use crc::{CRC_32_ISO_HDLC, Crc};

/// IEEE CRC32 (reflected, poly 0xEDB88320, init/xorout 0xFFFFFFFF).
pub static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC32 of a complete buffer.
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}
