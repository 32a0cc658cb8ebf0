//! Command header parsing.
//!
//! | Packet                                   | Command                    |
//! |------------------------------------------|----------------------------|
//! | `GET:PROFILE`                            | profile dump               |
//! | `RESET:BLE`                              | accepted, ignored          |
//! | `DEBUG:START` / `DEBUG:STOP`             | toggle live telemetry      |
//! | `DEBUG:WATCH:<len>:<crc>`                | watch-set upload           |
//! | `SET:RULES:<RAM|NVS>:<len>:<crc>[:x]`    | ruleset upload             |
//! | `OTA:BEGIN:<len>:<crc>[:<sig>]`          | firmware delta upload      |
//! | `OTA:START:DELTA:<len>:<crc>`            | alias of `OTA:BEGIN`       |
//! | `END`                                    | upload terminator          |
//!
//! Numbers are decimal.

use crate::error::{Error, Result};

/// What an upload carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    /// Ruleset; `persist` stores it in the A/B slots.
    Rules { persist: bool },
    /// Diagnostic watch set.
    Watch,
    /// Firmware delta, streamed through the ring.
    Firmware,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadHeader<'a> {
    pub kind: UploadKind,
    pub len: u32,
    pub crc: u32,
    /// Firmware only; empty when absent.
    pub signature: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    GetProfile,
    ResetLink,
    DebugStart,
    DebugStop,
    Upload(UploadHeader<'a>),
    End,
}

/// Classify a packet.
///
/// `Ok(None)` means the packet is not a command (payload data, or noise
/// when no upload is active). A recognised prefix with unusable fields is
/// a [`Error::Parse`].
pub fn parse(packet: &[u8]) -> Result<Option<Command<'_>>> {
    let cmd = match packet {
        b"GET:PROFILE" => Command::GetProfile,
        b"RESET:BLE" => Command::ResetLink,
        b"DEBUG:START" => Command::DebugStart,
        b"DEBUG:STOP" => Command::DebugStop,
        b"END" => Command::End,
        _ => {
            if let Some(rest) = packet.strip_prefix(b"DEBUG:WATCH:") {
                let (len, crc, _) = fields(rest)?;
                upload(UploadKind::Watch, len, crc, "")
            } else if let Some(rest) = packet.strip_prefix(b"OTA:START:DELTA:") {
                let (len, crc, _) = fields(rest)?;
                upload(UploadKind::Firmware, len, crc, "")
            } else if let Some(rest) = packet.strip_prefix(b"OTA:BEGIN:") {
                let (len, crc, sig) = fields(rest)?;
                upload(UploadKind::Firmware, len, crc, sig)
            } else if let Some(rest) = packet.strip_prefix(b"SET:RULES:") {
                let rest = text(rest)?;
                let (mode, rest) = rest
                    .split_once(':')
                    .ok_or(Error::Parse("SET:RULES header"))?;
                let (len, crc, _) = fields(rest.as_bytes())?;
                upload(UploadKind::Rules { persist: mode == "NVS" }, len, crc, "")
            } else {
                return Ok(None);
            }
        }
    };
    Ok(Some(cmd))
}

fn upload(kind: UploadKind, len: u32, crc: u32, signature: &str) -> Command<'_> {
    Command::Upload(UploadHeader {
        kind,
        len,
        crc,
        signature,
    })
}

fn text(bytes: &[u8]) -> Result<&str> {
    core::str::from_utf8(bytes).map_err(|_| Error::Parse("non-ASCII header"))
}

/// `<len>:<crc>[:<rest>]`
fn fields(bytes: &[u8]) -> Result<(u32, u32, &str)> {
    let s = text(bytes)?;
    let (len, rest) = s.split_once(':').ok_or(Error::Parse("missing CRC field"))?;
    let (crc, tail) = rest.split_once(':').unwrap_or((rest, ""));
    Ok((number(len)?, number(crc)?, tail))
}

fn number(s: &str) -> Result<u32> {
    s.trim().parse().map_err(|_| Error::Parse("bad number in header"))
}
