//! Upload session state machine for the control channel.
//!
//! ```text
//!          header                 END (ok)
//!  Idle ───────────▶ Receiving ───────────▶ Finalizing ──▶ Idle
//!   ▲                  │  data                 │ bad len/crc
//!   │                  └──────┐                ▼
//!   └──── new header ◀── append to sink     Aborted ──▶ Idle
//! ```
//!
//! RAM uploads (ruleset, watch set) accumulate in a buffer and are checked
//! for length, then CRC32, on `END`. Firmware uploads push straight into
//! the [`RingChannel`](crate::ota::RingChannel); `END` only closes it.

use log::{error, info, warn};

use crate::config::MAX_PAYLOAD_BYTES;
use crate::error::{Error, Result};
use crate::ota::{OtaSession, OtaShared};

use super::command::{self, Command, UploadKind};
use super::crc32;

/// Where the current upload's bytes go.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sink {
    Rules { persist: bool },
    Watch,
    Firmware,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Receiving { sink: Sink, expected_len: u32, expected_crc: u32 },
}

/// What the service must do after a packet.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestEvent {
    /// Nothing further to do.
    None,
    ProfileRequested,
    DebugStart,
    DebugStop,
    /// Verified ruleset text.
    RulesReady { payload: Vec<u8>, crc: u32, persist: bool },
    /// Verified watch-set text.
    WatchReady(Vec<u8>),
    /// A firmware upload began; the bus must be halted now.
    FirmwareStarted,
    /// The firmware stream ended; the worker drains what is left.
    FirmwareEnded { processed: u32 },
    /// The packet or the finished upload was refused.
    Rejected(Error),
}

pub struct StreamIngest {
    state: StreamState,
    buffer: Vec<u8>,
    processed: u32,
}

impl Default for StreamIngest {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamIngest {
    pub fn new() -> Self {
        Self {
            state: StreamState::Idle,
            buffer: Vec::new(),
            processed: 0,
        }
    }

    pub fn state(&self) -> &StreamState {
        &self.state
    }

    pub fn processed(&self) -> u32 {
        self.processed
    }

    /// Feed one inbound packet.
    pub fn handle(&mut self, packet: &[u8], ota: &OtaShared) -> IngestEvent {
        if packet.is_empty() {
            return IngestEvent::None;
        }

        match command::parse(packet) {
            Ok(Some(Command::GetProfile)) => IngestEvent::ProfileRequested,
            Ok(Some(Command::ResetLink)) => {
                info!("LINK: RESET:BLE requested, ignored");
                IngestEvent::None
            }
            Ok(Some(Command::DebugStart)) => IngestEvent::DebugStart,
            Ok(Some(Command::DebugStop)) => IngestEvent::DebugStop,
            Ok(Some(Command::Upload(h))) => {
                if h.kind == UploadKind::Firmware && ota.in_progress() {
                    warn!("LINK: firmware update already in progress, start ignored");
                    return IngestEvent::Rejected(Error::ResourceExhausted("update in progress"));
                }
                self.abandon(ota);
                match h.kind {
                    UploadKind::Firmware => self.begin_firmware(h.len, h.crc, h.signature, ota),
                    UploadKind::Rules { persist } => {
                        self.begin_ram(Sink::Rules { persist }, h.len, h.crc)
                    }
                    UploadKind::Watch => self.begin_ram(Sink::Watch, h.len, h.crc),
                }
            }
            Ok(Some(Command::End)) => self.finish(ota),
            Ok(None) => self.data(packet, ota),
            Err(e) => {
                warn!("LINK: {}: {}", e, String::from_utf8_lossy(packet));
                IngestEvent::Rejected(e)
            }
        }
    }

    fn begin_ram(&mut self, sink: Sink, len: u32, crc: u32) -> IngestEvent {
        if len > MAX_PAYLOAD_BYTES {
            warn!("LINK: upload of {} bytes exceeds {} byte limit", len, MAX_PAYLOAD_BYTES);
            return IngestEvent::Rejected(Error::ResourceExhausted("payload too large"));
        }
        self.buffer.clear();
        self.buffer.reserve(len as usize);
        self.processed = 0;
        self.state = StreamState::Receiving {
            sink,
            expected_len: len,
            expected_crc: crc,
        };
        info!("LINK: {:?} upload, expect {} bytes, CRC=0x{:08X}", sink, len, crc);
        IngestEvent::None
    }

    fn begin_firmware(&mut self, len: u32, crc: u32, signature: &str, ota: &OtaShared) -> IngestEvent {
        if !ota.try_begin() {
            warn!("LINK: firmware update already in progress, start ignored");
            return IngestEvent::Rejected(Error::ResourceExhausted("update in progress"));
        }

        ota.open_stream();
        self.processed = 0;
        self.state = StreamState::Receiving {
            sink: Sink::Firmware,
            expected_len: len,
            expected_crc: crc,
        };

        if signature.is_empty() {
            warn!("OTA: no signature provided");
        } else {
            info!("OTA: signature {}", signature);
        }
        info!("OTA: start, size={} CRC=0x{:08X}", len, crc);

        ota.submit(OtaSession {
            expected_len: len,
            declared_crc: crc,
            signature: signature.into(),
        });
        IngestEvent::FirmwareStarted
    }

    fn data(&mut self, packet: &[u8], ota: &OtaShared) -> IngestEvent {
        let StreamState::Receiving { sink, .. } = self.state else {
            warn!("LINK: unknown command: {}", String::from_utf8_lossy(packet));
            return IngestEvent::None;
        };

        if sink == Sink::Firmware {
            let accepted = ota.ring.push(packet);
            ota.record(packet.len() as u32);
            if accepted < packet.len() {
                error!("OTA: ring overflow, {} bytes dropped", packet.len() - accepted);
            }
        } else {
            if self.buffer.len() + packet.len() > MAX_PAYLOAD_BYTES as usize {
                error!("LINK: upload exceeds {} bytes, discarded", MAX_PAYLOAD_BYTES);
                self.reset();
                return IngestEvent::Rejected(Error::ResourceExhausted("payload too large"));
            }
            self.buffer.extend_from_slice(packet);
        }
        self.processed = self.processed.wrapping_add(packet.len() as u32);
        IngestEvent::None
    }

    fn finish(&mut self, ota: &OtaShared) -> IngestEvent {
        let StreamState::Receiving {
            sink,
            expected_len,
            expected_crc,
        } = self.state
        else {
            warn!("LINK: END without active upload");
            return IngestEvent::None;
        };
        self.state = StreamState::Idle;
        info!("LINK: END received, {} bytes processed", self.processed);

        if sink == Sink::Firmware {
            ota.ring.close();
            return IngestEvent::FirmwareEnded {
                processed: self.processed,
            };
        }

        let payload = core::mem::take(&mut self.buffer);
        match verify(&payload, expected_len, expected_crc) {
            Ok(crc) => match sink {
                Sink::Rules { persist } => IngestEvent::RulesReady {
                    payload,
                    crc,
                    persist,
                },
                _ => IngestEvent::WatchReady(payload),
            },
            Err(e) => {
                error!("LINK: upload discarded: {}", e);
                IngestEvent::Rejected(e)
            }
        }
    }

    /// Drop the current session before a new header takes over.
    fn abandon(&mut self, ota: &OtaShared) {
        if let StreamState::Receiving { sink, .. } = self.state {
            warn!("LINK: {:?} upload abandoned after {} bytes", sink, self.processed);
            if sink == Sink::Firmware {
                ota.cancel();
            }
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.state = StreamState::Idle;
        self.buffer.clear();
        self.processed = 0;
    }
}

/// Length first, then CRC32. Returns the computed CRC.
pub fn verify(payload: &[u8], expected_len: u32, expected_crc: u32) -> Result<u32> {
    let actual_len = payload.len() as u32;
    if actual_len != expected_len {
        return Err(Error::LengthMismatch {
            expected: expected_len,
            actual: actual_len,
        });
    }
    let actual = crc32(payload);
    if actual != expected_crc {
        return Err(Error::ChecksumMismatch {
            expected: expected_crc,
            actual,
        });
    }
    Ok(actual)
}
