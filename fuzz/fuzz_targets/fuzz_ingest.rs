//! Fuzz target: `StreamIngest::handle`
//!
//! Splits the input into packets on `\n` and feeds them through the upload
//! state machine against a small ring. Nothing may panic, and a verified
//! ruleset must match its declared CRC.
//!
//! cargo fuzz run fuzz_ingest

#![no_main]

use libfuzzer_sys::fuzz_target;
use w4rp::link::ingest::{IngestEvent, StreamIngest};
use w4rp::ota::OtaShared;

fuzz_target!(|data: &[u8]| {
    let ota = OtaShared::new(64);
    let mut ingest = StreamIngest::new();

    for packet in data.split(|&b| b == b'\n') {
        match ingest.handle(packet, &ota) {
            IngestEvent::RulesReady { payload, crc, .. } => {
                assert_eq!(w4rp::link::crc32(&payload), crc);
            }
            IngestEvent::FirmwareEnded { .. } => assert!(ota.ring.is_closed()),
            _ => {}
        }
        assert!(ota.ring.len() < ota.ring.capacity());
    }
});
