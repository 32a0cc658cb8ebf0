//! Fuzz target: `command::parse`
//!
//! Arbitrary packets must classify as a command, as payload, or as a parse
//! error. A recognised upload header must carry the length it declared.
//!
//! cargo fuzz run fuzz_command_parser

#![no_main]

use libfuzzer_sys::fuzz_target;
use w4rp::link::command::{self, Command};

fuzz_target!(|data: &[u8]| {
    if let Ok(Some(Command::Upload(h))) = command::parse(data) {
        let text = core::str::from_utf8(data).expect("headers are UTF-8");
        assert!(text.contains(&h.len.to_string()));
    }
});
