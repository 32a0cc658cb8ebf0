//! Fuzz target: `JojoPatch::apply`
//!
//! The first input byte picks the source length; the rest is the patch.
//! Malformed patches must fail cleanly and the reported size must match
//! what reached the writer.
//!
//! cargo fuzz run fuzz_jdiff

#![no_main]

use libfuzzer_sys::fuzz_target;
use w4rp::ota::{JojoPatch, PatchEngine, ReadAt, WriteSeq};

struct Mem(Vec<u8>);

impl ReadAt for Mem {
    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> w4rp::Result<usize> {
        let start = (offset as usize).min(self.0.len());
        let n = buf.len().min(self.0.len() - start);
        buf[..n].copy_from_slice(&self.0[start..start + n]);
        Ok(n)
    }
}

struct Capped(Vec<u8>);

impl WriteSeq for Capped {
    fn write_all(&mut self, data: &[u8]) -> w4rp::Result<()> {
        if self.0.len() + data.len() > 1 << 20 {
            return Err(w4rp::Error::ResourceExhausted("fuzz output cap"));
        }
        self.0.extend_from_slice(data);
        Ok(())
    }
}

fuzz_target!(|data: &[u8]| {
    let Some((&n, patch)) = data.split_first() else {
        return;
    };
    let source: Vec<u8> = (0..usize::from(n) * 4).map(|i| i as u8).collect();
    let mut out = Capped(Vec::new());

    if let Ok(written) = JojoPatch::new(64).apply(
        &mut Mem(source),
        &mut Mem(patch.to_vec()),
        &mut out,
    ) {
        assert_eq!(written as usize, out.0.len());
    }
});
