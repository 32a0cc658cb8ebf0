//! JojoDiff patch decoder.
//!
//! The patch is a stream of `ESC op [len]` commands, with literal bytes
//! following `MOD`/`INS`. A literal `ESC` inside data is escaped as
//! `ESC ESC`; `ESC` followed by a non-opcode byte is two data bytes.
//!
//! | Op    | Byte | Effect                                         |
//! |-------|------|------------------------------------------------|
//! | `MOD` | A6   | literal bytes replace source bytes             |
//! | `INS` | A5   | literal bytes inserted, source not advanced    |
//! | `DEL` | A4   | skip `len` source bytes                        |
//! | `EQL` | A3   | copy `len` source bytes                        |
//! | `BKT` | A2   | move source back by `len` bytes                |

use log::info;

use crate::error::{Error, Result};

use super::{PatchEngine, ReadAt, WriteSeq};

pub const ESC: u8 = 0xA7;
pub const MOD: u8 = 0xA6;
pub const INS: u8 = 0xA5;
pub const DEL: u8 = 0xA4;
pub const EQL: u8 = 0xA3;
pub const BKT: u8 = 0xA2;

/// Emit a progress line every this many target bytes.
const PROGRESS_STEP: u32 = 64 * 1024;

// ── Buffered I/O ───────────────────────────────────────────────

/// Page-aligned read buffer with a free-moving cursor.
struct Cursor<'a> {
    inner: &'a mut dyn ReadAt,
    buf: Box<[u8]>,
    start: u32,
    len: usize,
    pos: u32,
}

impl<'a> Cursor<'a> {
    fn new(inner: &'a mut dyn ReadAt, size: usize) -> Self {
        Self {
            inner,
            buf: vec![0u8; size].into_boxed_slice(),
            start: 0,
            len: 0,
            pos: 0,
        }
    }

    /// Next byte, or `None` at end of stream.
    fn next_byte(&mut self) -> Result<Option<u8>> {
        let in_buf = self.pos >= self.start && ((self.pos - self.start) as usize) < self.len;
        if !in_buf {
            let size = self.buf.len() as u32;
            self.start = self.pos - self.pos % size;
            self.len = self.inner.read_at(self.start, &mut self.buf)?;
            if ((self.pos - self.start) as usize) >= self.len {
                return Ok(None);
            }
        }
        let byte = self.buf[(self.pos - self.start) as usize];
        self.pos += 1;
        Ok(Some(byte))
    }

    fn require(&mut self, what: &'static str) -> Result<u8> {
        self.next_byte()?.ok_or(Error::Parse(what))
    }

    fn skip(&mut self, n: u32) {
        self.pos = self.pos.saturating_add(n);
    }

    fn rewind(&mut self, n: u32) -> Result<()> {
        self.pos = self
            .pos
            .checked_sub(n)
            .ok_or(Error::Parse("patch seeks before start"))?;
        Ok(())
    }
}

/// Fixed-size write buffer flushed to the target in whole chunks.
struct Sink<'a> {
    inner: &'a mut dyn WriteSeq,
    buf: Vec<u8>,
    written: u32,
    next_report: u32,
}

impl<'a> Sink<'a> {
    fn new(inner: &'a mut dyn WriteSeq, size: usize) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(size),
            written: 0,
            next_report: PROGRESS_STEP,
        }
    }

    fn put(&mut self, byte: u8) -> Result<()> {
        self.buf.push(byte);
        if self.buf.len() == self.buf.capacity() {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        self.inner.write_all(&self.buf)?;
        self.written += self.buf.len() as u32;
        self.buf.clear();
        if self.written >= self.next_report {
            info!("OTA: {} KiB written", self.written / 1024);
            self.next_report += PROGRESS_STEP;
        }
        Ok(())
    }
}

// ── Engine ─────────────────────────────────────────────────────

/// JojoDiff decoder with page-sized buffers on all three streams.
pub struct JojoPatch {
    buffer_size: usize,
}

impl JojoPatch {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(16),
        }
    }
}

impl PatchEngine for JojoPatch {
    fn apply(
        &mut self,
        source: &mut dyn ReadAt,
        patch: &mut dyn ReadAt,
        target: &mut dyn WriteSeq,
    ) -> Result<u32> {
        let mut src = Cursor::new(source, self.buffer_size);
        let mut pch = Cursor::new(patch, self.buffer_size);
        let mut out = Sink::new(target, self.buffer_size);

        while let Some(c) = pch.next_byte()? {
            if c != ESC {
                return Err(Error::Parse("expected ESC in patch"));
            }
            let Some(op) = pch.next_byte()? else {
                break;
            };
            match op {
                EQL => {
                    let n = read_length(&mut pch)?;
                    for _ in 0..n {
                        let b = src.require("source exhausted")?;
                        out.put(b)?;
                    }
                }
                MOD => copy_literals(&mut src, &mut pch, &mut out, true)?,
                INS => copy_literals(&mut src, &mut pch, &mut out, false)?,
                DEL => {
                    let n = read_length(&mut pch)?;
                    src.skip(n);
                }
                BKT => {
                    let n = read_length(&mut pch)?;
                    src.rewind(n)?;
                }
                _ => return Err(Error::Parse("unsupported patch opcode")),
            }
        }

        out.flush()?;
        info!("OTA: patch applied, {} bytes written", out.written);
        Ok(out.written)
    }
}

/// Decode a length: `c+1` for c ≤ 251, `253+n` for 252, then 16- and
/// 32-bit big-endian forms for 253 and 254.
fn read_length(pch: &mut Cursor<'_>) -> Result<u32> {
    let c = pch.require("truncated length")?;
    match c {
        0..=251 => Ok(u32::from(c) + 1),
        252 => Ok(253 + u32::from(pch.require("truncated length")?)),
        253 => {
            let hi = u32::from(pch.require("truncated length")?);
            let lo = u32::from(pch.require("truncated length")?);
            Ok((hi << 8) | lo)
        }
        254 => {
            let mut n = 0u32;
            for _ in 0..4 {
                n = (n << 8) | u32::from(pch.require("truncated length")?);
            }
            Ok(n)
        }
        _ => Err(Error::Parse("invalid patch length")),
    }
}

/// Copy literal bytes until the next `ESC op`, which is pushed back.
fn copy_literals(
    src: &mut Cursor<'_>,
    pch: &mut Cursor<'_>,
    out: &mut Sink<'_>,
    advance_source: bool,
) -> Result<()> {
    let mut emit = |b: u8, out: &mut Sink<'_>| -> Result<()> {
        out.put(b)?;
        if advance_source {
            src.skip(1);
        }
        Ok(())
    };

    loop {
        let Some(m) = pch.next_byte()? else {
            return Ok(());
        };
        if m != ESC {
            emit(m, out)?;
            continue;
        }
        let Some(m) = pch.next_byte()? else {
            return emit(ESC, out);
        };
        match m {
            ESC => emit(ESC, out)?,
            BKT..=MOD => {
                pch.rewind(2)?;
                return Ok(());
            }
            _ => {
                emit(ESC, out)?;
                emit(m, out)?;
            }
        }
    }
}
