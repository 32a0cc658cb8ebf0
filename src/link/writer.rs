//! Chunked outbound transfer for payloads larger than one notification.
//!
//! ```text
//! Notify 1: BEGIN
//! Notify 2: payload part 1        (chunk_size bytes)
//! ...
//! Notify N: payload part N-2      (final, may be short)
//! Notify N+1: END:<len>:<crc32>
//! ```
//!
//! The footer carries the length and CRC32 of exactly the bytes streamed,
//! so the receiver verifies the reassembled document.

use core::fmt::Write as _;

use crc::Digest;
use embedded_hal::delay::DelayNs;

use crate::app::ports::LinkPort;

use super::CRC32;

pub const BEGIN_MARKER: &[u8] = b"BEGIN";

/// Buffers writes into chunk-sized notifications with an inter-chunk gap.
pub struct StreamWriter<'a, L: ?Sized, D> {
    link: &'a mut L,
    delay: D,
    chunk_size: usize,
    gap_ms: u32,
    buf: Vec<u8>,
    total: u32,
    digest: Digest<'static, u32>,
}

impl<'a, L: LinkPort + ?Sized, D: DelayNs> StreamWriter<'a, L, D> {
    /// Send the `BEGIN` marker and open a stream.
    pub fn begin(link: &'a mut L, delay: D, chunk_size: usize, gap_ms: u32) -> Self {
        let mut w = Self {
            link,
            delay,
            chunk_size: chunk_size.max(1),
            gap_ms,
            buf: Vec::with_capacity(chunk_size),
            total: 0,
            digest: CRC32.digest(),
        };
        w.link.notify(BEGIN_MARKER);
        w.delay.delay_ms(w.gap_ms);
        w
    }

    pub fn write(&mut self, mut data: &[u8]) {
        self.digest.update(data);
        self.total += data.len() as u32;

        while !data.is_empty() {
            let space = self.chunk_size - self.buf.len();
            let n = space.min(data.len());
            self.buf.extend_from_slice(&data[..n]);
            data = &data[n..];
            if self.buf.len() >= self.chunk_size {
                self.flush();
            }
        }
    }

    fn flush(&mut self) {
        if self.buf.is_empty() {
            return;
        }
        self.link.notify(&self.buf);
        self.buf.clear();
        self.delay.delay_ms(self.gap_ms);
    }

    /// Flush the tail and send `END:<len>:<crc>`. Returns `(len, crc)`.
    pub fn finish(mut self) -> (u32, u32) {
        self.flush();
        let crc = self.digest.finalize();
        let mut footer = heapless::String::<32>::new();
        let _ = write!(footer, "END:{}:{}", self.total, crc);
        self.link.notify(footer.as_bytes());
        (self.total, crc)
    }
}

/// Stream `body` as one framed transfer.
pub fn send_framed<L: LinkPort + ?Sized, D: DelayNs>(
    link: &mut L,
    delay: D,
    body: &[u8],
    chunk_size: usize,
    gap_ms: u32,
) -> (u32, u32) {
    let mut w = StreamWriter::begin(link, delay, chunk_size, gap_ms);
    w.write(body);
    w.finish()
}
