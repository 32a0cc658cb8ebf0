//! Lock-free single-producer / single-consumer byte channel.
//!
//! ```text
//! ┌──────────────┐  push   ┌──────────────┐  read   ┌──────────────┐
//! │ StreamIngest │───────▶│ RingChannel  │───────▶│  PageCache   │
//! │ (link side)  │         │ (atomic SPSC)│         │ (OTA worker) │
//! └──────────────┘         └──────────────┘         └──────────────┘
//! ```
//!
//! Producer: the ingest path on the main loop. Consumer: the patch worker.
//! A full channel drops the incoming byte and counts it; there is no
//! backpressure toward the link.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, AtomicUsize, Ordering};

/// Fixed-capacity byte ring shared between the ingest path and the worker.
///
/// One slot stays empty to tell "full" from "empty", so a channel built
/// with capacity `N` holds at most `N - 1` bytes.
pub struct RingChannel {
    buf: Box<[AtomicU8]>,
    head: AtomicUsize,
    tail: AtomicUsize,
    overflow: AtomicU32,
    /// Set once the producer has seen the end of the stream.
    closed: AtomicBool,
}

impl RingChannel {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            buf: (0..capacity).map(|_| AtomicU8::new(0)).collect(),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            overflow: AtomicU32::new(0),
            closed: AtomicBool::new(true),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    // ── Producer side ─────────────────────────────────────────

    /// Append `data`, dropping whatever does not fit.
    /// Returns the number of bytes accepted.
    pub fn push(&self, data: &[u8]) -> usize {
        let cap = self.buf.len();
        let mut head = self.head.load(Ordering::Relaxed);
        let mut accepted = 0;

        for &byte in data {
            let next = (head + 1) % cap;
            if next == self.tail.load(Ordering::Acquire) {
                self.overflow
                    .fetch_add((data.len() - accepted) as u32, Ordering::Relaxed);
                break;
            }
            self.buf[head].store(byte, Ordering::Relaxed);
            head = next;
            self.head.store(head, Ordering::Release);
            accepted += 1;
        }
        accepted
    }

    /// Mark the end of input. The consumer drains what is left, then stops.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Empty the channel and reopen it for a new session.
    ///
    /// Must only be called while the consumer is idle.
    pub fn reset(&self) {
        self.head.store(0, Ordering::Relaxed);
        self.tail.store(0, Ordering::Relaxed);
        self.overflow.store(0, Ordering::Relaxed);
        self.closed.store(false, Ordering::Release);
    }

    // ── Consumer side ─────────────────────────────────────────

    /// Pop one byte.
    pub fn pop(&self) -> Option<u8> {
        let tail = self.tail.load(Ordering::Relaxed);
        if tail == self.head.load(Ordering::Acquire) {
            return None;
        }
        let byte = self.buf[tail].load(Ordering::Relaxed);
        self.tail.store((tail + 1) % self.buf.len(), Ordering::Release);
        Some(byte)
    }

    /// Drain up to `out.len()` bytes in FIFO order.
    pub fn read(&self, out: &mut [u8]) -> usize {
        let cap = self.buf.len();
        let mut tail = self.tail.load(Ordering::Relaxed);
        let head = self.head.load(Ordering::Acquire);
        let mut n = 0;

        while n < out.len() && tail != head {
            out[n] = self.buf[tail].load(Ordering::Relaxed);
            tail = (tail + 1) % cap;
            n += 1;
        }
        self.tail.store(tail, Ordering::Release);
        n
    }

    // ── Shared queries ────────────────────────────────────────

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.tail.load(Ordering::Relaxed) == self.head.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        let cap = self.buf.len();
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head + cap - tail) % cap
    }

    /// Bytes dropped since the last reset.
    pub fn overflow_count(&self) -> u32 {
        self.overflow.load(Ordering::Relaxed)
    }
}
