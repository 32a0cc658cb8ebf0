//! Delta firmware update data plane.
//!
//! ```text
//!  link ──▶ RingChannel ──▶ PageCache ──┐
//!                                       ├─▶ PatchEngine ──▶ update partition
//!  running partition ───────────────────┘
//! ```
//!
//! The ingest path produces into the ring on the main loop; the patch
//! worker consumes on its own thread. [`OtaShared`] is the only state the
//! two contexts touch concurrently.

pub mod executor;
pub mod jdiff;
pub mod page_cache;
pub mod ring;

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

use crate::error::Result;

pub use executor::PatchExecutor;
pub use jdiff::JojoPatch;
pub use page_cache::PageCache;
pub use ring::RingChannel;

// ── Stream traits ──────────────────────────────────────────────

/// Random-access reader.
pub trait ReadAt {
    /// Read up to `buf.len()` bytes at `offset`. Returns 0 at end of data.
    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize>;
}

/// Sequential writer.
pub trait WriteSeq {
    fn write_all(&mut self, data: &[u8]) -> Result<()>;
}

/// Applies a binary delta: `source + patch → target`.
pub trait PatchEngine {
    /// Returns the number of bytes written to `target`.
    fn apply(
        &mut self,
        source: &mut dyn ReadAt,
        patch: &mut dyn ReadAt,
        target: &mut dyn WriteSeq,
    ) -> Result<u32>;
}

// ── Session ────────────────────────────────────────────────────

/// Header fields of one firmware upload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OtaSession {
    pub expected_len: u32,
    /// CRC32 of the patch stream; recorded, not enforced inline.
    pub declared_crc: u32,
    /// Captured verbatim, never verified.
    pub signature: String,
}

/// State shared between the ingest path and the patch worker.
pub struct OtaShared {
    pub ring: RingChannel,
    update_in_progress: AtomicBool,
    /// Set when the producer gives up on the stream before `END`.
    cancelled: AtomicBool,
    /// Patch bytes received from the link, including dropped ones.
    processed: AtomicU32,
    job: Signal<CriticalSectionRawMutex, OtaSession>,
}

impl OtaShared {
    pub fn new(ring_capacity: usize) -> Self {
        Self {
            ring: RingChannel::new(ring_capacity),
            update_in_progress: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            processed: AtomicU32::new(0),
            job: Signal::new(),
        }
    }

    /// Set the update flag. Returns `false` if an update already owns it.
    pub fn try_begin(&self) -> bool {
        self.update_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Clear the update flag; normal operation resumes.
    pub fn finish(&self) {
        self.update_in_progress.store(false, Ordering::Release);
    }

    pub fn in_progress(&self) -> bool {
        self.update_in_progress.load(Ordering::Acquire)
    }

    /// Empty the ring and zero the counters for a new stream.
    ///
    /// Must only be called while the worker is idle.
    pub fn open_stream(&self) {
        self.ring.reset();
        self.processed.store(0, Ordering::Relaxed);
        self.cancelled.store(false, Ordering::Release);
    }

    /// Count `n` bytes taken off the link.
    pub fn record(&self, n: u32) {
        self.processed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u32 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Abandon the stream. The worker must not finalize what it has.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.ring.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Hand a session to the worker.
    pub fn submit(&self, session: OtaSession) {
        self.job.signal(session);
    }

    /// Non-blocking poll used by the worker loop.
    pub fn take_job(&self) -> Option<OtaSession> {
        self.job.try_take()
    }
}
