//! Patch worker: drives one delta update from the ring into flash.
//!
//! Flow: job signalled → open running/update partitions → patch engine
//! → finalize + set boot → restart. Any failure aborts the update handle,
//! leaves the running image as boot target, and clears the update flag so
//! the main loop resumes.

use std::sync::Arc;

use embedded_hal::delay::DelayNs;
use log::{error, info, warn};

use crate::app::ports::{Clock, PartitionPort};
use crate::error::{Error, Result};

use super::page_cache::PageCache;
use super::{OtaSession, OtaShared, PatchEngine};

/// Result of one worker run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// New image is the boot target; a restart was requested.
    Restarting,
    /// Update abandoned; running image untouched.
    Aborted,
}

pub struct PatchExecutor<P, E, C, D> {
    partitions: P,
    engine: E,
    shared: Arc<OtaShared>,
    clock: C,
    delay: D,
    page_size: u32,
    page_timeout_ms: u32,
    idle_ms: u32,
}

impl<P, E, C, D> PatchExecutor<P, E, C, D>
where
    P: PartitionPort,
    E: PatchEngine,
    C: Clock,
    D: DelayNs,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        partitions: P,
        engine: E,
        shared: Arc<OtaShared>,
        clock: C,
        delay: D,
        page_size: u32,
        page_timeout_ms: u32,
        idle_ms: u32,
    ) -> Self {
        Self {
            partitions,
            engine,
            shared,
            clock,
            delay,
            page_size,
            page_timeout_ms,
            idle_ms,
        }
    }

    pub fn partitions(&self) -> &P {
        &self.partitions
    }

    /// Worker loop. Never returns.
    pub fn run_forever(&mut self) -> ! {
        info!("OTA: worker started");
        loop {
            self.poll_once();
        }
    }

    /// Run a pending job if there is one, otherwise idle for one period.
    pub fn poll_once(&mut self) -> Option<UpdateOutcome> {
        match self.shared.take_job() {
            Some(job) => Some(self.execute(&job)),
            None => {
                self.delay.delay_ms(self.idle_ms);
                None
            }
        }
    }

    /// Apply one update end to end.
    pub fn execute(&mut self, job: &OtaSession) -> UpdateOutcome {
        info!(
            "OTA: worker processing {} byte patch (crc 0x{:08X})",
            job.expected_len, job.declared_crc
        );

        let outcome = match self.apply(job.expected_len) {
            Ok(()) => {
                info!("OTA: complete, restarting");
                self.partitions.restart();
                UpdateOutcome::Restarting
            }
            Err(e) => {
                error!("OTA: update failed: {}", e);
                UpdateOutcome::Aborted
            }
        };

        info!("OTA: {} bytes received from the link", self.shared.processed());
        let overflow = self.shared.ring.overflow_count();
        if overflow > 0 {
            warn!("OTA: ring dropped {} bytes during transfer", overflow);
        }

        // A restart supersedes resumption.
        if outcome == UpdateOutcome::Aborted {
            self.shared.finish();
            info!("OTA: resuming normal operation");
        }
        outcome
    }

    /// The image is only finalized if the whole declared patch arrived and
    /// the stream was not cancelled.
    fn apply(&mut self, expected_len: u32) -> Result<()> {
        let mut source = self.partitions.open_running()?;
        let mut writer = self.partitions.begin_update()?;

        let mut cache = PageCache::new(
            &self.shared.ring,
            self.page_size,
            self.page_timeout_ms,
            &self.clock,
            &mut self.delay,
        );
        let applied = self.engine.apply(&mut source, &mut cache, &mut writer);
        let pages = cache.pages_loaded();
        let received = cache.bytes_received();

        let applied = applied.and_then(|written| {
            if self.shared.is_cancelled() {
                warn!("OTA: stream cancelled after {} patch bytes", received);
                return Err(Error::Parse("patch stream cancelled"));
            }
            if received != expected_len {
                return Err(Error::LengthMismatch {
                    expected: expected_len,
                    actual: received,
                });
            }
            Ok(written)
        });

        match applied {
            Ok(written) => {
                info!("OTA: {} bytes written from {} patch pages", written, pages);
                self.partitions.complete_update(writer)
            }
            Err(e) => {
                self.partitions.abort_update(writer);
                Err(e)
            }
        }
    }
}
