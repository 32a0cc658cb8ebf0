//! Firmware partition adapter.
//!
//! Implements [`PartitionPort`] for the patch worker:
//!
//! - running image reads go through `esp_partition_read`
//! - the update slot is written with `esp-ota`, which validates the image
//!   on finalize and aborts the handle when dropped
//!
//! On the host the "flash" is a pair of in-memory images.

use log::{info, warn};

use crate::app::ports::PartitionPort;
use crate::error::{HardwareError, Result};
use crate::ota::{ReadAt, WriteSeq};

// ── Boot validation ───────────────────────────────────────────

/// Mark the running image valid so the bootloader cancels rollback.
#[cfg(target_os = "espidf")]
pub fn check_rollback() {
    match esp_ota::mark_app_valid() {
        Ok(()) => info!("OTA: firmware marked valid (rollback cancelled)"),
        Err(e) => warn!("OTA: mark_app_valid failed: {:?}", e),
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn check_rollback() {
    info!("OTA: rollback check skipped (simulation)");
}

// ───────────────────────────────────────────────────────────────
// ESP-IDF
// ───────────────────────────────────────────────────────────────

#[cfg(target_os = "espidf")]
mod esp {
    use super::*;
    use esp_idf_svc::sys::*;

    /// Read-only view of the partition the CPU is executing from.
    pub struct RunningImage {
        part: *const esp_partition_t,
        size: u32,
    }

    impl ReadAt for RunningImage {
        fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize> {
            if offset >= self.size {
                return Ok(0);
            }
            let n = buf.len().min((self.size - offset) as usize);
            // SAFETY: `part` comes from esp_ota_get_running_partition and is
            // valid for the program's lifetime; the range is clamped above.
            let ret = unsafe {
                esp_partition_read(self.part, offset as usize, buf.as_mut_ptr() as *mut _, n)
            };
            if ret != ESP_OK {
                log::error!("OTA: partition read at {} failed ({})", offset, ret);
                return Err(HardwareError::FlashRead.into());
            }
            Ok(n)
        }
    }

    pub struct UpdateWriter(pub esp_ota::OtaUpdate);

    impl WriteSeq for UpdateWriter {
        fn write_all(&mut self, data: &[u8]) -> Result<()> {
            self.0.write(data).map_err(|e| {
                log::error!("OTA: esp-ota write failed: {:?}", e);
                HardwareError::FlashWrite.into()
            })
        }
    }

    pub fn open_running() -> Result<RunningImage> {
        // SAFETY: plain query of the partition table.
        let part = unsafe { esp_ota_get_running_partition() };
        if part.is_null() {
            return Err(HardwareError::NoPartition.into());
        }
        let size = unsafe { (*part).size };
        Ok(RunningImage { part, size })
    }
}

#[cfg(target_os = "espidf")]
pub use esp::{RunningImage, UpdateWriter};

/// Running and update partitions of the device.
#[derive(Default)]
pub struct OtaPartitions {
    #[cfg(not(target_os = "espidf"))]
    sim: SimFlash,
}

#[cfg(target_os = "espidf")]
impl PartitionPort for OtaPartitions {
    type Reader = RunningImage;
    type Writer = UpdateWriter;

    fn open_running(&mut self) -> Result<Self::Reader> {
        esp::open_running()
    }

    fn begin_update(&mut self) -> Result<Self::Writer> {
        let update = esp_ota::OtaUpdate::begin().map_err(|e| {
            warn!("OTA: esp-ota begin failed: {:?}", e);
            HardwareError::OtaBegin
        })?;
        Ok(UpdateWriter(update))
    }

    fn complete_update(&mut self, writer: Self::Writer) -> Result<()> {
        let mut completed = writer.0.finalize().map_err(|e| {
            warn!("OTA: image validation failed: {:?}", e);
            HardwareError::OtaFinalize
        })?;
        completed.set_as_boot_partition().map_err(|e| {
            warn!("OTA: set boot partition failed: {:?}", e);
            HardwareError::BootSet
        })?;
        info!("OTA: new image set as boot partition");
        Ok(())
    }

    fn abort_update(&mut self, writer: Self::Writer) {
        // Dropping the handle calls esp_ota_abort.
        drop(writer);
        warn!("OTA: update aborted, running image stays bootable");
    }

    fn restart(&mut self) {
        esp_ota::restart();
    }
}

// ───────────────────────────────────────────────────────────────
// Simulation
// ───────────────────────────────────────────────────────────────

/// In-memory flash: the running image and whatever was made boot target.
#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default, Clone)]
pub struct SimFlash {
    pub running: std::sync::Arc<[u8]>,
    pub boot_image: Option<Vec<u8>>,
    pub aborts: u32,
    pub restarts: u32,
    /// Reject the image on finalize, like a failed validation.
    pub reject_image: bool,
}

#[cfg(not(target_os = "espidf"))]
pub struct SimReader(std::sync::Arc<[u8]>);

#[cfg(not(target_os = "espidf"))]
impl ReadAt for SimReader {
    fn read_at(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize> {
        let start = (offset as usize).min(self.0.len());
        let n = buf.len().min(self.0.len() - start);
        buf[..n].copy_from_slice(&self.0[start..start + n]);
        Ok(n)
    }
}

#[cfg(not(target_os = "espidf"))]
#[derive(Debug, Default)]
pub struct SimWriter(pub Vec<u8>);

#[cfg(not(target_os = "espidf"))]
impl WriteSeq for SimWriter {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.0.extend_from_slice(data);
        Ok(())
    }
}

#[cfg(not(target_os = "espidf"))]
impl OtaPartitions {
    pub fn with_running_image(image: &[u8]) -> Self {
        Self {
            sim: SimFlash {
                running: image.into(),
                ..Default::default()
            },
        }
    }

    pub fn sim(&self) -> &SimFlash {
        &self.sim
    }

    pub fn sim_mut(&mut self) -> &mut SimFlash {
        &mut self.sim
    }
}

#[cfg(not(target_os = "espidf"))]
impl PartitionPort for OtaPartitions {
    type Reader = SimReader;
    type Writer = SimWriter;

    fn open_running(&mut self) -> Result<Self::Reader> {
        Ok(SimReader(self.sim.running.clone()))
    }

    fn begin_update(&mut self) -> Result<Self::Writer> {
        Ok(SimWriter::default())
    }

    fn complete_update(&mut self, writer: Self::Writer) -> Result<()> {
        if self.sim.reject_image || writer.0.is_empty() {
            return Err(HardwareError::OtaFinalize.into());
        }
        self.sim.boot_image = Some(writer.0);
        Ok(())
    }

    fn abort_update(&mut self, _writer: Self::Writer) {
        self.sim.aborts += 1;
        warn!("OTA(sim): update aborted");
    }

    fn restart(&mut self) {
        self.sim.restarts += 1;
        info!("OTA(sim): restart requested");
    }
}
