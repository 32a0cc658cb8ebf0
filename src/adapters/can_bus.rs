//! TWAI (CAN) bus adapter.
//!
//! Implements [`BusPort`]. Reception is polled with a zero timeout from the
//! main loop; the driver's RX queue absorbs bursts between ticks.
//!
//! - **`target_os = "espidf"`** — raw `twai_*` calls from `esp_idf_svc::sys`.
//! - **`not(target_os = "espidf")`** — a frame queue fed by tests.

use log::info;

use crate::app::ports::{BusPort, CanFrame};
use crate::config::{CanMode, ModuleConfig};
use crate::error::Result;

#[cfg(not(target_os = "espidf"))]
use std::collections::VecDeque;

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

/// Driver RX queue depth.
#[cfg(target_os = "espidf")]
const RX_QUEUE_LEN: u32 = 32;

/// Bit timing for an 80 MHz source clock: `(brp, tseg_1, tseg_2, sjw)`.
#[cfg(any(target_os = "espidf", test))]
fn bit_timing(bitrate: u32) -> Option<(u32, u8, u8, u8)> {
    match bitrate {
        1_000_000 => Some((4, 15, 4, 3)),
        800_000 => Some((4, 16, 8, 3)),
        500_000 => Some((8, 15, 4, 3)),
        250_000 => Some((16, 15, 4, 3)),
        125_000 => Some((32, 15, 4, 3)),
        _ => None,
    }
}

pub struct TwaiBus {
    tx_pin: i32,
    rx_pin: i32,
    mode: CanMode,
    bitrate: u32,
    running: bool,
    frames: u32,
    #[cfg(not(target_os = "espidf"))]
    queue: VecDeque<CanFrame>,
}

impl TwaiBus {
    pub fn new(config: &ModuleConfig) -> Self {
        Self {
            tx_pin: config.can_tx_pin,
            rx_pin: config.can_rx_pin,
            mode: config.can_mode,
            bitrate: config.can_bitrate,
            running: false,
            frames: 0,
            #[cfg(not(target_os = "espidf"))]
            queue: VecDeque::new(),
        }
    }

    /// Install the driver and start reception.
    pub fn init(&mut self) -> Result<()> {
        self.install()?;
        self.start()?;
        info!(
            "CAN: TWAI running (TX={}, RX={}, {} bit/s, {:?})",
            self.tx_pin, self.rx_pin, self.bitrate, self.mode
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Frames received since boot.
    pub fn frames(&self) -> u32 {
        self.frames
    }

    #[cfg(target_os = "espidf")]
    fn install(&mut self) -> Result<()> {
        use crate::error::HardwareError;

        let Some((brp, tseg_1, tseg_2, sjw)) = bit_timing(self.bitrate) else {
            return Err(crate::error::Error::Parse("unsupported CAN bitrate"));
        };
        let mode = match self.mode {
            CanMode::Normal => twai_mode_t_TWAI_MODE_NORMAL,
            CanMode::ListenOnly => twai_mode_t_TWAI_MODE_LISTEN_ONLY,
            CanMode::NoAck => twai_mode_t_TWAI_MODE_NO_ACK,
        };

        let g_config = twai_general_config_t {
            mode,
            tx_io: self.tx_pin,
            rx_io: self.rx_pin,
            clkout_io: -1,
            bus_off_io: -1,
            tx_queue_len: 5,
            rx_queue_len: RX_QUEUE_LEN,
            alerts_enabled: 0,
            clkout_divider: 0,
            intr_flags: ESP_INTR_FLAG_LEVEL1 as i32,
            ..unsafe { core::mem::zeroed() }
        };
        let t_config = twai_timing_config_t {
            brp,
            tseg_1,
            tseg_2,
            sjw,
            triple_sampling: false,
            ..unsafe { core::mem::zeroed() }
        };
        let f_config = twai_filter_config_t {
            acceptance_code: 0,
            acceptance_mask: 0xFFFF_FFFF,
            single_filter: true,
        };

        // SAFETY: configs live for the duration of the call; the driver copies them.
        let ret = unsafe { twai_driver_install(&g_config, &t_config, &f_config) };
        if ret != ESP_OK {
            log::error!("CAN: driver install failed ({})", ret);
            return Err(HardwareError::Bus.into());
        }
        Ok(())
    }

    #[cfg(not(target_os = "espidf"))]
    fn install(&mut self) -> Result<()> {
        info!("CAN(sim): driver installed");
        Ok(())
    }

    // ── Simulation hooks ──────────────────────────────────────

    /// Queue a frame for the next `poll`.
    #[cfg(not(target_os = "espidf"))]
    pub fn inject(&mut self, frame: CanFrame) {
        self.queue.push_back(frame);
    }

    #[cfg(not(target_os = "espidf"))]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(target_os = "espidf")]
impl BusPort for TwaiBus {
    fn poll(&mut self) -> Option<CanFrame> {
        if !self.running {
            return None;
        }
        let mut msg: twai_message_t = unsafe { core::mem::zeroed() };
        // SAFETY: zero timeout, msg is a valid out-pointer.
        if unsafe { twai_receive(&mut msg, 0) } != ESP_OK {
            return None;
        }
        self.frames = self.frames.wrapping_add(1);
        let len = (msg.data_length_code as usize).min(8);
        Some(CanFrame::new(msg.identifier, &msg.data[..len]))
    }

    fn start(&mut self) -> Result<()> {
        let ret = unsafe { twai_start() };
        if ret != ESP_OK {
            log::error!("CAN: start failed ({})", ret);
            return Err(crate::error::HardwareError::Bus.into());
        }
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running = false;
        // Only valid from RUNNING or BUS_OFF; anything else is already stopped.
        let ret = unsafe { twai_stop() };
        if ret != ESP_OK {
            log::warn!("CAN: stop returned {}", ret);
        }
        Ok(())
    }
}

#[cfg(not(target_os = "espidf"))]
impl BusPort for TwaiBus {
    fn poll(&mut self) -> Option<CanFrame> {
        if !self.running {
            return None;
        }
        let frame = self.queue.pop_front()?;
        self.frames = self.frames.wrapping_add(1);
        Some(frame)
    }

    fn start(&mut self) -> Result<()> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_bitrates_have_timing() {
        for rate in [125_000, 250_000, 500_000, 800_000, 1_000_000] {
            let (brp, t1, t2, _) = bit_timing(rate).unwrap();
            // 80 MHz / brp / (1 + tseg_1 + tseg_2)
            assert_eq!(80_000_000 / brp / (1 + u32::from(t1) + u32::from(t2)), rate);
        }
        assert!(bit_timing(333_000).is_none());
    }

    #[test]
    fn stopped_bus_yields_nothing() {
        let mut bus = TwaiBus::new(&ModuleConfig::default());
        bus.inject(CanFrame::new(0x100, &[1, 2]));
        assert!(bus.poll().is_none());

        bus.init().unwrap();
        assert_eq!(bus.poll().map(|f| f.id), Some(0x100));
        assert!(bus.poll().is_none());
        assert_eq!(bus.frames(), 1);

        bus.stop().unwrap();
        bus.inject(CanFrame::new(0x200, &[]));
        assert!(bus.poll().is_none());
        assert_eq!(bus.pending(), 1);
    }
}
