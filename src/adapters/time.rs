//! ESP32 time adapter.
//!
//! - **`target_os = "espidf"`** — wraps `esp_timer_get_time()` from the
//!   ESP-IDF high-resolution timer (microsecond precision, monotonic);
//!   sleeps go through FreeRTOS so other tasks keep running.
//! - **`not(target_os = "espidf")`** — uses `std::time::Instant` and
//!   `std::thread::sleep` for host-side testing and simulation.

use embedded_hal::delay::DelayNs;

use crate::app::ports::Clock;

/// Monotonic clock since boot.
#[derive(Debug, Clone, Copy)]
pub struct Esp32TimeAdapter {
    #[cfg(not(target_os = "espidf"))]
    start: std::time::Instant,
}

impl Default for Esp32TimeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl Esp32TimeAdapter {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            start: std::time::Instant::now(),
        }
    }

    /// Microseconds since boot.
    #[cfg(target_os = "espidf")]
    pub fn uptime_us(&self) -> u64 {
        (unsafe { esp_idf_svc::sys::esp_timer_get_time() }) as u64
    }

    /// Microseconds since the adapter was created.
    #[cfg(not(target_os = "espidf"))]
    pub fn uptime_us(&self) -> u64 {
        self.start.elapsed().as_micros() as u64
    }
}

impl Clock for Esp32TimeAdapter {
    /// Wraps after ~49.7 days.
    fn now_ms(&self) -> u32 {
        (self.uptime_us() / 1000) as u32
    }
}

/// Blocking delay that yields to the scheduler.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskDelay;

impl DelayNs for TaskDelay {
    #[cfg(target_os = "espidf")]
    fn delay_ns(&mut self, ns: u32) {
        esp_idf_hal::delay::FreeRtos::delay_us(ns.div_ceil(1000));
    }

    #[cfg(not(target_os = "espidf"))]
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(std::time::Duration::from_nanos(u64::from(ns)));
    }

    #[cfg(target_os = "espidf")]
    fn delay_ms(&mut self, ms: u32) {
        esp_idf_hal::delay::FreeRtos::delay_ms(ms);
    }
}
