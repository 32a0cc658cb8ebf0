//! Worker thread spawning.
//!
//! ESP-IDF implements `std::thread` via pthreads, which are thin wrappers
//! around FreeRTOS tasks. `esp_pthread_set_cfg()` sets thread-local
//! configuration that applies to the *next* `pthread_create()` from the
//! calling thread, so the config→spawn pair must not be interleaved with
//! other thread creation on the same thread.

use std::io;
use std::thread::JoinHandle;

/// CPU core for a pinned task. `None` lets FreeRTOS pick (single-core C3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Core {
    /// PRO_CPU — protocol stacks (BLE).
    Pro = 0,
    /// APP_CPU — application logic.
    App = 1,
}

/// Spawn a FreeRTOS-backed thread with explicit priority and stack size.
///
/// `name` must be NUL-terminated (e.g. `"ota-worker\0"`).
#[cfg(target_os = "espidf")]
pub fn spawn_task(
    core: Option<Core>,
    priority: u8,
    stack_kb: usize,
    name: &'static str,
    f: impl FnOnce() + Send + 'static,
) -> io::Result<JoinHandle<()>> {
    // SAFETY: the config struct is fully initialised by the default
    // constructor; `name` is 'static and NUL-terminated.
    unsafe {
        let mut cfg = esp_idf_sys::esp_create_default_pthread_config();
        cfg.pin_to_core = core.map_or(esp_idf_sys::tskNO_AFFINITY as i32, |c| c as i32);
        cfg.prio = priority as i32;
        cfg.stack_size = (stack_kb * 1024) as i32;
        cfg.thread_name = name.as_ptr() as *const _;
        let ret = esp_idf_sys::esp_pthread_set_cfg(&cfg);
        if ret != esp_idf_sys::ESP_OK {
            return Err(io::Error::other("esp_pthread_set_cfg failed"));
        }
    }

    let display_name = name.trim_end_matches('\0');
    log::info!(
        "Spawning '{}' on {:?} (pri={}, stack={}KB)",
        display_name,
        core,
        priority,
        stack_kb
    );

    std::thread::Builder::new()
        .name(display_name.into())
        .stack_size(stack_kb * 1024)
        .spawn(f)
}

/// Host fallback: core affinity and priority are ignored.
#[cfg(not(target_os = "espidf"))]
pub fn spawn_task(
    _core: Option<Core>,
    _priority: u8,
    stack_kb: usize,
    name: &'static str,
    f: impl FnOnce() + Send + 'static,
) -> io::Result<JoinHandle<()>> {
    let display_name = name.trim_end_matches('\0');
    log::info!("Spawning '{}' (sim, stack={}KB)", display_name, stack_kb);
    std::thread::Builder::new()
        .name(display_name.into())
        .stack_size(stack_kb * 1024)
        .spawn(f)
}
