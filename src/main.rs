//! W4RP bridge firmware — main entry point.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                     Adapters (outer ring)                     │
//! │                                                               │
//! │  TwaiBus    BleLink    NvsAdapter    OtaPartitions  Esp32Time │
//! │  (BusPort)  (LinkPort) (Config+NVS)  (PartitionPort) (Clock)  │
//! │                                                               │
//! │  ─────────────────── Port Trait Boundary ───────────────────  │
//! │                                                               │
//! │  ┌──────────────────────────┐    ┌─────────────────────────┐  │
//! │  │ BridgeService (main loop)│───▶│ PatchExecutor (worker)  │  │
//! │  │ rules · ingest · status  │ring│ page cache · jdiff      │  │
//! │  └──────────────────────────┘    └─────────────────────────┘  │
//! └───────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use std::sync::Arc;

use anyhow::Result;
use embedded_hal::delay::DelayNs;
use log::{info, warn};

use w4rp::adapters::ble::BleLink;
use w4rp::adapters::can_bus::TwaiBus;
use w4rp::adapters::device_id;
use w4rp::adapters::flash::{self, OtaPartitions};
use w4rp::adapters::nvs::NvsAdapter;
use w4rp::adapters::task::spawn_task;
use w4rp::adapters::time::{Esp32TimeAdapter, TaskDelay};
use w4rp::app::capabilities::CapabilityRegistry;
use w4rp::app::ports::{Clock, ConfigPort};
use w4rp::app::service::BridgeService;
use w4rp::app::slots::RulesetSlotManager;
use w4rp::channels;
use w4rp::config::ModuleConfig;
use w4rp::ota::{JojoPatch, OtaShared, PatchExecutor};

/// Inbound packets handled per loop iteration before yielding.
const MAX_PACKETS_PER_TICK: usize = 16;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("W4RP bridge v{}", env!("CARGO_PKG_VERSION"));

    // ── 1b. OTA rollback check ────────────────────────────────
    flash::check_rollback();

    // ── 2. Load config from NVS (or defaults) ─────────────────
    let nvs = NvsAdapter::new().map_err(|e| anyhow::anyhow!("NVS init failed: {}", e))?;
    let config = match nvs.load() {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!("NVS: config load failed ({}), using defaults", e);
            ModuleConfig::default()
        }
    };

    // ── 3. Identity ───────────────────────────────────────────
    let mac = device_id::read_mac();
    let module_id = device_id::resolve(&config, &mac);
    let ble_name = config
        .ble_name
        .as_deref()
        .unwrap_or(module_id.as_str())
        .to_owned();
    info!("HW: {} | FW: {}", config.hw_model, config.fw_version);
    info!("Module ID: {} | BLE name: {}", module_id, ble_name);

    // ── 4. Shared OTA state + patch worker ────────────────────
    let ota = Arc::new(OtaShared::new(config.ring_capacity as usize));
    let time = Esp32TimeAdapter::new();
    {
        let mut worker = PatchExecutor::new(
            OtaPartitions::default(),
            JojoPatch::new(config.page_size as usize),
            Arc::clone(&ota),
            time,
            TaskDelay,
            config.page_size,
            config.page_timeout_ms,
            config.worker_idle_ms,
        );
        spawn_task(None, 5, 16, "ota-worker\0", move || worker.run_forever())?;
    }

    // ── 5. Service + persisted ruleset ────────────────────────
    let mut service = BridgeService::new(
        config.clone(),
        &module_id,
        RulesetSlotManager::new(nvs),
        CapabilityRegistry::with_builtins(),
        Arc::clone(&ota),
    );
    let boot = service.boot();
    info!("Boot #{}: ruleset {}", service.boot_count(), boot_label(&boot));

    // ── 6. Adapters ───────────────────────────────────────────
    let mut link = BleLink::new(&ble_name);
    link.start();

    let mut bus = TwaiBus::new(&config);
    if let Err(e) = bus.init() {
        warn!("CAN: init failed ({}), rules will see no frames", e);
    }

    info!("System ready. Entering main loop.");

    // ── 7. Main loop ──────────────────────────────────────────
    let mut delay = TaskDelay;
    loop {
        for _ in 0..MAX_PACKETS_PER_TICK {
            let Some(packet) = channels::pop_inbound() else { break };
            service.handle_packet(&packet, time.now_ms(), &mut link, &mut bus, &mut delay);
        }

        service.tick(time.now_ms(), &mut bus, &mut link);
        delay.delay_ms(config.loop_yield_ms);
    }
}

fn boot_label(boot: &w4rp::app::slots::BootRuleset) -> &'static str {
    use w4rp::app::slots::BootRuleset;
    match boot {
        BootRuleset::Active(_) => "active slot",
        BootRuleset::Backup(_) => "restored from backup",
        BootRuleset::Empty => "empty",
    }
}
