//! Application service — the hexagonal core.
//!
//! [`BridgeService`] owns the rule graph, the upload state machine, debug
//! telemetry and ruleset persistence. Every I/O port is injected at the
//! call site, so the whole main-loop behaviour runs against mocks.
//!
//! ```text
//!  BusPort ────▶ ┌──────────────────────────┐ ──▶ LinkPort (TX, status)
//!                │      BridgeService       │
//!  INBOUND ────▶ │ RuleGraph · StreamIngest │ ──▶ CapabilityRegistry
//!                │ Telemetry · Slots        │
//!                └────────────┬─────────────┘
//!                             ▼ OtaShared (ring + flag)
//!                        patch worker
//! ```

use std::sync::Arc;

use embedded_hal::delay::DelayNs;
use log::{error, info, warn};

use crate::config::ModuleConfig;
use crate::error::Result;
use crate::link::ingest::{IngestEvent, StreamIngest};
use crate::link::profile::{ModuleInfo, ProfileDump, Runtime, RuntimeMode, StatusReport};
use crate::link::telemetry::DebugTelemetry;
use crate::link::writer::send_framed;
use crate::ota::OtaShared;
use crate::rules::{RuleGraph, RulesetDef, WatchDef};

use super::capabilities::CapabilityRegistry;
use super::ports::{BusPort, LinkPort, StoragePort};
use super::slots::{BootRuleset, RulesetSlotManager};

/// Parse, validate and install a ruleset. The graph is untouched on error.
pub fn apply_ruleset_text(graph: &mut RuleGraph, text: &[u8]) -> Result<()> {
    let def = RulesetDef::from_slice(text)?;
    def.validate()?;
    graph.apply_ruleset(&def)
}

// ───────────────────────────────────────────────────────────────
// BridgeService
// ───────────────────────────────────────────────────────────────

pub struct BridgeService<S> {
    config: ModuleConfig,
    module_id: heapless::String<24>,
    graph: RuleGraph,
    ingest: StreamIngest,
    telemetry: DebugTelemetry,
    slots: RulesetSlotManager<S>,
    registry: CapabilityRegistry,
    ota: Arc<OtaShared>,
    /// Last applied ruleset document and its CRC32.
    ruleset_text: Option<Vec<u8>>,
    ruleset_crc: u32,
    boot_count: u32,
    bus_paused: bool,
    was_connected: bool,
    last_status_ms: u32,
}

impl<S: StoragePort> BridgeService<S> {
    pub fn new(
        config: ModuleConfig,
        module_id: &str,
        slots: RulesetSlotManager<S>,
        registry: CapabilityRegistry,
        ota: Arc<OtaShared>,
    ) -> Self {
        Self {
            config,
            module_id: crate::rules::model::ident(module_id),
            graph: RuleGraph::new(),
            ingest: StreamIngest::new(),
            telemetry: DebugTelemetry::new(),
            slots,
            registry,
            ota,
            ruleset_text: None,
            ruleset_crc: 0,
            boot_count: 0,
            bus_paused: false,
            was_connected: false,
            last_status_ms: 0,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────

    /// Count this boot and install the persisted ruleset, if any.
    pub fn boot(&mut self) -> BootRuleset {
        self.boot_count = self.slots.increment_boot_count();

        let graph = &mut self.graph;
        let loaded = self
            .slots
            .load_boot_ruleset(|text| apply_ruleset_text(graph, text));
        if let BootRuleset::Active(text) | BootRuleset::Backup(text) = &loaded {
            self.ruleset_crc = crate::link::crc32(text);
            self.ruleset_text = Some(text.clone());
            info!(
                "RULES: {} signals, {} nodes, {} flows",
                self.graph.signals().len(),
                self.graph.nodes().len(),
                self.graph.flows().len()
            );
        }
        loaded
    }

    // ── Inbound packets ───────────────────────────────────────

    /// Handle one RX characteristic write.
    pub fn handle_packet<L, B, D>(
        &mut self,
        packet: &[u8],
        now_ms: u32,
        link: &mut L,
        bus: &mut B,
        delay: &mut D,
    ) where
        L: LinkPort + ?Sized,
        B: BusPort + ?Sized,
        D: DelayNs,
    {
        match self.ingest.handle(packet, &self.ota) {
            IngestEvent::None | IngestEvent::Rejected(_) => {}
            IngestEvent::ProfileRequested => self.send_profile(now_ms, link, delay),
            IngestEvent::DebugStart => self.telemetry.start(&mut self.graph),
            IngestEvent::DebugStop => self.telemetry.stop(),
            IngestEvent::RulesReady {
                payload,
                crc,
                persist,
            } => {
                if self.install_ruleset(payload, crc, persist).is_ok() {
                    self.send_status(now_ms, link);
                }
            }
            IngestEvent::WatchReady(payload) => match WatchDef::from_slice(&payload) {
                Ok(def) => self.telemetry.install_watch(&def),
                Err(e) => error!("LINK: watch set rejected: {}", e),
            },
            IngestEvent::FirmwareStarted => self.sync_bus(bus),
            IngestEvent::FirmwareEnded { processed } => {
                info!("OTA: stream complete, {} bytes queued", processed);
            }
        }
    }

    /// Apply a verified ruleset and optionally persist it.
    fn install_ruleset(&mut self, payload: Vec<u8>, crc: u32, persist: bool) -> Result<()> {
        if let Err(e) = apply_ruleset_text(&mut self.graph, &payload) {
            error!("RULES: ruleset rejected, previous rules kept: {}", e);
            return Err(e);
        }
        info!(
            "RULES: applied {} signals, {} nodes, {} flows",
            self.graph.signals().len(),
            self.graph.nodes().len(),
            self.graph.flows().len()
        );

        if persist {
            // Already running; a failed write only loses it on reboot.
            if let Err(e) = self.slots.persist(&payload) {
                error!("RULES: ruleset running from RAM, not persisted: {}", e);
            }
        } else {
            info!("RULES: applied to RAM only");
        }
        self.ruleset_crc = crc;
        self.ruleset_text = Some(payload);
        Ok(())
    }

    // ── Main-loop tick ────────────────────────────────────────

    /// One cooperative main-loop iteration.
    ///
    /// While an update owns the flag the bus stays halted and rules are
    /// not evaluated; only inbound packets keep flowing.
    pub fn tick<L, B>(&mut self, now_ms: u32, bus: &mut B, link: &mut L)
    where
        L: LinkPort + ?Sized,
        B: BusPort + ?Sized,
    {
        let connected = link.is_connected();
        if connected && !self.was_connected {
            info!("LINK: client connected");
            self.send_status(now_ms, link);
        } else if !connected && self.was_connected {
            info!("LINK: client disconnected");
        }
        self.was_connected = connected;

        self.sync_bus(bus);
        if self.bus_paused {
            return;
        }

        for _ in 0..self.config.max_frames_per_tick {
            let Some(frame) = bus.poll() else { break };
            self.graph.on_frame(frame.id, &frame.data, now_ms);
            self.telemetry.on_frame(frame.id, &frame.data, now_ms);
        }

        self.graph.evaluate(now_ms, &mut self.registry);

        if !connected {
            return;
        }

        let lines = self.telemetry.collect(
            &mut self.graph,
            now_ms,
            self.config.debug_interval_ms,
            self.config.max_debug_updates as usize,
        );
        for line in &lines {
            link.notify(line.as_bytes());
        }

        if now_ms.wrapping_sub(self.last_status_ms) >= self.config.status_interval_ms {
            self.send_status(now_ms, link);
        }
    }

    /// Follow the update flag: halt the bus when it rises, restart it when
    /// the worker clears it.
    fn sync_bus<B: BusPort + ?Sized>(&mut self, bus: &mut B) {
        let updating = self.ota.in_progress();
        if updating && !self.bus_paused {
            if let Err(e) = bus.stop() {
                warn!("CAN: stop failed: {}", e);
            }
            self.bus_paused = true;
            info!("CAN: halted for firmware update");
        } else if !updating && self.bus_paused {
            match bus.start() {
                Ok(()) => {
                    self.bus_paused = false;
                    info!("CAN: resumed");
                }
                Err(e) => warn!("CAN: restart failed: {}", e),
            }
        }
    }

    // ── Outbound documents ────────────────────────────────────

    pub fn runtime_mode(&self) -> RuntimeMode {
        if self.graph.signals().is_empty() {
            return RuntimeMode::Empty;
        }
        match (&self.ruleset_text, self.slots.active_payload()) {
            (Some(running), Some(stored)) if *running == stored => RuntimeMode::Nvs,
            _ => RuntimeMode::Ram,
        }
    }

    fn module_info(&self) -> ModuleInfo<'_> {
        ModuleInfo {
            id: self.module_id.as_str(),
            name: self.config.ble_name.as_deref().unwrap_or(self.module_id.as_str()),
            hw: &self.config.hw_model,
            fw: &self.config.fw_version,
            serial: self.config.serial.as_deref(),
        }
    }

    fn runtime(&self, now_ms: u32) -> Runtime {
        Runtime {
            uptime_ms: now_ms,
            boot_count: self.boot_count,
            mode: self.runtime_mode(),
        }
    }

    /// Push the status document on the status characteristic.
    pub fn send_status<L: LinkPort + ?Sized>(&mut self, now_ms: u32, link: &mut L) {
        self.last_status_ms = now_ms;
        let report = StatusReport::new(self.module_info(), self.runtime(now_ms), &self.graph);
        match report.to_json() {
            Ok(json) => {
                link.notify_status(&json);
            }
            Err(e) => warn!("LINK: {}", e),
        }
    }

    /// Stream the profile dump on the TX characteristic.
    pub fn send_profile<L, D>(&mut self, now_ms: u32, link: &mut L, delay: &mut D)
    where
        L: LinkPort + ?Sized,
        D: DelayNs,
    {
        let json = {
            let dump = ProfileDump::new(
                self.module_info(),
                self.runtime(now_ms),
                &self.graph,
                self.ruleset_text.as_deref(),
                self.ruleset_crc,
                link.is_connected(),
                link.mtu(),
                self.registry.metas(),
            );
            match dump.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!("LINK: {}", e);
                    return;
                }
            }
        };
        let (len, crc) = send_framed(
            link,
            delay,
            &json,
            self.config.chunk_size as usize,
            self.config.chunk_delay_ms,
        );
        info!("LINK: profile sent, {} bytes, CRC=0x{:08X}", len, crc);
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn graph(&self) -> &RuleGraph {
        &self.graph
    }

    pub fn telemetry(&self) -> &DebugTelemetry {
        &self.telemetry
    }

    pub fn registry_mut(&mut self) -> &mut CapabilityRegistry {
        &mut self.registry
    }

    pub fn slots(&self) -> &RulesetSlotManager<S> {
        &self.slots
    }

    pub fn ota(&self) -> &Arc<OtaShared> {
        &self.ota
    }

    pub fn ruleset_text(&self) -> Option<&[u8]> {
        self.ruleset_text.as_deref()
    }

    pub fn ruleset_crc(&self) -> u32 {
        self.ruleset_crc
    }

    pub fn boot_count(&self) -> u32 {
        self.boot_count
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn is_bus_paused(&self) -> bool {
        self.bus_paused
    }
}
