//! Profile dump and status report documents.
//!
//! Both are borrowed views serialized with `serde_json` right before they
//! go out on the link; nothing here owns state.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::app::capabilities::CapabilityMeta;
use crate::config::{MAX_FLOWS, MAX_NODES, MAX_SIGNALS};
use crate::error::{Error, Result};
use crate::rules::RuleGraph;

/// Where the running ruleset came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    /// No ruleset loaded.
    Empty,
    /// Running text equals the active persisted slot.
    Nvs,
    /// Loaded but not persisted.
    Ram,
}

/// Identity fields shared by the profile and the status report.
#[derive(Debug, Clone, Copy)]
pub struct ModuleInfo<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub hw: &'a str,
    pub fw: &'a str,
    pub serial: Option<&'a str>,
}

/// Runtime counters shared by the profile and the status report.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Runtime {
    pub uptime_ms: u32,
    pub boot_count: u32,
    pub mode: RuntimeMode,
}

// ── Profile ────────────────────────────────────────────────────

#[derive(Serialize)]
struct ModuleSection<'a> {
    id: &'a str,
    hw: &'a str,
    fw: &'a str,
    serial: Option<&'a str>,
}

#[derive(Serialize)]
struct RulesSection<'a> {
    dialect: &'a str,
    crc32: u32,
    last_update: &'a str,
    data: Option<serde_json::Value>,
}

#[derive(Serialize)]
struct BleSection {
    connected: bool,
    mtu: u16,
}

#[derive(Serialize)]
struct Limits {
    max_signals: usize,
    max_nodes: usize,
    max_flows: usize,
}

/// Full self-description returned for `GET:PROFILE`.
#[derive(Serialize)]
pub struct ProfileDump<'a> {
    module: ModuleSection<'a>,
    runtime: Runtime,
    rules: RulesSection<'a>,
    ble: BleSection,
    limits: Limits,
    capabilities: BTreeMap<&'a str, &'a CapabilityMeta>,
}

impl<'a> ProfileDump<'a> {
    /// `ruleset_text` is the last applied ruleset document; it is embedded
    /// as `rules.data` when it still parses.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        module: ModuleInfo<'a>,
        runtime: Runtime,
        graph: &'a RuleGraph,
        ruleset_text: Option<&[u8]>,
        ruleset_crc: u32,
        connected: bool,
        mtu: u16,
        capabilities: impl IntoIterator<Item = &'a CapabilityMeta>,
    ) -> Self {
        Self {
            module: ModuleSection {
                id: module.id,
                hw: module.hw,
                fw: module.fw,
                serial: module.serial,
            },
            runtime,
            rules: RulesSection {
                dialect: graph.dialect(),
                crc32: ruleset_crc,
                last_update: graph.last_update(),
                data: ruleset_text.and_then(|t| serde_json::from_slice(t).ok()),
            },
            ble: BleSection { connected, mtu },
            limits: Limits {
                max_signals: MAX_SIGNALS,
                max_nodes: MAX_NODES,
                max_flows: MAX_FLOWS,
            },
            capabilities: capabilities
                .into_iter()
                .map(|m| (m.id.as_str(), m))
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|_| Error::Parse("profile encode"))
    }
}

// ── Status ─────────────────────────────────────────────────────

/// Periodic status document for the status characteristic.
#[derive(Serialize)]
pub struct StatusReport<'a> {
    module: &'a str,
    name: &'a str,
    hw: &'a str,
    fw: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    serial: Option<&'a str>,
    uptime_ms: u32,
    boot_count: u32,
    mode: RuntimeMode,
    rules: usize,
    signals: usize,
    ids: usize,
}

impl<'a> StatusReport<'a> {
    pub fn new(module: ModuleInfo<'a>, runtime: Runtime, graph: &RuleGraph) -> Self {
        Self {
            module: module.id,
            name: module.name,
            hw: module.hw,
            fw: module.fw,
            serial: module.serial,
            uptime_ms: runtime.uptime_ms,
            boot_count: runtime.boot_count,
            mode: runtime.mode,
            rules: graph.flows().len(),
            signals: graph.signals().len(),
            ids: graph.distinct_can_ids(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|_| Error::Parse("status encode"))
    }
}
