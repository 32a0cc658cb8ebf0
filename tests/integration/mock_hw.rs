//! Mock adapters for integration tests.
//!
//! Every port records what it was asked to do so tests can assert on the
//! full history without a radio, a bus controller or flash.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use embedded_hal::delay::DelayNs;
use w4rp::app::capabilities::CapabilityRegistry;
use w4rp::app::ports::{BusPort, CanFrame, LinkPort, StorageError, StoragePort};
use w4rp::app::service::BridgeService;
use w4rp::app::slots::RulesetSlotManager;
use w4rp::config::ModuleConfig;
use w4rp::ota::OtaShared;

// ── Link ──────────────────────────────────────────────────────

pub struct MockLink {
    pub connected: bool,
    pub mtu: u16,
    pub tx: Vec<Vec<u8>>,
    pub status: Vec<Vec<u8>>,
}

#[allow(dead_code)]
impl MockLink {
    pub fn connected() -> Self {
        Self {
            connected: true,
            mtu: 247,
            tx: Vec::new(),
            status: Vec::new(),
        }
    }

    /// TX notifications as UTF-8 text.
    pub fn tx_text(&self) -> Vec<String> {
        self.tx
            .iter()
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .collect()
    }

    pub fn last_status(&self) -> Option<serde_json::Value> {
        self.status
            .last()
            .and_then(|s| serde_json::from_slice(s).ok())
    }
}

impl LinkPort for MockLink {
    fn notify(&mut self, data: &[u8]) -> bool {
        if !self.connected {
            return false;
        }
        self.tx.push(data.to_vec());
        true
    }

    fn notify_status(&mut self, data: &[u8]) -> bool {
        if !self.connected {
            return false;
        }
        self.status.push(data.to_vec());
        true
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn mtu(&self) -> u16 {
        self.mtu
    }
}

// ── Bus ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockBus {
    pub frames: VecDeque<CanFrame>,
    pub starts: u32,
    pub stops: u32,
}

#[allow(dead_code)]
impl MockBus {
    pub fn inject(&mut self, id: u32, payload: &[u8]) {
        self.frames.push_back(CanFrame::new(id, payload));
    }
}

impl BusPort for MockBus {
    fn poll(&mut self) -> Option<CanFrame> {
        self.frames.pop_front()
    }

    fn start(&mut self) -> w4rp::Result<()> {
        self.starts += 1;
        Ok(())
    }

    fn stop(&mut self) -> w4rp::Result<()> {
        self.stops += 1;
        Ok(())
    }
}

// ── Storage ───────────────────────────────────────────────────

#[derive(Default, Clone)]
pub struct MemStore {
    pub values: HashMap<String, Vec<u8>>,
    pub writes: u32,
    /// Keys whose writes fail with an I/O error.
    pub failing: Vec<String>,
}

impl StoragePort for MemStore {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        let v = self
            .values
            .get(&format!("{namespace}/{key}"))
            .ok_or(StorageError::NotFound)?;
        if v.len() > buf.len() {
            return Err(StorageError::TooLarge);
        }
        buf[..v.len()].copy_from_slice(v);
        Ok(v.len())
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        self.writes += 1;
        if self.failing.iter().any(|k| k == key) {
            return Err(StorageError::IoError);
        }
        self.values.insert(format!("{namespace}/{key}"), data.to_vec());
        Ok(())
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        self.values.remove(&format!("{namespace}/{key}"));
        Ok(())
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        self.values.contains_key(&format!("{namespace}/{key}"))
    }
}

// ── Time ──────────────────────────────────────────────────────

/// Delay that returns immediately.
#[derive(Clone, Copy, Default)]
pub struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

// ── Service fixture ───────────────────────────────────────────

pub type TestService = BridgeService<MemStore>;

#[allow(dead_code)]
pub fn service_with(store: MemStore) -> TestService {
    let config = ModuleConfig::default();
    let ota = Arc::new(OtaShared::new(config.ring_capacity as usize));
    BridgeService::new(
        config,
        "W4RP-A1B2C3",
        RulesetSlotManager::new(store),
        CapabilityRegistry::with_builtins(),
        ota,
    )
}

#[allow(dead_code)]
pub fn service() -> TestService {
    service_with(MemStore::default())
}

/// Header, payload in 20-byte packets, then `END`.
#[allow(dead_code)]
pub fn upload(
    svc: &mut TestService,
    header: &str,
    payload: &[u8],
    link: &mut MockLink,
    bus: &mut MockBus,
) {
    let mut delay = NoDelay;
    svc.handle_packet(header.as_bytes(), 0, link, bus, &mut delay);
    for chunk in payload.chunks(20) {
        svc.handle_packet(chunk, 0, link, bus, &mut delay);
    }
    svc.handle_packet(b"END", 0, link, bus, &mut delay);
}

/// `SET:RULES:<mode>:<len>:<crc>` for `payload`.
#[allow(dead_code)]
pub fn rules_header(mode: &str, payload: &[u8]) -> String {
    format!(
        "SET:RULES:{mode}:{}:{}",
        payload.len(),
        w4rp::link::crc32(payload)
    )
}
