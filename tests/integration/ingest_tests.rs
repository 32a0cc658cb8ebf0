//! Control-channel uploads through the service: header, chunks, `END`,
//! verification, and what each verified upload changes.

use w4rp::app::slots::{BootRuleset, Slot};
use w4rp::link::ingest::StreamState;

use crate::mock_hw::{
    MemStore, MockBus, MockLink, NoDelay, rules_header, service, service_with, upload,
};

const RULES_V1: &str = r#"{"signals":[{"id":"speed","can_id":256,"len":8,"be":false}],
"nodes":[{"id":"c","config":{"signal_id":"speed","operation":">","value":10}}],
"flows":[{"id":"f","root":"c"}]}"#;

const RULES_V2: &str = r#"{"signals":[{"id":"rpm","can_id":300,"len":16,"be":false},{"id":"gear","can_id":301,"len":4,"be":false}],
"nodes":[{"id":"c","config":{"signal_id":"gear","operation":"==","value":3}}],
"flows":[{"id":"g","root":"c"}]}"#;

#[test]
fn ram_upload_installs_and_reports_status() {
    let mut svc = service();
    let (mut link, mut bus) = (MockLink::connected(), MockBus::default());

    let p = RULES_V1.as_bytes();
    upload(&mut svc, &rules_header("RAM", p), p, &mut link, &mut bus);

    assert_eq!(svc.graph().signals().len(), 1);
    assert_eq!(svc.ruleset_crc(), w4rp::link::crc32(p));
    assert_eq!(svc.slots().active_payload(), None, "RAM upload is not persisted");

    let status = link.last_status().expect("status after install");
    assert_eq!(status["module"], "W4RP-A1B2C3");
    assert_eq!(status["mode"], "ram");
    assert_eq!(status["rules"], 1);
    assert_eq!(status["signals"], 1);
    assert_eq!(status["ids"], 1);
}

#[test]
fn bad_crc_keeps_previous_ruleset() {
    let mut svc = service();
    let (mut link, mut bus) = (MockLink::connected(), MockBus::default());

    let p = RULES_V1.as_bytes();
    upload(&mut svc, &rules_header("RAM", p), p, &mut link, &mut bus);
    let statuses = link.status.len();

    let v2 = RULES_V2.as_bytes();
    let header = format!("SET:RULES:RAM:{}:{}", v2.len(), w4rp::link::crc32(v2) ^ 1);
    upload(&mut svc, &header, v2, &mut link, &mut bus);

    assert_eq!(svc.graph().signals()[0].id, "speed");
    assert_eq!(svc.ruleset_text(), Some(p));
    assert_eq!(link.status.len(), statuses, "no status for a rejected upload");
}

#[test]
fn short_upload_is_a_length_mismatch() {
    let mut svc = service();
    let (mut link, mut bus) = (MockLink::connected(), MockBus::default());

    let p = RULES_V1.as_bytes();
    let header = format!("SET:RULES:RAM:{}:{}", p.len() + 5, w4rp::link::crc32(p));
    upload(&mut svc, &header, p, &mut link, &mut bus);

    assert!(svc.graph().is_empty());
    assert!(svc.ruleset_text().is_none());
}

#[test]
fn invalid_json_with_good_crc_keeps_previous_ruleset() {
    let mut svc = service();
    let (mut link, mut bus) = (MockLink::connected(), MockBus::default());

    let p = RULES_V1.as_bytes();
    upload(&mut svc, &rules_header("NVS", p), p, &mut link, &mut bus);

    let junk = br#"{"signals":[{"id":"x"}],"nodes":[]}"#;
    upload(&mut svc, &rules_header("NVS", junk), junk, &mut link, &mut bus);

    assert_eq!(svc.graph().signals().len(), 1);
    assert_eq!(svc.slots().active_payload().as_deref(), Some(p));
}

#[test]
fn nvs_uploads_alternate_slots_and_survive_reboot() {
    let mut svc = service();
    let (mut link, mut bus) = (MockLink::connected(), MockBus::default());

    let v1 = RULES_V1.as_bytes();
    upload(&mut svc, &rules_header("NVS", v1), v1, &mut link, &mut bus);
    assert_eq!(svc.slots().active_slot(), Slot::B);
    assert_eq!(link.last_status().unwrap()["mode"], "nvs");

    let v2 = RULES_V2.as_bytes();
    upload(&mut svc, &rules_header("NVS", v2), v2, &mut link, &mut bus);
    assert_eq!(svc.slots().active_slot(), Slot::A);
    assert_eq!(svc.slots().active_payload().as_deref(), Some(v2));

    // RAM on top: the running set no longer matches storage
    upload(&mut svc, &rules_header("RAM", v1), v1, &mut link, &mut bus);
    assert_eq!(link.last_status().unwrap()["mode"], "ram");

    let store = svc.slots().store().clone();
    let mut rebooted = service_with(store);
    assert_eq!(rebooted.boot(), BootRuleset::Active(v2.to_vec()));
    assert_eq!(rebooted.graph().signals().len(), 2);
    assert_eq!(rebooted.boot_count(), 1);
    assert_eq!(rebooted.ruleset_crc(), w4rp::link::crc32(v2));
}

#[test]
fn corrupt_slot_falls_back_to_backup() {
    let mut store = MemStore::default();
    {
        let mut first = service_with(store.clone());
        let (mut link, mut bus) = (MockLink::connected(), MockBus::default());
        let v1 = RULES_V1.as_bytes();
        upload(&mut first, &rules_header("NVS", v1), v1, &mut link, &mut bus);
        // boot once so the good set is copied to the backup key
        let mut second = service_with(first.slots().store().clone());
        assert!(matches!(second.boot(), BootRuleset::Active(_)));
        store = second.slots().store().clone();
    }
    store
        .values
        .insert("w4rp/rules_B".into(), b"{not json".to_vec());

    let mut svc = service_with(store);
    assert_eq!(svc.boot(), BootRuleset::Backup(RULES_V1.as_bytes().to_vec()));
    assert_eq!(svc.graph().signals().len(), 1);
    assert_eq!(svc.boot_count(), 2);
    assert_eq!(
        svc.slots().active_payload().as_deref(),
        Some(RULES_V1.as_bytes()),
        "backup restored into the active slot"
    );
}

#[test]
fn failed_pointer_write_keeps_ruleset_in_ram() {
    let store = MemStore {
        failing: vec!["active_slot".into()],
        ..Default::default()
    };
    let mut svc = service_with(store);
    let (mut link, mut bus) = (MockLink::connected(), MockBus::default());

    let v1 = RULES_V1.as_bytes();
    upload(&mut svc, &rules_header("NVS", v1), v1, &mut link, &mut bus);

    assert_eq!(svc.graph().signals().len(), 1, "ruleset still applied");
    assert_eq!(svc.slots().active_slot(), Slot::A);
    assert!(svc.slots().active_payload().is_none());
    assert_eq!(
        svc.slots().store().values.get("w4rp/rules_B").map(Vec::as_slice),
        Some(v1)
    );
    assert_eq!(link.last_status().unwrap()["mode"], "ram");
}

#[test]
fn empty_store_boots_empty() {
    let mut svc = service();
    assert_eq!(svc.boot(), BootRuleset::Empty);
    let mut link = MockLink::connected();
    svc.send_status(0, &mut link);
    assert_eq!(link.last_status().unwrap()["mode"], "empty");
}

#[test]
fn debug_watch_replaces_rule_telemetry() {
    let mut svc = service();
    let (mut link, mut bus) = (MockLink::connected(), MockBus::default());
    let mut delay = NoDelay;

    let p = RULES_V1.as_bytes();
    upload(&mut svc, &rules_header("RAM", p), p, &mut link, &mut bus);

    let watch = br#"{"signals":[{"name":"coolant","can_id":1024,"start":0,"length":8,"factor":1.0,"offset":-40}]}"#;
    let header = format!("DEBUG:WATCH:{}:{}", watch.len(), w4rp::link::crc32(watch));
    upload(&mut svc, &header, watch, &mut link, &mut bus);
    assert!(svc.telemetry().is_enabled());
    assert_eq!(svc.telemetry().watch().len(), 1);

    link.tx.clear();
    bus.inject(256, &[50]);
    bus.inject(1024, &[130]);
    svc.tick(100, &mut bus, &mut link);

    let lines = link.tx_text();
    assert_eq!(lines, vec!["D:S:coolant:90.00".to_string()]);

    svc.handle_packet(b"DEBUG:STOP", 200, &mut link, &mut bus, &mut delay);
    assert!(!svc.telemetry().is_enabled());
    assert!(svc.telemetry().watch().is_empty());
}

#[test]
fn debug_start_reports_rule_signals_and_nodes() {
    let mut svc = service();
    let (mut link, mut bus) = (MockLink::connected(), MockBus::default());
    let mut delay = NoDelay;

    let p = RULES_V1.as_bytes();
    upload(&mut svc, &rules_header("RAM", p), p, &mut link, &mut bus);
    svc.handle_packet(b"DEBUG:START", 0, &mut link, &mut bus, &mut delay);

    link.tx.clear();
    bus.inject(256, &[42]);
    svc.tick(10, &mut bus, &mut link);
    let lines = link.tx_text();
    assert!(lines.contains(&"D:S:speed:42.00".to_string()), "{lines:?}");
    assert!(lines.iter().any(|l| l.starts_with("D:N:c:")), "{lines:?}");

    // unchanged values are not repeated
    link.tx.clear();
    svc.tick(1000, &mut bus, &mut link);
    assert!(link.tx_text().iter().all(|l| !l.starts_with("D:S:")));
}

#[test]
fn new_header_abandons_open_upload() {
    let mut svc = service();
    let (mut link, mut bus) = (MockLink::connected(), MockBus::default());
    let mut delay = NoDelay;

    let p = RULES_V1.as_bytes();
    svc.handle_packet(rules_header("RAM", p).as_bytes(), 0, &mut link, &mut bus, &mut delay);
    svc.handle_packet(&p[..10], 0, &mut link, &mut bus, &mut delay);

    // restart from scratch; the first ten bytes must not leak in
    upload(&mut svc, &rules_header("RAM", p), p, &mut link, &mut bus);
    assert_eq!(svc.ruleset_text(), Some(p));
}

#[test]
fn stray_packets_are_ignored() {
    let mut svc = service();
    let (mut link, mut bus) = (MockLink::connected(), MockBus::default());
    let mut delay = NoDelay;

    for packet in [&b"END"[..], b"hello", b"RESET:BLE", b"SET:RULES:RAM:abc:1", b""] {
        svc.handle_packet(packet, 0, &mut link, &mut bus, &mut delay);
    }
    assert!(svc.graph().is_empty());
    assert!(link.tx.is_empty());
}

#[test]
fn connect_edge_pushes_status() {
    let mut svc = service();
    let mut bus = MockBus::default();
    let mut link = MockLink {
        connected: false,
        ..MockLink::connected()
    };

    svc.tick(0, &mut bus, &mut link);
    assert!(link.status.is_empty());

    link.connected = true;
    svc.tick(10, &mut bus, &mut link);
    assert_eq!(link.status.len(), 1);

    // periodic
    svc.tick(4000, &mut bus, &mut link);
    assert_eq!(link.status.len(), 1);
    svc.tick(5010, &mut bus, &mut link);
    assert_eq!(link.status.len(), 2);
}

#[test]
fn ingest_returns_to_idle_after_end() {
    use std::sync::Arc;
    use w4rp::link::ingest::{IngestEvent, StreamIngest};
    use w4rp::ota::OtaShared;

    let ota = Arc::new(OtaShared::new(256));
    let mut ingest = StreamIngest::new();
    let p = RULES_V1.as_bytes();

    ingest.handle(rules_header("RAM", p).as_bytes(), &ota);
    assert!(matches!(ingest.state(), StreamState::Receiving { .. }));
    ingest.handle(p, &ota);
    let ev = ingest.handle(b"END", &ota);
    assert!(matches!(ev, IngestEvent::RulesReady { persist: false, .. }));
    assert_eq!(*ingest.state(), StreamState::Idle);
}
