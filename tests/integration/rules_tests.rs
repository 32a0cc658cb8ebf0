//! Rule evaluation end to end: frames in through the bus port, capability
//! invocations out through the registry.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use w4rp::rules::model::Params;

use crate::mock_hw::{MockBus, MockLink, NoDelay, TestService, rules_header, service, upload};

const HOLD: &str = r#"{
    "signals": [{"id":"brake","can_id":512,"start":0,"len":8,"be":false}],
    "nodes": [
        {"id":"held","config":{"signal_id":"brake","operation":"hold","value":500},"wires":["act"]},
        {"id":"act","type":"action","config":{"capability_id":"count"}}
    ],
    "flows": [{"id":"brake_hold","root":"held"}]
}"#;

const SPEED: &str = r#"{
    "dialect": "w4rp-1",
    "meta": {"updated_at": "2026-03-01T10:00:00Z"},
    "signals": [
        {"id":"speed","can_id":256,"start":0,"len":8,"be":false,"min":0,"max":250},
        {"id":"rpm","can_id":256,"start":8,"len":16,"be":false,"factor":0.25}
    ],
    "nodes": [
        {"id":"fast","config":{"signal_id":"speed","operation":">","value":100},"wires":["act"]},
        {"id":"act","type":"action","config":{"capability_id":"count","params":[{"key":"level","value":"2"}]}}
    ],
    "flows": [{"id":"overspeed","root":["fast"],"debounce_ms":200,"cooldown_ms":1000}]
}"#;

fn disconnected() -> MockLink {
    MockLink {
        connected: false,
        ..MockLink::connected()
    }
}

/// Service with `ruleset` installed to RAM and a counting `count` capability.
fn installed(ruleset: &str) -> (TestService, Arc<AtomicU32>, MockBus, MockLink) {
    let mut svc = service();
    let hits = Arc::new(AtomicU32::new(0));
    let h = hits.clone();
    svc.registry_mut().register("count", move |_: &Params| {
        h.fetch_add(1, Ordering::Relaxed);
    });

    let mut bus = MockBus::default();
    let mut link = disconnected();
    let payload = ruleset.as_bytes();
    upload(&mut svc, &rules_header("RAM", payload), payload, &mut link, &mut bus);
    assert!(!svc.graph().is_empty(), "ruleset should be installed");
    (svc, hits, bus, link)
}

#[test]
fn hold_fires_after_continuous_nonzero() {
    let (mut svc, hits, mut bus, mut link) = installed(HOLD);

    bus.inject(512, &[1]);
    svc.tick(0, &mut bus, &mut link);
    svc.tick(499, &mut bus, &mut link);
    assert_eq!(hits.load(Ordering::Relaxed), 0);

    svc.tick(500, &mut bus, &mut link);
    assert_eq!(hits.load(Ordering::Relaxed), 1);

    // released: the timer restarts from the next non-zero sample
    bus.inject(512, &[0]);
    svc.tick(600, &mut bus, &mut link);
    bus.inject(512, &[3]);
    svc.tick(700, &mut bus, &mut link);
    svc.tick(1199, &mut bus, &mut link);
    assert_eq!(hits.load(Ordering::Relaxed), 1);

    svc.tick(1200, &mut bus, &mut link);
    assert_eq!(hits.load(Ordering::Relaxed), 2);
}

#[test]
fn debounce_then_cooldown() {
    let (mut svc, hits, mut bus, mut link) = installed(SPEED);

    bus.inject(256, &[150, 0, 0]);
    svc.tick(0, &mut bus, &mut link);
    svc.tick(199, &mut bus, &mut link);
    assert_eq!(hits.load(Ordering::Relaxed), 0, "debounce holds the trigger");

    svc.tick(200, &mut bus, &mut link);
    assert_eq!(hits.load(Ordering::Relaxed), 1);

    svc.tick(500, &mut bus, &mut link);
    assert_eq!(hits.load(Ordering::Relaxed), 1, "cooldown holds the repeat");

    svc.tick(1200, &mut bus, &mut link);
    assert_eq!(hits.load(Ordering::Relaxed), 2);

    // drop below threshold, come back: debounce restarts
    bus.inject(256, &[50, 0, 0]);
    svc.tick(1300, &mut bus, &mut link);
    bus.inject(256, &[180, 0, 0]);
    svc.tick(2250, &mut bus, &mut link);
    svc.tick(2300, &mut bus, &mut link);
    assert_eq!(hits.load(Ordering::Relaxed), 2);
    svc.tick(2450, &mut bus, &mut link);
    assert_eq!(hits.load(Ordering::Relaxed), 3);
    assert_eq!(svc.graph().flows_triggered(), 3);
}

#[test]
fn cooldown_counts_from_the_debounced_trigger() {
    let (mut svc, hits, mut bus, mut link) = installed(SPEED);

    svc.tick(0, &mut bus, &mut link);
    bus.inject(256, &[150, 0, 0]);
    svc.tick(50, &mut bus, &mut link);
    svc.tick(249, &mut bus, &mut link);
    assert_eq!(hits.load(Ordering::Relaxed), 0);

    svc.tick(250, &mut bus, &mut link);
    assert_eq!(hits.load(Ordering::Relaxed), 1);

    svc.tick(1249, &mut bus, &mut link);
    assert_eq!(hits.load(Ordering::Relaxed), 1, "still cooling down");

    svc.tick(1250, &mut bus, &mut link);
    assert_eq!(hits.load(Ordering::Relaxed), 2);
}

#[test]
fn shared_can_id_decodes_every_signal() {
    let (mut svc, _hits, mut bus, mut link) = installed(SPEED);

    // rpm: 0x0FA0 little-endian = 4000 raw, x0.25
    bus.inject(256, &[10, 0xA0, 0x0F]);
    svc.tick(0, &mut bus, &mut link);

    let g = svc.graph();
    let speed = &g.signals()[g.signal_index("speed").unwrap()];
    let rpm = &g.signals()[g.signal_index("rpm").unwrap()];
    assert!((speed.value - 10.0).abs() < 1e-3);
    assert!((rpm.value - 1000.0).abs() < 1e-3);
    assert_eq!(g.frames_received(), 1);
}

#[test]
fn unknown_capability_does_not_stop_traversal() {
    let ruleset = r#"{
        "signals": [{"id":"s","can_id":1,"len":8,"be":false}],
        "nodes": [
            {"id":"c","config":{"signal_id":"s","operation":"==","value":7},"wires":["ghost","act"]},
            {"id":"ghost","type":"action","config":{"capability_id":"not_registered"}},
            {"id":"act","type":"action","config":{"capability_id":"count"}}
        ],
        "flows": [{"id":"f","root":"c"}]
    }"#;
    let (mut svc, hits, mut bus, mut link) = installed(ruleset);

    bus.inject(1, &[7]);
    svc.tick(0, &mut bus, &mut link);
    assert_eq!(hits.load(Ordering::Relaxed), 1);
}

#[test]
fn profile_round_trip_reproduces_ruleset() {
    let (mut svc, _hits, mut bus, _) = installed(SPEED);
    let mut link = MockLink::connected();
    let mut delay = NoDelay;

    svc.handle_packet(b"GET:PROFILE", 1000, &mut link, &mut bus, &mut delay);

    let tx = link.tx_text();
    assert_eq!(tx.first().map(String::as_str), Some("BEGIN"));
    let footer = tx.last().unwrap().clone();
    let body: Vec<u8> = link.tx[1..link.tx.len() - 1].concat();
    assert_eq!(
        footer,
        format!("END:{}:{}", body.len(), w4rp::link::crc32(&body))
    );

    let profile: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(profile["module"]["id"], "W4RP-A1B2C3");
    assert_eq!(profile["runtime"]["mode"], "ram");
    assert_eq!(profile["rules"]["dialect"], "w4rp-1");
    assert_eq!(profile["rules"]["last_update"], "2026-03-01T10:00:00Z");
    assert_eq!(profile["rules"]["crc32"], w4rp::link::crc32(SPEED.as_bytes()));
    assert_eq!(profile["ble"]["mtu"], 247);
    assert!(profile["capabilities"]["log"].is_object());

    // feed the embedded ruleset to a second module
    let data = serde_json::to_vec(&profile["rules"]["data"]).unwrap();
    let (mut copy, copy_hits, mut copy_bus, mut copy_link) =
        installed(std::str::from_utf8(&data).unwrap());
    let (mut svc, hits, mut bus, mut link) = installed(SPEED);

    let frames: [(u32, [u8; 3]); 4] = [
        (0, [150, 0xA0, 0x0F]),
        (250, [151, 0x10, 0x27]),
        (400, [20, 0x01, 0x00]),
        (1500, [220, 0xFF, 0xFF]),
    ];
    for (t, data) in frames {
        bus.inject(256, &data);
        copy_bus.inject(256, &data);
        svc.tick(t, &mut bus, &mut link);
        copy.tick(t, &mut copy_bus, &mut copy_link);

        let (a, b) = (svc.graph(), copy.graph());
        for (x, y) in a.signals().iter().zip(b.signals()) {
            assert_eq!(x.value.to_bits(), y.value.to_bits(), "{} at t={t}", x.id);
        }
        for (x, y) in a.nodes().iter().zip(b.nodes()) {
            assert_eq!(x.last_result, y.last_result, "{} at t={t}", x.id);
        }
        assert_eq!(
            hits.load(Ordering::Relaxed),
            copy_hits.load(Ordering::Relaxed)
        );
    }
    assert!(hits.load(Ordering::Relaxed) > 0);

    let (a, b) = (svc.graph(), copy.graph());
    assert_eq!(a.signals().len(), b.signals().len());
    assert_eq!(a.nodes().len(), b.nodes().len());
    assert_eq!(a.flows().len(), b.flows().len());
    for (x, y) in a.signals().iter().zip(b.signals()) {
        assert_eq!(x.id, y.id);
        assert_eq!((x.can_id, x.start_bit, x.bit_length), (y.can_id, y.start_bit, y.bit_length));
        assert!((x.factor - y.factor).abs() < f32::EPSILON);
    }
    assert_eq!(a.flows()[0].debounce_ms, b.flows()[0].debounce_ms);
    assert_eq!(a.flows()[0].cooldown_ms, b.flows()[0].cooldown_ms);
}
