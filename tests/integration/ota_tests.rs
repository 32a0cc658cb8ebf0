//! Delta update pipeline: header and chunks through the service, the
//! ring into the patch worker, and the bus halted for the duration.

use std::cell::Cell;
use std::sync::Arc;

use w4rp::adapters::flash::OtaPartitions;
use w4rp::adapters::time::{Esp32TimeAdapter, TaskDelay};
use w4rp::app::ports::Clock;
use w4rp::ota::executor::UpdateOutcome;
use w4rp::ota::jdiff::{EQL, ESC, INS, MOD};
use w4rp::ota::{JojoPatch, OtaShared, PatchExecutor};

use crate::mock_hw::{MockBus, MockLink, NoDelay, TestService, service};

const PAGE: u32 = 16;

/// Advances on every read so stalled waits run into their timeout.
#[derive(Default)]
struct TickingClock(Cell<u32>);

impl Clock for TickingClock {
    fn now_ms(&self) -> u32 {
        let t = self.0.get();
        self.0.set(t + 50);
        t
    }
}

fn running_image() -> Vec<u8> {
    (0..3000u32).map(|i| (i % 251) as u8).collect()
}

/// Copy 1000, overwrite 4, insert a 40-byte banner, copy the rest.
fn patch_and_target(source: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let banner: Vec<u8> = (0..40u8).map(|i| b'a' + i % 26).collect();
    let rest = (source.len() - 1004) as u16;

    let mut patch = vec![ESC, EQL, 253, 0x03, 0xE8];
    patch.extend([ESC, MOD, b'N', b'E', b'W', b'!']);
    patch.extend([ESC, INS]);
    patch.extend(&banner);
    patch.extend([ESC, EQL, 253]);
    patch.extend(rest.to_be_bytes());

    let mut target = source[..1000].to_vec();
    target.extend(b"NEW!");
    target.extend(&banner);
    target.extend(&source[1004..]);
    (patch, target)
}

fn stream(svc: &mut TestService, patch: &[u8], end: bool, bus: &mut MockBus) {
    let mut link = MockLink::connected();
    let mut delay = NoDelay;
    let header = format!(
        "OTA:BEGIN:{}:{}:c2lnbmF0dXJl",
        patch.len(),
        w4rp::link::crc32(patch)
    );
    svc.handle_packet(header.as_bytes(), 0, &mut link, bus, &mut delay);
    for chunk in patch.chunks(20) {
        svc.handle_packet(chunk, 0, &mut link, bus, &mut delay);
    }
    if end {
        svc.handle_packet(b"END", 0, &mut link, bus, &mut delay);
    }
}

fn worker<C: Clock>(
    partitions: OtaPartitions,
    shared: Arc<OtaShared>,
    clock: C,
) -> PatchExecutor<OtaPartitions, JojoPatch, C, NoDelay> {
    PatchExecutor::new(
        partitions,
        JojoPatch::new(PAGE as usize),
        shared,
        clock,
        NoDelay,
        PAGE,
        1000,
        10,
    )
}

#[test]
fn delta_update_produces_new_boot_image() {
    let source = running_image();
    let (patch, target) = patch_and_target(&source);
    let mut svc = service();
    let mut bus = MockBus::default();

    stream(&mut svc, &patch, true, &mut bus);
    assert!(svc.ota().in_progress());
    assert!(svc.is_bus_paused());
    assert_eq!(bus.stops, 1);

    let mut exec = worker(
        OtaPartitions::with_running_image(&source),
        svc.ota().clone(),
        TickingClock::default(),
    );
    assert_eq!(exec.poll_once(), Some(UpdateOutcome::Restarting));

    let sim = exec.partitions().sim();
    assert_eq!(sim.boot_image.as_deref(), Some(target.as_slice()));
    assert_eq!(sim.restarts, 1);
    assert_eq!(sim.aborts, 0);
    // restart pending: the flag stays up so the bus stays down
    assert!(svc.ota().in_progress());
}

#[test]
fn failed_patch_aborts_and_resumes_bus() {
    let source = running_image();
    let mut svc = service();
    let mut bus = MockBus::default();
    let mut link = MockLink::connected();

    // EQL past the end of the running image
    stream(&mut svc, &[ESC, EQL, 254, 0, 1, 0, 0], true, &mut bus);

    bus.inject(256, &[1]);
    svc.tick(10, &mut bus, &mut link);
    assert_eq!(bus.frames.len(), 1, "no frames drained during an update");

    let mut exec = worker(
        OtaPartitions::with_running_image(&source),
        svc.ota().clone(),
        TickingClock::default(),
    );
    assert_eq!(exec.poll_once(), Some(UpdateOutcome::Aborted));
    assert_eq!(exec.partitions().sim().aborts, 1);
    assert!(exec.partitions().sim().boot_image.is_none());
    assert!(!svc.ota().in_progress());

    svc.tick(20, &mut bus, &mut link);
    assert_eq!(bus.starts, 1);
    assert!(!svc.is_bus_paused());
    assert!(bus.frames.is_empty());
    assert_eq!(svc.graph().frames_received(), 1);
}

#[test]
fn rejected_image_leaves_running_image_bootable() {
    let source = running_image();
    let (patch, _) = patch_and_target(&source);
    let mut svc = service();
    let mut bus = MockBus::default();
    stream(&mut svc, &patch, true, &mut bus);

    let mut partitions = OtaPartitions::with_running_image(&source);
    partitions.sim_mut().reject_image = true;
    let mut exec = worker(partitions, svc.ota().clone(), TickingClock::default());

    assert_eq!(exec.poll_once(), Some(UpdateOutcome::Aborted));
    assert!(exec.partitions().sim().boot_image.is_none());
    assert_eq!(exec.partitions().sim().restarts, 0);
    assert!(!svc.ota().in_progress());
}

#[test]
fn stalled_stream_times_out() {
    let source = running_image();
    let (patch, _) = patch_and_target(&source);
    let mut svc = service();
    let mut bus = MockBus::default();

    // no END: the ring stays open and runs dry mid-patch
    stream(&mut svc, &patch[..30], false, &mut bus);

    let mut exec = worker(
        OtaPartitions::with_running_image(&source),
        svc.ota().clone(),
        TickingClock::default(),
    );
    assert_eq!(exec.poll_once(), Some(UpdateOutcome::Aborted));
    assert_eq!(exec.partitions().sim().aborts, 1);
    assert!(!svc.ota().in_progress());
}

#[test]
fn second_start_is_refused_while_updating() {
    let source = running_image();
    let (patch, _) = patch_and_target(&source);
    let mut svc = service();
    let mut bus = MockBus::default();

    stream(&mut svc, &patch, true, &mut bus);
    let queued = svc.ota().ring.len();

    let mut link = MockLink::connected();
    svc.handle_packet(b"OTA:START:DELTA:10:0", 0, &mut link, &mut bus, &mut NoDelay);
    svc.handle_packet(b"0123456789", 0, &mut link, &mut bus, &mut NoDelay);

    assert_eq!(svc.ota().ring.len(), queued, "ring untouched by the refused start");
    assert_eq!(bus.stops, 1);
}

#[test]
fn other_upload_mid_stream_cancels_update() {
    let source = running_image();
    let (patch, _) = patch_and_target(&source);
    let mut svc = service();
    let mut bus = MockBus::default();
    let mut link = MockLink::connected();

    // only the first opcode arrives, then a ruleset header takes over
    let header = format!("OTA:BEGIN:{}:{}", patch.len(), w4rp::link::crc32(&patch));
    svc.handle_packet(header.as_bytes(), 0, &mut link, &mut bus, &mut NoDelay);
    svc.handle_packet(&patch[..5], 0, &mut link, &mut bus, &mut NoDelay);
    svc.handle_packet(b"SET:RULES:RAM:4:1", 0, &mut link, &mut bus, &mut NoDelay);
    assert!(svc.ota().is_cancelled());

    let mut exec = worker(
        OtaPartitions::with_running_image(&source),
        svc.ota().clone(),
        TickingClock::default(),
    );
    assert_eq!(exec.poll_once(), Some(UpdateOutcome::Aborted));
    let sim = exec.partitions().sim();
    assert!(sim.boot_image.is_none());
    assert_eq!(sim.restarts, 0);
    assert_eq!(sim.aborts, 1);
    assert!(!svc.ota().in_progress());

    svc.tick(10, &mut bus, &mut link);
    assert_eq!(bus.starts, 1);
}

#[test]
fn stream_shorter_than_declared_is_not_finalized() {
    let source = running_image();
    let (patch, _) = patch_and_target(&source);
    let mut svc = service();
    let mut bus = MockBus::default();
    let mut link = MockLink::connected();

    // END after a complete first opcode; the header promised the whole patch
    let header = format!("OTA:BEGIN:{}:{}", patch.len(), w4rp::link::crc32(&patch));
    svc.handle_packet(header.as_bytes(), 0, &mut link, &mut bus, &mut NoDelay);
    svc.handle_packet(&patch[..5], 0, &mut link, &mut bus, &mut NoDelay);
    svc.handle_packet(b"END", 0, &mut link, &mut bus, &mut NoDelay);
    assert!(!svc.ota().is_cancelled());
    assert_eq!(svc.ota().processed(), 5);

    let mut exec = worker(
        OtaPartitions::with_running_image(&source),
        svc.ota().clone(),
        TickingClock::default(),
    );
    assert_eq!(exec.poll_once(), Some(UpdateOutcome::Aborted));
    assert!(exec.partitions().sim().boot_image.is_none());
    assert_eq!(exec.partitions().sim().restarts, 0);
}

#[test]
fn refused_start_mid_stream_keeps_session() {
    let source = running_image();
    let (patch, target) = patch_and_target(&source);
    let mut svc = service();
    let mut bus = MockBus::default();
    let mut link = MockLink::connected();
    let (head, tail) = patch.split_at(20);

    let header = format!("OTA:BEGIN:{}:{}", patch.len(), w4rp::link::crc32(&patch));
    svc.handle_packet(header.as_bytes(), 0, &mut link, &mut bus, &mut NoDelay);
    svc.handle_packet(head, 0, &mut link, &mut bus, &mut NoDelay);
    svc.handle_packet(b"OTA:BEGIN:10:0", 0, &mut link, &mut bus, &mut NoDelay);
    svc.handle_packet(tail, 0, &mut link, &mut bus, &mut NoDelay);
    svc.handle_packet(b"END", 0, &mut link, &mut bus, &mut NoDelay);
    assert_eq!(svc.ota().processed(), patch.len() as u32);

    let mut exec = worker(
        OtaPartitions::with_running_image(&source),
        svc.ota().clone(),
        TickingClock::default(),
    );
    assert_eq!(exec.poll_once(), Some(UpdateOutcome::Restarting));
    assert_eq!(exec.partitions().sim().boot_image.as_deref(), Some(target.as_slice()));
}

#[test]
fn no_job_means_idle_poll() {
    let shared = Arc::new(OtaShared::new(64));
    let mut exec = worker(
        OtaPartitions::with_running_image(b"x"),
        shared,
        TickingClock::default(),
    );
    assert_eq!(exec.poll_once(), None);
}

#[test]
fn ring_overflow_is_counted_not_fatal() {
    use w4rp::link::ingest::{IngestEvent, StreamIngest};

    let ota = OtaShared::new(32);
    let mut ingest = StreamIngest::new();
    assert_eq!(
        ingest.handle(b"OTA:BEGIN:50:0", &ota),
        IngestEvent::FirmwareStarted
    );
    ingest.handle(&[0x55; 50], &ota);
    assert_eq!(ota.ring.len(), 31);
    assert_eq!(ota.ring.overflow_count(), 19);
    assert_eq!(
        ingest.handle(b"END", &ota),
        IngestEvent::FirmwareEnded { processed: 50 }
    );
    assert!(ota.ring.is_closed());
}

/// Producer and worker on separate threads with a ring much smaller than
/// the patch.
#[test]
fn worker_thread_drains_small_ring_concurrently() {
    let source = running_image();
    let mut patch = Vec::new();
    // long literal run so the patch is several times the ring size
    let literal: Vec<u8> = (0..400u32).map(|i| (i % 97) as u8).collect();
    patch.extend([ESC, MOD]);
    patch.extend(&literal);
    patch.extend([ESC, EQL, 253, 0x0A, 0x28]); // 2600
    let mut target = literal.clone();
    target.extend(&source[400..]);

    let shared = Arc::new(OtaShared::new(64));
    let mut ingest = w4rp::link::ingest::StreamIngest::new();
    ingest.handle(
        format!("OTA:BEGIN:{}:{}", patch.len(), w4rp::link::crc32(&patch)).as_bytes(),
        &shared,
    );

    let worker_shared = shared.clone();
    let image = source.clone();
    let handle = std::thread::spawn(move || {
        let mut exec = PatchExecutor::new(
            OtaPartitions::with_running_image(&image),
            JojoPatch::new(PAGE as usize),
            worker_shared,
            Esp32TimeAdapter::new(),
            TaskDelay,
            PAGE,
            5000,
            1,
        );
        loop {
            if let Some(outcome) = exec.poll_once() {
                return (outcome, exec.partitions().sim().boot_image.clone());
            }
        }
    });

    for chunk in patch.chunks(20) {
        // back-pressure: wait for room instead of overflowing
        while shared.ring.capacity() - 1 - shared.ring.len() < chunk.len() {
            std::thread::yield_now();
        }
        ingest.handle(chunk, &shared);
    }
    ingest.handle(b"END", &shared);

    let (outcome, image) = handle.join().unwrap();
    assert_eq!(outcome, UpdateOutcome::Restarting);
    assert_eq!(image, Some(target));
    assert_eq!(shared.ring.overflow_count(), 0);
}
