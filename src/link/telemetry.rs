//! Live debug telemetry.
//!
//! While debug mode is on, changed signal values and node results are
//! reported as short text lines on the TX characteristic:
//!
//! - `D:S:<id>:<value>` : signal moved by more than 0.01 (two decimals)
//! - `D:N:<id>:<1|0>` : node result changed
//!
//! A diagnostic watch set, when installed, replaces the rule engine's own
//! signals in the report and is decoded independently of them.

use core::fmt::Write as _;

use log::info;

use crate::rules::RuleGraph;
use crate::rules::definition::WatchDef;
use crate::rules::model::Signal;

/// One telemetry line.
pub type Line = heapless::String<64>;

/// Minimum change that triggers a signal report.
const REPORT_DELTA: f32 = 0.01;

#[derive(Debug, Default)]
pub struct DebugTelemetry {
    enabled: bool,
    last_burst_ms: Option<u32>,
    watch: Vec<Signal>,
}

impl DebugTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn watch(&self) -> &[Signal] {
        &self.watch
    }

    /// Enable reporting and force a full refresh on the next burst.
    pub fn start(&mut self, graph: &mut RuleGraph) {
        self.enabled = true;
        for s in graph.signals_mut() {
            s.last_reported = None;
        }
        for n in graph.nodes_mut() {
            n.last_reported = None;
        }
        for s in &mut self.watch {
            s.last_reported = None;
        }
        info!("LINK: debug mode started");
    }

    /// Disable reporting and drop the watch set.
    pub fn stop(&mut self) {
        self.enabled = false;
        self.watch.clear();
        info!("LINK: debug mode stopped");
    }

    /// Replace the watch set and enable reporting.
    pub fn install_watch(&mut self, def: &WatchDef) {
        self.watch = def
            .signals
            .iter()
            .map(|w| {
                let mut s = Signal::new(
                    w.name.as_deref().unwrap_or("debug"),
                    w.can_id,
                    w.start,
                    w.length,
                    w.big_endian,
                );
                s.factor = w.factor;
                s.offset = w.offset;
                s
            })
            .collect();
        self.enabled = true;
        info!("LINK: debug watch configured, {} signals", self.watch.len());
    }

    /// Decode a frame into matching watch signals.
    pub fn on_frame(&mut self, can_id: u32, data: &[u8; 8], now_ms: u32) {
        for s in self.watch.iter_mut().filter(|s| s.can_id == can_id) {
            s.update(data, now_ms);
        }
    }

    /// Collect up to `max` lines if enabled and at least `interval_ms`
    /// passed since the previous burst.
    pub fn collect(
        &mut self,
        graph: &mut RuleGraph,
        now_ms: u32,
        interval_ms: u32,
        max: usize,
    ) -> Vec<Line> {
        if !self.enabled {
            return Vec::new();
        }
        if self
            .last_burst_ms
            .is_some_and(|t| now_ms.wrapping_sub(t) < interval_ms)
        {
            return Vec::new();
        }
        self.last_burst_ms = Some(now_ms);

        let mut lines = Vec::new();
        if !self.watch.is_empty() {
            report_signals(&mut self.watch, &mut lines, max);
            return lines;
        }

        report_signals(graph.signals_mut(), &mut lines, max);
        for node in graph.nodes_mut() {
            if lines.len() >= max {
                break;
            }
            if node.last_reported != Some(node.last_result) {
                let mut line = Line::new();
                let _ = write!(line, "D:N:{}:{}", node.id, u8::from(node.last_result));
                lines.push(line);
                node.last_reported = Some(node.last_result);
            }
        }
        lines
    }
}

fn report_signals(signals: &mut [Signal], lines: &mut Vec<Line>, max: usize) {
    for sig in signals {
        if lines.len() >= max {
            break;
        }
        let moved = sig
            .last_reported
            .is_none_or(|prev| (sig.value - prev).abs() > REPORT_DELTA);
        if moved {
            let mut line = Line::new();
            let _ = write!(line, "D:S:{}:{:.2}", sig.id, sig.value);
            lines.push(line);
            sig.last_reported = Some(sig.value);
        }
    }
}
