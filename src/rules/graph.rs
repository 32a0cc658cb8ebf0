//! Condition/action graph evaluation.
//!
//! ```text
//!  frame ──▶ on_frame ──▶ signals[] ──▶ evaluate ──▶ flows[] ──▶ roots
//!                                                          │
//!                                  ActionDelegate ◀── DFS over wires
//! ```

use std::collections::HashMap;

use log::{info, warn};

use crate::app::ports::ActionDelegate;
use crate::config::{MAX_FLOWS, MAX_NODES, MAX_SIGNALS};
use crate::error::{Error, Result};

use super::definition::{NodeDef, RootRef, RulesetDef};
use super::model::{
    Action, Condition, Flow, HoldState, Node, NodeKind, Operation, Signal, ident,
};

/// Traversal depth ceiling; deeper branches are abandoned.
pub const MAX_DEPTH: u8 = 16;

const UNKNOWN: &str = "unknown";

/// Owns the active ruleset and its runtime state.
#[derive(Debug, Default)]
pub struct RuleGraph {
    signals: Vec<Signal>,
    nodes: Vec<Node>,
    flows: Vec<Flow>,
    /// CAN id → indices into `signals`, rebuilt on every apply.
    by_can_id: HashMap<u32, Vec<usize>>,
    signal_ids: HashMap<String, usize>,
    node_ids: HashMap<String, usize>,
    dialect: String,
    last_update: String,
    frames_received: u32,
    flows_triggered: u32,
}

impl RuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every signal, node and flow.
    pub fn clear(&mut self) {
        self.signals.clear();
        self.nodes.clear();
        self.flows.clear();
        self.by_can_id.clear();
        self.signal_ids.clear();
        self.node_ids.clear();
        self.dialect.clear();
        self.last_update.clear();
    }

    /// Replace the whole ruleset.
    ///
    /// Oversized documents are rejected untouched. Otherwise the current
    /// state is cleared first; a document missing a section then leaves
    /// the graph empty.
    pub fn apply_ruleset(&mut self, def: &RulesetDef) -> Result<()> {
        if def.signals.as_ref().is_some_and(|s| s.len() > MAX_SIGNALS)
            || def.nodes.as_ref().is_some_and(|n| n.len() > MAX_NODES)
            || def.flows.as_ref().is_some_and(|f| f.len() > MAX_FLOWS)
        {
            return Err(Error::ResourceExhausted("ruleset exceeds limits"));
        }

        self.clear();

        let Some(signal_defs) = &def.signals else {
            warn!("RULES: missing signals array");
            return Err(Error::Parse("missing signals"));
        };
        for sd in signal_defs {
            let mut sig = Signal::new(&sd.id, sd.can_id, sd.start, sd.len, sd.be);
            sig.key = ident(&sd.key);
            sig.factor = sd.factor;
            sig.offset = sd.offset;
            sig.min = sd.min;
            sig.max = sd.max;
            self.signal_ids.insert(sd.id.clone(), self.signals.len());
            self.signals.push(sig);
        }
        for (i, sig) in self.signals.iter().enumerate() {
            self.by_can_id.entry(sig.can_id).or_default().push(i);
        }

        let Some(node_defs) = &def.nodes else {
            warn!("RULES: missing nodes array");
            return Err(Error::Parse("missing nodes"));
        };
        for nd in node_defs {
            let node = self.build_node(nd);
            self.node_ids.insert(nd.id.clone(), self.nodes.len());
            self.nodes.push(node);
        }
        for (i, nd) in node_defs.iter().enumerate() {
            let wires: Vec<usize> = nd
                .wires
                .iter()
                .filter_map(|w| self.node_ids.get(w).copied())
                .collect();
            self.nodes[i].wires = wires;
        }

        let Some(flow_defs) = &def.flows else {
            warn!("RULES: missing flows array");
            return Err(Error::Parse("missing flows"));
        };
        for fd in flow_defs {
            let ids: &[String] = match &fd.root {
                RootRef::One(id) => core::slice::from_ref(id),
                RootRef::Many(ids) => ids,
                RootRef::Invalid(_) => {
                    warn!("RULES: flow {} has invalid root field", fd.id);
                    &[]
                }
            };
            let mut roots = Vec::with_capacity(ids.len());
            for id in ids {
                match self.node_ids.get(id) {
                    Some(&i) if self.nodes[i].is_condition() => roots.push(i),
                    Some(_) => warn!("RULES: flow {} root {} is not a condition", fd.id, id),
                    None => warn!("RULES: flow {} root not found: {}", fd.id, id),
                }
            }
            if roots.is_empty() {
                warn!("RULES: flow {} has no valid roots, skipped", fd.id);
                continue;
            }
            self.flows
                .push(Flow::new(&fd.id, roots, fd.debounce_ms, fd.cooldown_ms));
        }

        self.dialect = def.dialect.clone().unwrap_or_else(|| UNKNOWN.into());
        self.last_update = def
            .meta
            .as_ref()
            .and_then(|m| m.updated_at.clone())
            .unwrap_or_else(|| UNKNOWN.into());

        info!(
            "RULES: applied {} signals, {} nodes, {} flows",
            self.signals.len(),
            self.nodes.len(),
            self.flows.len()
        );
        Ok(())
    }

    fn build_node(&self, nd: &NodeDef) -> Node {
        let kind = if nd.is_action() {
            let cfg = &nd.config;
            let params = cfg
                .params
                .iter()
                .filter_map(|p| Some((p.key.clone()?, p.value.clone()?)))
                .collect();
            NodeKind::Action(Action {
                capability_id: ident(cfg.capability_id.as_deref().unwrap_or_default()),
                params,
            })
        } else {
            NodeKind::Condition(self.build_condition(nd))
        };

        Node {
            id: ident(&nd.id),
            name: ident(&nd.name),
            is_root: nd.root,
            kind,
            wires: Vec::new(),
            last_result: false,
            last_evaluation_ms: 0,
            last_reported: None,
        }
    }

    fn build_condition(&self, nd: &NodeDef) -> Condition {
        let cfg = &nd.config;
        let op = Operation::parse(cfg.operation.as_deref());
        let mut signal = cfg
            .signal_id
            .as_ref()
            .and_then(|id| self.signal_ids.get(id).copied());

        if op == Operation::Hold {
            let hold_ms = cfg.value.as_ref().map_or(0.0, |v| v.bounds().0);
            return Condition {
                signal,
                op,
                value: 0.0,
                value2: 0.0,
                hold_ms: hold_ms.max(0.0) as u32,
                hold: HoldState::default(),
            };
        }

        let (lo, hi, is_range) = cfg.value.as_ref().map_or((0.0, 0.0, false), |v| v.bounds());
        if let Some(sig) = signal.map(|i| &self.signals[i]) {
            if !sig.accepts(lo, hi) {
                warn!(
                    "RULES: condition {} operand outside [{:?}, {:?}], disabling",
                    nd.id, sig.min, sig.max
                );
                signal = None;
            }
        }

        Condition {
            signal,
            op,
            value: lo,
            value2: if is_range { hi } else { 0.0 },
            hold_ms: 0,
            hold: HoldState::default(),
        }
    }

    /// Decode one frame into every signal bound to `can_id`.
    pub fn on_frame(&mut self, can_id: u32, data: &[u8; 8], now_ms: u32) {
        self.frames_received = self.frames_received.wrapping_add(1);
        let Some(indices) = self.by_can_id.get(&can_id) else {
            return;
        };
        for &i in indices {
            self.signals[i].update(data, now_ms);
        }
    }

    /// Run every flow once.
    pub fn evaluate<D: ActionDelegate + ?Sized>(&mut self, now_ms: u32, delegate: &mut D) {
        for fi in 0..self.flows.len() {
            let any_true = self.any_root_true(fi, now_ms);
            if !self.flows[fi].observe(any_true, now_ms) {
                continue;
            }

            let mut fired = false;
            for ri in 0..self.flows[fi].roots.len() {
                let root = self.flows[fi].roots[ri];
                fired |= self.traverse(root, now_ms, delegate);
            }
            if fired {
                self.flows[fi].last_trigger_ms = Some(now_ms);
                self.flows_triggered = self.flows_triggered.wrapping_add(1);
            }
        }
    }

    fn any_root_true(&mut self, fi: usize, now_ms: u32) -> bool {
        for ri in 0..self.flows[fi].roots.len() {
            let idx = self.flows[fi].roots[ri];
            if let Some(NodeKind::Condition(c)) = self.nodes.get_mut(idx).map(|n| &mut n.kind) {
                if c.evaluate(&self.signals, now_ms) {
                    return true;
                }
            }
        }
        false
    }

    /// Depth-first walk from `root`, wires in declaration order.
    /// Returns whether any action fired.
    fn traverse<D: ActionDelegate + ?Sized>(
        &mut self,
        root: usize,
        now_ms: u32,
        delegate: &mut D,
    ) -> bool {
        let mut fired = false;
        let mut stack: Vec<(usize, u8)> = vec![(root, 0)];

        while let Some((idx, depth)) = stack.pop() {
            if depth > MAX_DEPTH {
                warn!("RULES: depth limit reached at node {}", idx);
                continue;
            }
            let Some(node) = self.nodes.get_mut(idx) else {
                continue;
            };

            let proceed = match &mut node.kind {
                NodeKind::Condition(c) => {
                    let result = c.evaluate(&self.signals, now_ms);
                    node.last_result = result;
                    node.last_evaluation_ms = now_ms;
                    result
                }
                NodeKind::Action(a) => {
                    if !a.capability_id.is_empty() {
                        delegate.on_action(&a.capability_id, &a.params);
                    }
                    fired = true;
                    true
                }
            };

            if proceed {
                stack.extend(node.wires.iter().rev().map(|&next| (next, depth + 1)));
            }
        }
        fired
    }

    // ── Accessors ─────────────────────────────────────────────

    pub fn signals(&self) -> &[Signal] {
        &self.signals
    }

    pub fn signals_mut(&mut self) -> &mut [Signal] {
        &mut self.signals
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub fn flows(&self) -> &[Flow] {
        &self.flows
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Number of distinct CAN ids referenced by signals.
    pub fn distinct_can_ids(&self) -> usize {
        self.by_can_id.len()
    }

    pub fn signal_index(&self, id: &str) -> Option<usize> {
        self.signal_ids.get(id).copied()
    }

    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.node_ids.get(id).copied()
    }

    pub fn dialect(&self) -> &str {
        &self.dialect
    }

    pub fn last_update(&self) -> &str {
        &self.last_update
    }

    pub fn frames_received(&self) -> u32 {
        self.frames_received
    }

    pub fn flows_triggered(&self) -> u32 {
        self.flows_triggered
    }
}
