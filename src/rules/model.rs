//! Rule engine entities: signals, condition/action nodes and flows.
//!
//! Everything here is rebuilt wholesale on each ruleset apply. Indices
//! (signal references, wires, flow roots) are resolved once at apply time
//! and stay valid until the next apply.

use std::collections::BTreeMap;

use super::bitfield;

/// Identifier length cap (bytes).
pub type Ident = heapless::String<32>;

/// Ordered capability parameters.
pub type Params = BTreeMap<String, String>;

/// Absolute tolerance for equality comparisons.
pub const FLOAT_TOLERANCE: f32 = 0.001;

#[inline]
pub fn float_eq(a: f32, b: f32) -> bool {
    (a - b).abs() < FLOAT_TOLERANCE
}

/// Copy `s` into a fixed-capacity string, truncating on a char boundary.
pub fn ident<const N: usize>(s: &str) -> heapless::String<N> {
    let mut out = heapless::String::new();
    for c in s.chars() {
        if out.push(c).is_err() {
            break;
        }
    }
    out
}

// ── Signal ─────────────────────────────────────────────────────

/// A named scalar decoded from a bit field of matching frames.
#[derive(Debug, Clone)]
pub struct Signal {
    pub id: Ident,
    pub key: heapless::String<16>,
    pub can_id: u32,
    pub start_bit: u16,
    pub bit_length: u8,
    pub big_endian: bool,
    pub factor: f32,
    pub offset: f32,
    /// `None` means unbounded.
    pub min: Option<f32>,
    pub max: Option<f32>,

    pub value: f32,
    pub last_value: f32,
    pub last_update_ms: u32,
    pub ever_set: bool,
    /// Last value pushed to debug telemetry; `None` forces the next report.
    pub last_reported: Option<f32>,
}

impl Signal {
    pub fn new(id: &str, can_id: u32, start_bit: u16, bit_length: u8, big_endian: bool) -> Self {
        Self {
            id: ident(id),
            key: heapless::String::new(),
            can_id,
            start_bit,
            bit_length,
            big_endian,
            factor: 1.0,
            offset: 0.0,
            min: None,
            max: None,
            value: 0.0,
            last_value: 0.0,
            last_update_ms: 0,
            ever_set: false,
            last_reported: None,
        }
    }

    /// Decode `data` into this signal and mark it observed.
    pub fn update(&mut self, data: &[u8; 8], now_ms: u32) {
        self.last_value = self.value;
        self.value = bitfield::decode(
            data,
            self.start_bit,
            self.bit_length,
            self.big_endian,
            self.factor,
            self.offset,
        );
        self.last_update_ms = now_ms;
        self.ever_set = true;
    }

    /// True when `lo..=hi` lies inside the declared range.
    pub fn accepts(&self, lo: f32, hi: f32) -> bool {
        self.min.is_none_or(|min| lo >= min) && self.max.is_none_or(|max| hi <= max)
    }
}

// ── Node ───────────────────────────────────────────────────────

/// Condition comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Within,
    Outside,
    Hold,
}

impl Operation {
    /// Unknown or missing names map to equals.
    pub fn parse(name: Option<&str>) -> Self {
        match name {
            Some("!=") => Self::Ne,
            Some(">") => Self::Gt,
            Some(">=") => Self::Ge,
            Some("<") => Self::Lt,
            Some("<=") => Self::Le,
            Some("within") => Self::Within,
            Some("outside") => Self::Outside,
            Some("hold") => Self::Hold,
            _ => Self::Eq,
        }
    }
}

/// Node-owned timer for the `hold` operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HoldState {
    pub armed: bool,
    pub since_ms: u32,
}

#[derive(Debug, Clone)]
pub struct Condition {
    /// `None` when unresolved or disabled; such a condition is never true.
    pub signal: Option<usize>,
    pub op: Operation,
    pub value: f32,
    pub value2: f32,
    pub hold_ms: u32,
    pub hold: HoldState,
}

impl Condition {
    /// Evaluate against the signal table, advancing the hold timer.
    pub fn evaluate(&mut self, signals: &[Signal], now_ms: u32) -> bool {
        let Some(sig) = self.signal.and_then(|i| signals.get(i)) else {
            return false;
        };
        if !sig.ever_set {
            return false;
        }
        let v = sig.value;

        match self.op {
            Operation::Hold => {
                if float_eq(v, 0.0) {
                    self.hold = HoldState::default();
                    return false;
                }
                if !self.hold.armed {
                    self.hold = HoldState {
                        armed: true,
                        since_ms: now_ms,
                    };
                }
                now_ms.wrapping_sub(self.hold.since_ms) >= self.hold_ms
            }
            Operation::Eq => float_eq(v, self.value),
            Operation::Ne => !float_eq(v, self.value),
            Operation::Gt => v > self.value,
            Operation::Ge => v > self.value || float_eq(v, self.value),
            Operation::Lt => v < self.value,
            Operation::Le => v < self.value || float_eq(v, self.value),
            Operation::Within => v >= self.value && v <= self.value2,
            Operation::Outside => v < self.value || v > self.value2,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Action {
    pub capability_id: Ident,
    pub params: Params,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Condition(Condition),
    Action(Action),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: Ident,
    pub name: heapless::String<64>,
    pub is_root: bool,
    pub kind: NodeKind,
    /// Successor node indices, in declaration order.
    pub wires: Vec<usize>,
    pub last_result: bool,
    pub last_evaluation_ms: u32,
    /// Last result pushed to debug telemetry; `None` forces the next report.
    pub last_reported: Option<bool>,
}

impl Node {
    pub fn is_condition(&self) -> bool {
        matches!(self.kind, NodeKind::Condition(_))
    }
}

// ── Flow ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Flow {
    pub id: Ident,
    /// Root condition node indices; never empty once installed.
    pub roots: Vec<usize>,
    pub debounce_ms: u32,
    pub cooldown_ms: u32,
    /// `None` until the flow first fires.
    pub last_trigger_ms: Option<u32>,
    pub last_change_ms: u32,
    pub last_state: bool,
}

impl Flow {
    pub fn new(id: &str, roots: Vec<usize>, debounce_ms: u32, cooldown_ms: u32) -> Self {
        Self {
            id: ident(id),
            roots,
            debounce_ms,
            cooldown_ms,
            last_trigger_ms: None,
            last_change_ms: 0,
            last_state: false,
        }
    }

    /// Record the "any root true" state, returning whether the flow may fire.
    pub fn observe(&mut self, any_true: bool, now_ms: u32) -> bool {
        if any_true != self.last_state {
            self.last_state = any_true;
            self.last_change_ms = now_ms;
        }
        if !any_true {
            return false;
        }
        let debounced = now_ms.wrapping_sub(self.last_change_ms) >= self.debounce_ms;
        let cooled = self
            .last_trigger_ms
            .is_none_or(|t| now_ms.wrapping_sub(t) >= self.cooldown_ms);
        debounced && cooled
    }
}
