//! Ruleset and diagnostic-watch documents as received over the link.
//!
//! These are plain serde shapes; resolution into indices happens in
//! [`RuleGraph::apply_ruleset`](super::graph::RuleGraph::apply_ruleset).

use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};

use crate::config::{MAX_FLOWS, MAX_NODES, MAX_SIGNALS};
use crate::error::{Error, Result};

fn yes() -> bool {
    true
}

fn one() -> f32 {
    1.0
}

/// Top-level ruleset document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesetDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dialect: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<MetaDef>,
    pub signals: Option<Vec<SignalDef>>,
    pub nodes: Option<Vec<NodeDef>>,
    pub flows: Option<Vec<FlowDef>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetaDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalDef {
    pub id: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub can_id: u32,
    #[serde(default)]
    pub start: u16,
    #[serde(default)]
    pub len: u8,
    #[serde(default = "yes")]
    pub be: bool,
    #[serde(default = "one")]
    pub factor: f32,
    #[serde(default)]
    pub offset: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDef {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// `"action"`; anything else is a condition.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub root: bool,
    #[serde(default)]
    pub config: NodeConfigDef,
    #[serde(default)]
    pub wires: Vec<String>,
}

impl NodeDef {
    pub fn is_action(&self) -> bool {
        self.kind.as_deref() == Some("action")
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeConfigDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Operand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<ParamDef>,
}

/// A scalar operand or a `[lo, hi]` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Scalar(f32),
    Range(Vec<f32>),
}

impl Operand {
    /// `(lo, hi)` normalised so that `lo <= hi`, plus whether it was a range.
    pub fn bounds(&self) -> (f32, f32, bool) {
        match self {
            Self::Scalar(v) => (*v, *v, false),
            Self::Range(r) => {
                let a = r.first().copied().unwrap_or(0.0);
                let b = r.get(1).copied().unwrap_or(0.0);
                if b < a { (b, a, true) } else { (a, b, true) }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDef {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDef {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub root: RootRef,
    #[serde(default)]
    pub debounce_ms: u32,
    #[serde(default)]
    pub cooldown_ms: u32,
}

/// Flow root: one id, a list of ids, or something unusable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RootRef {
    One(String),
    Many(Vec<String>),
    #[serde(skip_serializing)]
    Invalid(IgnoredAny),
}

impl Default for RootRef {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl RulesetDef {
    /// Parse a ruleset document.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|_| Error::Parse("ruleset JSON"))
    }

    /// Reject documents that could not be installed whole.
    pub fn validate(&self) -> Result<()> {
        let (Some(signals), Some(nodes), Some(flows)) = (&self.signals, &self.nodes, &self.flows)
        else {
            return Err(Error::Parse("missing signals, nodes or flows"));
        };
        if signals.len() > MAX_SIGNALS {
            return Err(Error::ResourceExhausted("too many signals"));
        }
        if nodes.len() > MAX_NODES {
            return Err(Error::ResourceExhausted("too many nodes"));
        }
        if flows.len() > MAX_FLOWS {
            return Err(Error::ResourceExhausted("too many flows"));
        }
        Ok(())
    }
}

// ── Diagnostic watch ───────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WatchDef {
    #[serde(default)]
    pub signals: Vec<WatchSignalDef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchSignalDef {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub can_id: u32,
    #[serde(default)]
    pub start: u16,
    #[serde(default)]
    pub length: u8,
    #[serde(default = "one")]
    pub factor: f32,
    #[serde(default)]
    pub offset: f32,
    #[serde(default)]
    pub big_endian: bool,
}

impl WatchDef {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let def: Self =
            serde_json::from_slice(bytes).map_err(|_| Error::Parse("watch JSON"))?;
        if def.signals.len() > MAX_SIGNALS {
            return Err(Error::ResourceExhausted("too many watch signals"));
        }
        Ok(def)
    }
}
