//! Capability handlers invoked by action nodes.
//!
//! A capability is a named side effect (drive an output, log a line)
//! registered by the application at boot. Rules refer to it by id; the
//! registry resolves the id when the rule graph fires an action.

use std::collections::BTreeMap;

use log::{info, warn};
use serde::Serialize;

use crate::rules::model::Params;

use super::ports::ActionDelegate;

/// A registered side effect.
pub trait Capability: Send {
    fn invoke(&mut self, params: &Params);
}

impl<F: FnMut(&Params) + Send> Capability for F {
    fn invoke(&mut self, params: &Params) {
        self(params);
    }
}

/// Parameter description published in the profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ParamMeta {
    pub name: String,
    /// `int`, `float`, `string` or `bool`.
    #[serde(rename = "type")]
    pub kind: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<i32>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// Capability description published in the profile, keyed by `id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CapabilityMeta {
    #[serde(skip)]
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub label: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub category: String,
    pub params: Vec<ParamMeta>,
}

struct Entry {
    handler: Box<dyn Capability>,
    meta: Option<CapabilityMeta>,
}

/// Id → handler table.
#[derive(Default)]
pub struct CapabilityRegistry {
    entries: BTreeMap<String, Entry>,
    invocations: u32,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `log` capability.
    pub fn with_builtins() -> Self {
        let mut r = Self::new();
        r.register_with_meta(
            CapabilityMeta {
                id: "log".into(),
                label: "Log".into(),
                description: "Emit a log entry when rule fires".into(),
                category: "debug".into(),
                params: vec![ParamMeta {
                    name: "msg".into(),
                    kind: "string".into(),
                    required: true,
                    description: "Text message".into(),
                    ..Default::default()
                }],
            },
            |params: &Params| {
                if let Some(msg) = params.get("msg") {
                    info!("LOG: {}", msg);
                }
            },
        );
        r
    }

    /// Register a handler without profile metadata. Replaces any handler
    /// already bound to `id`.
    pub fn register(&mut self, id: &str, handler: impl Capability + 'static) {
        self.entries.insert(
            id.into(),
            Entry {
                handler: Box::new(handler),
                meta: None,
            },
        );
    }

    pub fn register_with_meta(&mut self, meta: CapabilityMeta, handler: impl Capability + 'static) {
        self.entries.insert(
            meta.id.clone(),
            Entry {
                handler: Box::new(handler),
                meta: Some(meta),
            },
        );
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Metadata of every capability that has some, in id order.
    pub fn metas(&self) -> impl Iterator<Item = &CapabilityMeta> {
        self.entries.values().filter_map(|e| e.meta.as_ref())
    }

    pub fn invocations(&self) -> u32 {
        self.invocations
    }
}

impl ActionDelegate for CapabilityRegistry {
    fn on_action(&mut self, capability_id: &str, params: &Params) {
        match self.entries.get_mut(capability_id) {
            Some(entry) => {
                self.invocations = self.invocations.wrapping_add(1);
                entry.handler.invoke(params);
            }
            None => warn!("RULES: no handler for capability '{}'", capability_id),
        }
    }
}
