//! A/B persistence for rulesets.
//!
//! ```text
//!  active_slot = "A"        persist(text)        active_slot = "B"
//!  rules_A = old      ──────────────────────▶    rules_A = old
//!  rules_B = ?              write B, flip        rules_B = text
//! ```
//!
//! The pointer only flips after the inactive slot is written, so a failed
//! write or a power cut mid-write leaves the previous ruleset active. A
//! ruleset that boots cleanly is also copied to `rules_backup` and used
//! if the active slot ever fails to apply.

use log::{error, info, warn};

use crate::config::MAX_PAYLOAD_BYTES;
use crate::error::Result;

use super::ports::{StorageError, StoragePort};

pub const NAMESPACE: &str = "w4rp";

const KEY_ACTIVE: &str = "active_slot";
const KEY_SLOT_A: &str = "rules_A";
const KEY_SLOT_B: &str = "rules_B";
/// Single-slot key written by older firmware.
const KEY_LEGACY: &str = "rules_current";
const KEY_BACKUP: &str = "rules_backup";
const KEY_BOOTS: &str = "boot_count";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    fn key(self) -> &'static str {
        match self {
            Self::A => KEY_SLOT_A,
            Self::B => KEY_SLOT_B,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
        }
    }

    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// Where the boot ruleset came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootRuleset {
    /// Active slot (or legacy key) applied.
    Active(Vec<u8>),
    /// Active slot failed; last-known-good applied and restored.
    Backup(Vec<u8>),
    Empty,
}

pub struct RulesetSlotManager<S> {
    store: S,
}

impl<S: StoragePort> RulesetSlotManager<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Slot the pointer names; `A` when unset.
    pub fn active_slot(&self) -> Slot {
        let mut buf = [0u8; 4];
        match self.store.read(NAMESPACE, KEY_ACTIVE, &mut buf) {
            Ok(n) if buf[..n].first() == Some(&b'B') => Slot::B,
            _ => Slot::A,
        }
    }

    /// Text stored in the active slot.
    pub fn active_payload(&self) -> Option<Vec<u8>> {
        self.read_text(self.active_slot().key())
    }

    /// Write `text` to the inactive slot, then flip the pointer.
    pub fn persist(&mut self, text: &[u8]) -> core::result::Result<Slot, StorageError> {
        let target = self.active_slot().other();
        if let Err(e) = self.store.write(NAMESPACE, target.key(), text) {
            error!("NVS: write of slot {} failed: {}", target.name(), e);
            return Err(e);
        }
        if let Err(e) = self.store.write(NAMESPACE, KEY_ACTIVE, target.name().as_bytes()) {
            error!("NVS: slot pointer not switched to {}: {}", target.name(), e);
            return Err(e);
        }
        info!("NVS: ruleset persisted to slot {}", target.name());
        Ok(target)
    }

    /// Load and apply the ruleset to run at boot.
    ///
    /// `apply` must leave the caller's rule state untouched when it fails.
    pub fn load_boot_ruleset<F>(&mut self, mut apply: F) -> BootRuleset
    where
        F: FnMut(&[u8]) -> Result<()>,
    {
        let primary = self
            .active_payload()
            .or_else(|| self.read_text(KEY_LEGACY));

        if let Some(text) = primary {
            match apply(&text) {
                Ok(()) => {
                    info!("NVS: boot ruleset loaded ({} bytes)", text.len());
                    if self.read_text(KEY_BACKUP).as_deref() != Some(text.as_slice()) {
                        if let Err(e) = self.store.write(NAMESPACE, KEY_BACKUP, &text) {
                            warn!("NVS: backup update failed: {}", e);
                        }
                    }
                    return BootRuleset::Active(text);
                }
                Err(e) => error!("NVS: stored ruleset rejected: {}, trying backup", e),
            }
        } else {
            info!("NVS: no stored ruleset");
        }

        let Some(backup) = self.read_text(KEY_BACKUP) else {
            return BootRuleset::Empty;
        };
        match apply(&backup) {
            Ok(()) => {
                let slot = self.active_slot();
                if let Err(e) = self.store.write(NAMESPACE, slot.key(), &backup) {
                    warn!("NVS: could not restore slot {}: {}", slot.name(), e);
                }
                info!("NVS: backup restored to slot {}", slot.name());
                BootRuleset::Backup(backup)
            }
            Err(e) => {
                error!("NVS: backup rejected: {}, starting empty", e);
                BootRuleset::Empty
            }
        }
    }

    /// Read-modify-write the boot counter. Returns the new value.
    pub fn increment_boot_count(&mut self) -> u32 {
        let mut buf = [0u8; 4];
        let prev = match self.store.read(NAMESPACE, KEY_BOOTS, &mut buf) {
            Ok(4) => u32::from_le_bytes(buf),
            _ => 0,
        };
        let count = prev.wrapping_add(1);
        if let Err(e) = self.store.write(NAMESPACE, KEY_BOOTS, &count.to_le_bytes()) {
            warn!("NVS: boot count not saved: {}", e);
        }
        info!("NVS: boot count {}", count);
        count
    }

    fn read_text(&self, key: &str) -> Option<Vec<u8>> {
        if !self.store.exists(NAMESPACE, key) {
            return None;
        }
        let mut buf = vec![0u8; MAX_PAYLOAD_BYTES as usize];
        match self.store.read(NAMESPACE, key, &mut buf) {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some(buf)
            }
            Err(StorageError::NotFound) => None,
            Err(e) => {
                warn!("NVS: read of {} failed: {}", key, e);
                None
            }
        }
    }
}
