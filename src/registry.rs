//! Panel registry.
//!
//! Authoritative in-memory map of panel and group identity plus last-known
//! level and change timestamp. Every other component reads and writes panel
//! state through this type; the executor commits level + timestamp together
//! so concurrent readers never observe a half-updated panel.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::app::commands::TargetType;
use crate::app::ports::{SnapshotStore, StoreError};
use crate::error::RejectReason;

/// A single controllable electrochromic glazing unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Panel {
    /// Stable identifier (e.g. `P01`, `SK1`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Current tint level: 0 = fully clear, 100 = fully tinted.
    #[serde(default)]
    pub level: u8,
    /// Epoch seconds of the last *accepted* change; 0 = never changed.
    #[serde(default)]
    pub last_change_ts: u64,
    /// Owning group, if any. Structural membership, not a control claim.
    #[serde(default)]
    pub group_id: Option<String>,
}

/// A named set of panels controlled together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub member_ids: Vec<String>,
}

/// The durable panel/group document. `BTreeMap` keeps the persisted JSON
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    #[serde(default)]
    pub panels: BTreeMap<String, Panel>,
    #[serde(default)]
    pub groups: BTreeMap<String, Group>,
}

/// In-memory registry over a [`RegistrySnapshot`].
#[derive(Debug, Default)]
pub struct PanelRegistry {
    snap: RegistrySnapshot,
}

impl PanelRegistry {
    /// Load from a snapshot store, validating group membership references.
    pub fn from_store(store: &impl SnapshotStore) -> Result<Self, StoreError> {
        let snap = store.load()?.unwrap_or_default();
        let registry = Self { snap };
        registry.validate()?;
        Ok(registry)
    }

    /// Build directly from a snapshot (tests, bootstrap).
    pub fn from_snapshot(snap: RegistrySnapshot) -> Result<Self, StoreError> {
        let registry = Self { snap };
        registry.validate()?;
        Ok(registry)
    }

    /// Every group member must reference an existing panel.
    fn validate(&self) -> Result<(), StoreError> {
        for group in self.snap.groups.values() {
            for member in &group.member_ids {
                if !self.snap.panels.contains_key(member) {
                    return Err(StoreError::Corrupted(format!(
                        "group {} references unknown panel {}",
                        group.id, member
                    )));
                }
            }
        }
        Ok(())
    }

    /// Seed the default installation when the registry is empty: 18 facade
    /// panels and 2 skylights in their groups. Returns whether seeding
    /// happened (the caller persists the result).
    pub fn bootstrap_default_if_empty(&mut self) -> bool {
        if !self.snap.panels.is_empty() {
            return false;
        }

        let facade_ids: Vec<String> = (1..=18).map(|i| format!("P{i:02}")).collect();
        for (i, id) in facade_ids.iter().enumerate() {
            self.snap.panels.insert(
                id.clone(),
                Panel {
                    id: id.clone(),
                    name: format!("Facade {}", i + 1),
                    level: 0,
                    last_change_ts: 0,
                    group_id: Some("G-facade".to_string()),
                },
            );
        }
        for id in ["SK1", "SK2"] {
            self.snap.panels.insert(
                id.to_string(),
                Panel {
                    id: id.to_string(),
                    name: format!("Skylight {}", &id[2..]),
                    level: 0,
                    last_change_ts: 0,
                    group_id: Some("G-skylights".to_string()),
                },
            );
        }
        self.snap.groups.insert(
            "G-facade".to_string(),
            Group {
                id: "G-facade".to_string(),
                name: "Facade".to_string(),
                member_ids: facade_ids,
            },
        );
        self.snap.groups.insert(
            "G-skylights".to_string(),
            Group {
                id: "G-skylights".to_string(),
                name: "Skylights".to_string(),
                member_ids: vec!["SK1".to_string(), "SK2".to_string()],
            },
        );
        true
    }

    /// Resolve a command target to the concrete panel list. Group members
    /// that vanished from the panel map are skipped rather than failing the
    /// whole command.
    pub fn resolve_target(
        &self,
        target_type: TargetType,
        target_id: &str,
    ) -> Result<Vec<String>, RejectReason> {
        match target_type {
            TargetType::Panel => {
                if self.snap.panels.contains_key(target_id) {
                    Ok(vec![target_id.to_string()])
                } else {
                    Err(RejectReason::UnknownPanel(target_id.to_string()))
                }
            }
            TargetType::Group => match self.snap.groups.get(target_id) {
                Some(group) => Ok(group
                    .member_ids
                    .iter()
                    .filter(|id| self.snap.panels.contains_key(*id))
                    .cloned()
                    .collect()),
                None => Err(RejectReason::UnknownGroup(target_id.to_string())),
            },
        }
    }

    pub fn panel(&self, id: &str) -> Option<&Panel> {
        self.snap.panels.get(id)
    }

    /// Commit a confirmed level change: level and timestamp move together,
    /// and the timestamp only moves forward. Returns false for unknown
    /// panels (nothing is changed).
    pub fn commit_level(&mut self, id: &str, level: u8, ts: u64) -> bool {
        debug_assert!(level <= 100);
        match self.snap.panels.get_mut(id) {
            Some(panel) => {
                panel.level = level.min(100);
                panel.last_change_ts = panel.last_change_ts.max(ts);
                true
            }
            None => false,
        }
    }

    /// Panels sorted by id.
    pub fn panels(&self) -> Vec<Panel> {
        self.snap.panels.values().cloned().collect()
    }

    /// Groups sorted by id.
    pub fn groups(&self) -> Vec<Group> {
        self.snap.groups.values().cloned().collect()
    }

    /// The durable document, for persistence.
    pub fn snapshot_data(&self) -> &RegistrySnapshot {
        &self.snap
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
