//! Control arbitration.
//!
//! Tracks, per panel, which control source currently owns it and resolves
//! competing claims by priority. Ownership is temporary: it exists while a
//! command's physical effect is in flight or awaiting confirmation, and an
//! absent record means the panel is unclaimed.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Claim priority                     │
//! │                                                     │
//! │   Manual (3)   >   Group (2)   >   Routine (1)      │
//! │                                                     │
//! │  any existing owner blocks a new claim unless the   │
//! │  claimant forces AND outranks-or-equals the owner   │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! The arbiter owns its map and notifies observers over channels; nothing
//! mutates it from the outside.

use std::collections::BTreeMap;

use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::app::events::ControlEvent;

// ═══════════════════════════════════════════════════════════════
//  Control sources
// ═══════════════════════════════════════════════════════════════

/// The logical actor asking to change one or more panels.
///
/// A value describing *who* is asking; it carries no mutable state.
/// Identity (for release matching) is the variant plus its identifying id,
/// not the member list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ControlSource {
    /// A direct single-panel command.
    Manual { panel_id: String },
    /// A group-wide command.
    Group {
        group_id: String,
        members: Vec<String>,
    },
    /// A step of a scheduled routine.
    Routine {
        routine_id: String,
        name: String,
        members: Vec<String>,
        step: Option<u32>,
    },
}

impl ControlSource {
    /// Claim priority, highest wins. Manual > Group > Routine.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Manual { .. } => 3,
            Self::Group { .. } => 2,
            Self::Routine { .. } => 1,
        }
    }

    /// The panels implied by this source.
    pub fn panels(&self) -> &[String] {
        match self {
            Self::Manual { panel_id } => core::slice::from_ref(panel_id),
            Self::Group { members, .. } | Self::Routine { members, .. } => members,
        }
    }

    /// Identity match on variant + identifying field. Two `Group` sources
    /// for the same group id are the same identity even if their member
    /// lists were resolved at different times.
    pub fn same_identity(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Manual { panel_id: a }, Self::Manual { panel_id: b }) => a == b,
            (Self::Group { group_id: a, .. }, Self::Group { group_id: b, .. }) => a == b,
            (Self::Routine { routine_id: a, .. }, Self::Routine { routine_id: b, .. }) => a == b,
            _ => false,
        }
    }

    /// Actor label for audit entries and logs.
    pub fn label(&self) -> String {
        match self {
            Self::Manual { panel_id } => format!("manual:{panel_id}"),
            Self::Group { group_id, .. } => format!("group:{group_id}"),
            Self::Routine {
                routine_id, step, ..
            } => match step {
                Some(n) => format!("routine:{routine_id}#{n}"),
                None => format!("routine:{routine_id}"),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Arbiter
// ═══════════════════════════════════════════════════════════════

/// Result of a claim attempt. A command with non-empty `conflicts` was only
/// partially granted; the executor proceeds on the accepted subset and
/// reports the conflicting panels to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimOutcome {
    /// Panels now owned by the claiming source.
    pub accepted: Vec<String>,
    /// Panels left untouched because another owner blocks the claim.
    pub conflicts: Vec<String>,
}

/// Read-only view of current ownership for observability.
#[derive(Debug, Clone, Serialize)]
pub struct OwnershipSnapshot {
    /// Panel id -> current owner.
    pub owners: BTreeMap<String, ControlSource>,
    /// Deduplicated active Group/Routine sources with their member lists.
    pub active_sources: Vec<ControlSource>,
}

/// Priority-ranked ownership map with message-passing observers.
#[derive(Default)]
pub struct ControlArbiter {
    owners: BTreeMap<String, ControlSource>,
    subscribers: Vec<Sender<ControlEvent>>,
}

impl ControlArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer. Dropped receivers are pruned on the next
    /// publish.
    pub fn subscribe(&mut self) -> Receiver<ControlEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    /// Broadcast an event to all live observers.
    pub(crate) fn publish(&mut self, event: &ControlEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Attempt to claim every panel implied by `source`.
    ///
    /// Per panel: unclaimed means granted; an existing owner blocks the
    /// claim unless `force` is set and the owner's priority does not exceed
    /// the claimant's, in which case the owner is revoked. Equal priority
    /// never grants precedence without force, and a source re-claiming a
    /// panel it already holds conflicts with itself (which is what makes
    /// duplicate submits detectable).
    pub fn try_claim(&mut self, source: &ControlSource, force: bool) -> ClaimOutcome {
        let mut accepted = Vec::new();
        let mut conflicts = Vec::new();

        for panel_id in source.panels() {
            match self.owners.get(panel_id) {
                None => {
                    self.owners.insert(panel_id.clone(), source.clone());
                    self.publish(&ControlEvent::Claimed {
                        panel_id: panel_id.clone(),
                        source: source.clone(),
                    });
                    accepted.push(panel_id.clone());
                }
                Some(owner) if force && owner.priority() <= source.priority() => {
                    let previous = owner.clone();
                    info!(
                        "arbiter: {} overrides {} on {}",
                        source.label(),
                        previous.label(),
                        panel_id
                    );
                    self.owners.insert(panel_id.clone(), source.clone());
                    self.publish(&ControlEvent::Overridden {
                        panel_id: panel_id.clone(),
                        previous,
                        source: source.clone(),
                    });
                    accepted.push(panel_id.clone());
                }
                Some(owner) => {
                    debug!(
                        "arbiter: {} blocked on {} (held by {})",
                        source.label(),
                        panel_id,
                        owner.label()
                    );
                    conflicts.push(panel_id.clone());
                }
            }
        }

        ClaimOutcome {
            accepted,
            conflicts,
        }
    }

    /// Release every panel implied by `source`, but only where the recorded
    /// owner has the same identity. A stale release never clobbers a newer
    /// claim.
    pub fn release(&mut self, source: &ControlSource) {
        for panel_id in source.panels().to_vec() {
            self.release_panel(&panel_id, source);
        }
    }

    /// Release a single panel if (and only if) `source` is its recorded
    /// owner. Used by the executor as each panel's outcome becomes final.
    pub fn release_panel(&mut self, panel_id: &str, source: &ControlSource) {
        let matches = self
            .owners
            .get(panel_id)
            .is_some_and(|owner| owner.same_identity(source));
        if matches {
            self.owners.remove(panel_id);
            self.publish(&ControlEvent::Released {
                panel_id: panel_id.to_string(),
            });
        }
    }

    /// Current owner of a panel, if any.
    pub fn owner(&self, panel_id: &str) -> Option<&ControlSource> {
        self.owners.get(panel_id)
    }

    /// Read-only ownership view: per-panel owner plus the deduplicated
    /// active Group/Routine sources.
    pub fn snapshot(&self) -> OwnershipSnapshot {
        let mut active_sources: Vec<ControlSource> = Vec::new();
        for owner in self.owners.values() {
            if matches!(owner, ControlSource::Manual { .. }) {
                continue;
            }
            if !active_sources.iter().any(|s| s.same_identity(owner)) {
                active_sources.push(owner.clone());
            }
        }
        OwnershipSnapshot {
            owners: self.owners.clone(),
            active_sources,
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn manual(panel: &str) -> ControlSource {
        ControlSource::Manual {
            panel_id: panel.to_string(),
        }
    }

    fn group(id: &str, members: &[&str]) -> ControlSource {
        ControlSource::Group {
            group_id: id.to_string(),
            members: members.iter().map(ToString::to_string).collect(),
        }
    }

    fn routine(id: &str, members: &[&str]) -> ControlSource {
        ControlSource::Routine {
            routine_id: id.to_string(),
            name: id.to_string(),
            members: members.iter().map(ToString::to_string).collect(),
            step: None,
        }
    }

    #[test]
    fn unclaimed_panel_is_granted() {
        let mut arb = ControlArbiter::new();
        let out = arb.try_claim(&manual("P01"), false);
        assert_eq!(out.accepted, vec!["P01"]);
        assert!(out.conflicts.is_empty());
        assert!(arb.owner("P01").is_some());
    }

    #[test]
    fn any_existing_owner_conflicts_without_force() {
        let mut arb = ControlArbiter::new();
        arb.try_claim(&routine("R1", &["P01"]), false);

        // Higher-priority group still conflicts without force; priority
        // alone grants no precedence.
        let out = arb.try_claim(&group("G1", &["P01", "P02"]), false);
        assert_eq!(out.accepted, vec!["P02"]);
        assert_eq!(out.conflicts, vec!["P01"]);
    }

    #[test]
    fn equal_priority_conflicts_even_with_overlap() {
        let mut arb = ControlArbiter::new();
        arb.try_claim(&group("G1", &["P01", "P02"]), false);
        let out = arb.try_claim(&group("G2", &["P02", "P03"]), false);
        assert_eq!(out.accepted, vec!["P03"]);
        assert_eq!(out.conflicts, vec!["P02"]);
    }

    #[test]
    fn same_source_reclaim_conflicts_with_itself() {
        let mut arb = ControlArbiter::new();
        arb.try_claim(&manual("P01"), false);
        let out = arb.try_claim(&manual("P01"), false);
        assert!(out.accepted.is_empty());
        assert_eq!(out.conflicts, vec!["P01"]);
    }

    #[test]
    fn force_overrides_equal_and_lower_priority() {
        let mut arb = ControlArbiter::new();
        arb.try_claim(&routine("R1", &["P01"]), false);
        let out = arb.try_claim(&group("G1", &["P01"]), true);
        assert_eq!(out.accepted, vec!["P01"]);
        assert!(arb.owner("P01").unwrap().same_identity(&group("G1", &[])));
    }

    #[test]
    fn force_cannot_override_higher_priority() {
        let mut arb = ControlArbiter::new();
        arb.try_claim(&manual("P01"), false);
        let out = arb.try_claim(&routine("R1", &["P01"]), true);
        assert!(out.accepted.is_empty());
        assert_eq!(out.conflicts, vec!["P01"]);
        assert!(arb.owner("P01").unwrap().same_identity(&manual("P01")));
    }

    #[test]
    fn release_requires_identity_match() {
        let mut arb = ControlArbiter::new();
        arb.try_claim(&group("G1", &["P01"]), false);

        // Stale release from a different group is a no-op.
        arb.release(&group("G2", &["P01"]));
        assert!(arb.owner("P01").is_some());

        // Matching identity releases, member list differences do not matter.
        arb.release(&group("G1", &["P01", "P99"]));
        assert!(arb.owner("P01").is_none());
    }

    #[test]
    fn snapshot_lists_active_sources_once() {
        let mut arb = ControlArbiter::new();
        arb.try_claim(&group("G1", &["P01", "P02", "P03"]), false);
        arb.try_claim(&manual("P05"), false);

        let snap = arb.snapshot();
        assert_eq!(snap.owners.len(), 4);
        // Group appears once despite holding three panels; manual owners are
        // per-panel and not listed as active sources.
        assert_eq!(snap.active_sources.len(), 1);
        assert!(snap.active_sources[0].same_identity(&group("G1", &[])));
    }

    #[test]
    fn observers_see_claim_override_release() {
        let mut arb = ControlArbiter::new();
        let rx = arb.subscribe();

        arb.try_claim(&routine("R1", &["P01"]), false);
        arb.try_claim(&group("G1", &["P01"]), true);
        arb.release(&group("G1", &["P01"]));

        let events: Vec<ControlEvent> = rx.try_iter().collect();
        assert!(matches!(events[0], ControlEvent::Claimed { .. }));
        assert!(matches!(events[1], ControlEvent::Overridden { .. }));
        assert!(matches!(events[2], ControlEvent::Released { .. }));
    }
}
