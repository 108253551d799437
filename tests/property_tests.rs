//! Property-based tests for the dwell gate and control arbitration.

use std::collections::HashMap;

use proptest::prelude::*;

use tintd::adapters::{ManualClock, MemoryStore};
use tintd::app::commands::CommandRequest;
use tintd::app::ports::{ApplyOutcome, BackendError, Clock, DeviceBackend, DeviceReading};
use tintd::app::service::ControlService;
use tintd::arbiter::{ControlArbiter, ControlSource};
use tintd::audit::AuditLog;
use tintd::config::ServiceConfig;
use tintd::dwell;
use tintd::registry::{Panel, PanelRegistry, RegistrySnapshot};

/// Backend that always applies instantly; the tests here exercise gating,
/// not device behaviour.
#[derive(Default)]
struct ImmediateBackend;

impl DeviceBackend for ImmediateBackend {
    fn set_level(&self, _: &str, _: u8) -> Result<ApplyOutcome, BackendError> {
        Ok(ApplyOutcome::AppliedImmediately)
    }
    fn get_level(&self, _: &str) -> Result<DeviceReading, BackendError> {
        Err(BackendError::NotFound)
    }
}

fn five_panel_service(min_dwell_secs: u64) -> ControlService<MemoryStore> {
    let mut snap = RegistrySnapshot::default();
    for i in 1..=5 {
        let id = format!("P{i:02}");
        snap.panels.insert(
            id.clone(),
            Panel {
                id,
                name: format!("Panel {i}"),
                level: 0,
                last_change_ts: 0,
                group_id: None,
            },
        );
    }
    let mut config = ServiceConfig::default();
    config.min_dwell_secs = min_dwell_secs;
    ControlService::new(
        config,
        PanelRegistry::from_snapshot(snap).unwrap(),
        AuditLog::in_memory(),
        MemoryStore::new(),
    )
}

/// A source of the given priority kind, all implying panel P01.
fn p01_source(kind: u8, tag: &str) -> ControlSource {
    match kind % 3 {
        0 => ControlSource::Manual {
            panel_id: "P01".to_string(),
        },
        1 => ControlSource::Group {
            group_id: tag.to_string(),
            members: vec!["P01".to_string()],
        },
        _ => ControlSource::Routine {
            routine_id: tag.to_string(),
            name: tag.to_string(),
            members: vec!["P01".to_string()],
            step: None,
        },
    }
}

proptest! {
    /// Once the gate opens for a panel it stays open until the next change.
    #[test]
    fn dwell_gate_is_monotonic(
        last in 0u64..10_000,
        now in 0u64..20_000,
        min_dwell in 0u64..500,
        advance in 0u64..1_000,
    ) {
        if dwell::can_change(last, now, min_dwell) {
            prop_assert!(dwell::can_change(last, now + advance, min_dwell));
        }
    }

    /// Over any command sequence, no two committed changes to the same
    /// panel land closer together than the dwell window.
    #[test]
    fn committed_changes_respect_dwell_spacing(
        min_dwell in 1u64..60,
        steps in prop::collection::vec((0usize..5, 0u8..=100, 0u64..30), 1..40),
    ) {
        let service = five_panel_service(min_dwell);
        let clock = ManualClock::new(10_000);
        let backend = ImmediateBackend;

        let mut commit_times: HashMap<String, Vec<u64>> = HashMap::new();
        for (panel_idx, level, delta) in steps {
            clock.advance(delta);
            let id = format!("P{:02}", panel_idx + 1);
            let result = service.submit(&CommandRequest::manual(&id, level), &backend, &clock);
            if result.applied_to.contains(&id) {
                commit_times.entry(id).or_default().push(clock.now_epoch_secs());
            }
        }

        for times in commit_times.values() {
            for pair in times.windows(2) {
                prop_assert!(
                    pair[1] - pair[0] >= min_dwell,
                    "commits {} and {} violate dwell window {}",
                    pair[0], pair[1], min_dwell
                );
            }
        }
    }

    /// An existing owner is never displaced by an unforced claim, whatever
    /// the priority pairing.
    #[test]
    fn unforced_claim_never_steals(a_kind in 0u8..3, b_kind in 0u8..3) {
        let a = p01_source(a_kind, "A");
        let b = p01_source(b_kind, "B");
        let mut arb = ControlArbiter::new();
        prop_assert_eq!(arb.try_claim(&a, false).accepted.len(), 1);

        let out = arb.try_claim(&b, false);
        prop_assert!(out.accepted.is_empty());
        prop_assert_eq!(out.conflicts.len(), 1);
        prop_assert!(arb.owner("P01").is_some_and(|o| o.same_identity(&a)));
    }

    /// A forced claim takes the panel exactly when the claimant's priority
    /// is at least the owner's.
    #[test]
    fn forced_claim_respects_priority_order(a_kind in 0u8..3, b_kind in 0u8..3) {
        let a = p01_source(a_kind, "A");
        let b = p01_source(b_kind, "B");
        let mut arb = ControlArbiter::new();
        arb.try_claim(&a, false);

        let out = arb.try_claim(&b, true);
        if b.priority() >= a.priority() {
            prop_assert_eq!(out.accepted.len(), 1);
            prop_assert!(arb.owner("P01").is_some_and(|o| o.same_identity(&b)));
        } else {
            prop_assert!(out.accepted.is_empty());
            prop_assert!(arb.owner("P01").is_some_and(|o| o.same_identity(&a)));
        }
    }

    /// Matching release unclaims; a release from a different source is a
    /// no-op.
    #[test]
    fn release_round_trip(kind in 0u8..3) {
        let source = p01_source(kind, "X");
        let stranger = p01_source(kind + 1, "Y");
        let mut arb = ControlArbiter::new();
        arb.try_claim(&source, false);

        arb.release(&stranger);
        prop_assert!(arb.owner("P01").is_some());

        arb.release(&source);
        prop_assert!(arb.owner("P01").is_none());
        prop_assert!(arb.snapshot().owners.is_empty());
    }
}
