//! The control service: command orchestration over the ports.
//!
//! ```text
//!                 ┌────────────────────────────────────────────┐
//!   Submit ──────▶│  validate ─▶ claim ─▶ dwell ─▶ dispatch    │
//!                 │      │         │        │         │        │
//!                 │      ▼         ▼        ▼         ▼        │
//!                 │   reject    arbiter   guard    backend     │
//!                 │                                  │         │
//!                 │               commit ◀── applied │         │
//!                 │               defer  ◀── pending ┘         │
//!                 └────────────────────────────────────────────┘
//!                        every outcome lands in the audit log
//! ```
//!
//! Locking discipline: the registry, arbiter, audit log and pending table
//! each sit behind their own mutex, held only for short in-memory critical
//! sections. No lock is ever held across a [`DeviceBackend`] call, so a
//! slow or hung device stalls only its own command.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crossbeam::channel::Receiver;
use log::{debug, info, warn};

use crate::app::commands::{CommandRequest, CommandResult, TargetType};
use crate::app::events::ControlEvent;
use crate::app::ports::{
    ApplyOutcome, BackendError, Clock, DeviceBackend, DeviceReading, SnapshotStore,
};
use crate::arbiter::{ControlArbiter, ControlSource, OwnershipSnapshot};
use crate::audit::{AuditEntry, AuditFilter, AuditLog};
use crate::config::ServiceConfig;
use crate::dwell;
use crate::error::RejectReason;
use crate::registry::{Group, Panel, PanelRegistry};

/// A dispatched change awaiting device confirmation. Ownership of the panel
/// is held until the change is confirmed or the deadline passes.
#[derive(Debug, Clone)]
struct PendingConfirm {
    panel_id: String,
    level: u8,
    source: ControlSource,
    actor: String,
    target_type: TargetType,
    target_id: String,
    /// Epoch seconds after which the change is audited as failed.
    deadline: u64,
}

/// A timed-out change still watched for late completion. Ownership was
/// released at the deadline; the reconcile loop keeps polling so the
/// registry catches up if the device finishes the transition afterwards.
/// A new command dispatched to the panel supersedes the watch.
#[derive(Debug, Clone)]
struct LateWatch {
    panel_id: String,
    level: u8,
    actor: String,
    target_type: TargetType,
    target_id: String,
}

/// Orchestrates arbitration, dwell gating, dispatch and audit.
///
/// Methods take `&self`; the service is meant to be shared across threads
/// (submitting commands and running the reconcile loop concurrently).
pub struct ControlService<S: SnapshotStore> {
    config: ServiceConfig,
    registry: Mutex<PanelRegistry>,
    arbiter: Mutex<ControlArbiter>,
    audit: Mutex<AuditLog>,
    pending: Mutex<Vec<PendingConfirm>>,
    watch: Mutex<Vec<LateWatch>>,
    store: S,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S: SnapshotStore> ControlService<S> {
    pub fn new(config: ServiceConfig, registry: PanelRegistry, audit: AuditLog, store: S) -> Self {
        Self {
            config,
            registry: Mutex::new(registry),
            arbiter: Mutex::new(ControlArbiter::new()),
            audit: Mutex::new(audit),
            pending: Mutex::new(Vec::new()),
            watch: Mutex::new(Vec::new()),
            store,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Observe claims, overrides, releases and level commits.
    pub fn subscribe(&self) -> Receiver<ControlEvent> {
        lock(&self.arbiter).subscribe()
    }

    /// Current panel and group state.
    pub fn snapshot(&self) -> (Vec<Panel>, Vec<Group>) {
        let registry = lock(&self.registry);
        (registry.panels(), registry.groups())
    }

    /// Current per-panel ownership plus active group/routine sources.
    pub fn active_ownership(&self) -> OwnershipSnapshot {
        lock(&self.arbiter).snapshot()
    }

    /// Query the audit trail.
    pub fn audit_entries(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        lock(&self.audit).entries(filter)
    }

    /// Changes still awaiting device confirmation.
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    // ═══════════════════════════════════════════════════════════
    //  Submit
    // ═══════════════════════════════════════════════════════════

    /// Execute a level-change command end to end.
    ///
    /// Returns a single result summarizing full, partial or no success.
    /// Shared-ownership conflicts without an override block only the
    /// conflicted panels and are named in the result; dwell rejections are
    /// likewise per-panel. Exactly one audit entry is appended per call.
    pub fn submit(
        &self,
        req: &CommandRequest,
        backend: &impl DeviceBackend,
        clock: &impl Clock,
    ) -> CommandResult {
        let actor = req.source.label();

        if req.level > 100 {
            return self.reject(req, &actor, clock, RejectReason::InvalidLevel(req.level));
        }
        if !Self::source_matches_target(&req.source, req.target_type, &req.target_id) {
            let result = CommandResult::rejected(format!(
                "source {actor} does not match target {} {}",
                req.target_type, req.target_id
            ));
            self.append_audit(req, &actor, clock, &[], &result.message);
            return result;
        }

        let panels = match lock(&self.registry).resolve_target(req.target_type, &req.target_id) {
            Ok(panels) => panels,
            Err(reason) => return self.reject(req, &actor, clock, reason),
        };
        if panels.is_empty() {
            let result = CommandResult::rejected(format!("group has no members: {}", req.target_id));
            self.append_audit(req, &actor, clock, &[], &result.message);
            return result;
        }

        let source = Self::effective_source(&req.source, &panels);

        // Claim. Conflicted panels stay with their owner and are reported;
        // the command proceeds on whatever was granted.
        let claim = lock(&self.arbiter).try_claim(&source, req.force_override);
        if claim.accepted.is_empty() {
            return self.reject(req, &actor, clock, RejectReason::ControlConflict(claim.conflicts));
        }
        if !claim.conflicts.is_empty() {
            info!(
                "{actor}: proceeding on {} of {} panels, conflicts on {}",
                claim.accepted.len(),
                panels.len(),
                claim.conflicts.join(", ")
            );
        }

        // Dwell gate, per panel. Panels still inside their dwell window are
        // dropped from the apply set and released immediately.
        let now = clock.now_epoch_secs();
        let mut apply = Vec::new();
        let mut dwell_skipped = Vec::new();
        {
            let registry = lock(&self.registry);
            for panel_id in &claim.accepted {
                let last = registry.panel(panel_id).map_or(0, |p| p.last_change_ts);
                if dwell::can_change(last, now, self.config.min_dwell_secs) {
                    apply.push(panel_id.clone());
                } else {
                    dwell_skipped.push(panel_id.clone());
                }
            }
        }
        if !dwell_skipped.is_empty() {
            let mut arbiter = lock(&self.arbiter);
            for panel_id in &dwell_skipped {
                arbiter.release_panel(panel_id, &source);
            }
        }

        // A fresh command supersedes any late-completion watch on its panels.
        lock(&self.watch).retain(|w| !apply.contains(&w.panel_id));

        // Dispatch, one panel at a time, no lock held across backend I/O.
        // No atomicity across a group: each panel's outcome is its own.
        let mut applied = Vec::new();
        let mut deferred = Vec::new();
        let mut failed: Vec<(String, BackendError)> = Vec::new();
        for panel_id in &apply {
            match self.set_with_retry(backend, panel_id, req.level) {
                Ok(ApplyOutcome::AppliedImmediately) => {
                    let ts = clock.now_epoch_secs();
                    self.commit_and_save(panel_id, req.level, ts);
                    let mut arbiter = lock(&self.arbiter);
                    arbiter.publish(&ControlEvent::LevelCommitted {
                        panel_id: panel_id.clone(),
                        level: req.level,
                    });
                    arbiter.release_panel(panel_id, &source);
                    applied.push(panel_id.clone());
                }
                Ok(ApplyOutcome::AcceptedPending) => {
                    // Ownership is held until confirmation or deadline.
                    lock(&self.pending).push(PendingConfirm {
                        panel_id: panel_id.clone(),
                        level: req.level,
                        source: source.clone(),
                        actor: actor.clone(),
                        target_type: req.target_type,
                        target_id: req.target_id.clone(),
                        deadline: clock.now_epoch_secs() + self.config.confirm_timeout_secs,
                    });
                    deferred.push(panel_id.clone());
                }
                Err(e) => {
                    warn!("{actor}: backend failed for {panel_id}: {e}");
                    lock(&self.arbiter).release_panel(panel_id, &source);
                    failed.push((panel_id.clone(), e));
                }
            }
        }

        let message = Self::summarize(
            req.target_type,
            &applied,
            &deferred,
            &dwell_skipped,
            &claim.conflicts,
            &failed,
        );
        self.append_audit(req, &actor, clock, &applied, &message);
        CommandResult {
            ok: !applied.is_empty() || !deferred.is_empty(),
            applied_to: applied,
            message,
        }
    }

    /// Cancel a group or routine claim: releases its ownership and drops
    /// its unconfirmed changes. Changes already dispatched to the device
    /// are not aborted.
    pub fn cancel(&self, source: &ControlSource) {
        let dropped: Vec<PendingConfirm> = {
            let mut pending = lock(&self.pending);
            let (dropped, kept): (Vec<_>, Vec<_>) = pending
                .drain(..)
                .partition(|p| p.source.same_identity(source));
            *pending = kept;
            dropped
        };
        let mut arbiter = lock(&self.arbiter);
        for p in &dropped {
            arbiter.release_panel(&p.panel_id, source);
        }
        arbiter.release(source);
        if !dropped.is_empty() {
            info!(
                "{}: cancelled with {} unconfirmed change(s) dropped",
                source.label(),
                dropped.len()
            );
        }
    }

    // ═══════════════════════════════════════════════════════════
    //  Reconcile
    // ═══════════════════════════════════════════════════════════

    /// Poll unconfirmed changes against device-reported truth.
    ///
    /// A reading at the requested level confirms the change: the registry
    /// is updated, a follow-up audit entry is appended and ownership is
    /// released. Past the deadline an unconfirmed change is audited as
    /// timed out and released, but the panel stays on a late-completion
    /// watch: the device might still finish the transition, and later
    /// passes keep polling until the level lands (or a new command to the
    /// panel supersedes the watch), so the registry never stays stale.
    /// Returns the number of changes finalized either way.
    pub fn reconcile(&self, backend: &impl DeviceBackend, clock: &impl Clock) -> usize {
        let mut finalized = self.reconcile_pending(backend, clock);
        finalized += self.reconcile_watched(backend, clock);
        finalized
    }

    fn reconcile_pending(&self, backend: &impl DeviceBackend, clock: &impl Clock) -> usize {
        let due: Vec<PendingConfirm> = {
            let mut pending = lock(&self.pending);
            pending.drain(..).collect()
        };
        if due.is_empty() {
            return 0;
        }

        let mut finalized = 0;
        let mut still_pending = Vec::new();
        for p in due {
            let polled = backend.get_level(&p.panel_id);

            if let Ok(reading) = &polled {
                if reading.level == p.level {
                    self.confirm(
                        &p.panel_id,
                        p.level,
                        &p.actor,
                        p.target_type,
                        &p.target_id,
                        reading,
                        clock,
                        format!("confirmed at level {}", p.level),
                    );
                    lock(&self.arbiter).release_panel(&p.panel_id, &p.source);
                    finalized += 1;
                    continue;
                }
            }

            if clock.now_epoch_secs() >= p.deadline {
                let ts = clock.now_epoch_secs();
                let result = match &polled {
                    Ok(reading) => {
                        // Device truth wins even when it is not what we asked.
                        self.commit_and_save(&p.panel_id, reading.level, ts);
                        format!(
                            "confirmation timeout; device reports level {}",
                            reading.level
                        )
                    }
                    Err(e) => format!("confirmation timeout: {e}"),
                };
                warn!("reconcile: {} timed out: {result}", p.panel_id);
                let mut arbiter = lock(&self.arbiter);
                arbiter.publish(&ControlEvent::ConfirmTimedOut {
                    panel_id: p.panel_id.clone(),
                });
                arbiter.release_panel(&p.panel_id, &p.source);
                drop(arbiter);
                lock(&self.audit).append(AuditEntry {
                    ts,
                    actor: p.actor.clone(),
                    target_type: p.target_type,
                    target_id: p.target_id.clone(),
                    level: p.level,
                    applied_to: Vec::new(),
                    result,
                });
                lock(&self.watch).push(LateWatch {
                    panel_id: p.panel_id.clone(),
                    level: p.level,
                    actor: p.actor.clone(),
                    target_type: p.target_type,
                    target_id: p.target_id.clone(),
                });
                finalized += 1;
            } else {
                if let Err(e) = &polled {
                    debug!("reconcile: {} not confirmable yet: {e}", p.panel_id);
                }
                still_pending.push(p);
            }
        }

        if !still_pending.is_empty() {
            lock(&self.pending).extend(still_pending);
        }
        finalized
    }

    /// Poll timed-out changes for late completion. Ownership was already
    /// released at the deadline, so only the registry and the audit trail
    /// are caught up here.
    fn reconcile_watched(&self, backend: &impl DeviceBackend, clock: &impl Clock) -> usize {
        let watched: Vec<LateWatch> = {
            let mut watch = lock(&self.watch);
            watch.drain(..).collect()
        };
        if watched.is_empty() {
            return 0;
        }

        let mut caught_up = 0;
        let mut still_watched = Vec::new();
        for w in watched {
            match backend.get_level(&w.panel_id) {
                Ok(reading) if reading.level == w.level => {
                    self.confirm(
                        &w.panel_id,
                        w.level,
                        &w.actor,
                        w.target_type,
                        &w.target_id,
                        &reading,
                        clock,
                        format!("confirmed at level {} after timeout", w.level),
                    );
                    caught_up += 1;
                }
                _ => still_watched.push(w),
            }
        }

        if !still_watched.is_empty() {
            lock(&self.watch).extend(still_watched);
        }
        caught_up
    }

    /// Commit a confirmed change and append its follow-up audit entry.
    ///
    /// The device's own timestamp keeps dwell accounting aligned with when
    /// the transition actually completed; devices that do not report one
    /// fall back to the poll time.
    #[allow(clippy::too_many_arguments)]
    fn confirm(
        &self,
        panel_id: &str,
        level: u8,
        actor: &str,
        target_type: TargetType,
        target_id: &str,
        reading: &DeviceReading,
        clock: &impl Clock,
        result: String,
    ) {
        let commit_ts = if reading.ts > 0 {
            reading.ts
        } else {
            clock.now_epoch_secs()
        };
        self.commit_and_save(panel_id, level, commit_ts);
        lock(&self.arbiter).publish(&ControlEvent::LevelConfirmed {
            panel_id: panel_id.to_string(),
            level,
        });
        info!("reconcile: {panel_id} {result}");
        lock(&self.audit).append(AuditEntry {
            ts: clock.now_epoch_secs(),
            actor: actor.to_string(),
            target_type,
            target_id: target_id.to_string(),
            level,
            applied_to: vec![panel_id.to_string()],
            result,
        });
    }

    // ═══════════════════════════════════════════════════════════
    //  Internals
    // ═══════════════════════════════════════════════════════════

    /// A source must be asking about its own target: a manual source about
    /// its panel, a group source about its group. Routine steps may target
    /// either kind. Anything else is a malformed request, rejected before
    /// any claim, because the claim set comes from the source and would
    /// silently diverge from the audited target.
    fn source_matches_target(
        source: &ControlSource,
        target_type: TargetType,
        target_id: &str,
    ) -> bool {
        match (source, target_type) {
            (ControlSource::Manual { panel_id }, TargetType::Panel) => panel_id == target_id,
            (ControlSource::Group { group_id, .. }, TargetType::Group) => group_id == target_id,
            (ControlSource::Routine { .. }, _) => true,
            _ => false,
        }
    }

    /// Fill in member lists the caller left empty, from the resolved target.
    fn effective_source(source: &ControlSource, panels: &[String]) -> ControlSource {
        match source {
            ControlSource::Manual { .. } => source.clone(),
            ControlSource::Group { group_id, members } => ControlSource::Group {
                group_id: group_id.clone(),
                members: if members.is_empty() {
                    panels.to_vec()
                } else {
                    members.clone()
                },
            },
            ControlSource::Routine {
                routine_id,
                name,
                members,
                step,
            } => ControlSource::Routine {
                routine_id: routine_id.clone(),
                name: name.clone(),
                members: if members.is_empty() {
                    panels.to_vec()
                } else {
                    members.clone()
                },
                step: *step,
            },
        }
    }

    /// Dispatch one panel's change, retrying transient transport failures
    /// with doubling backoff. Anything other than `Unreachable` is final on
    /// the first attempt.
    fn set_with_retry(
        &self,
        backend: &impl DeviceBackend,
        panel_id: &str,
        level: u8,
    ) -> Result<ApplyOutcome, BackendError> {
        let mut attempt: u32 = 0;
        loop {
            match backend.set_level(panel_id, level) {
                Err(BackendError::Unreachable(why)) if attempt < self.config.retry_max => {
                    attempt += 1;
                    let backoff = Duration::from_millis(
                        self.config
                            .retry_backoff_ms
                            .saturating_mul(1 << (attempt - 1).min(16)),
                    );
                    warn!(
                        "backend unreachable for {panel_id} (attempt {attempt}/{}): {why}; retrying in {backoff:?}",
                        self.config.retry_max
                    );
                    std::thread::sleep(backoff);
                }
                outcome => return outcome,
            }
        }
    }

    /// Commit a confirmed level to the registry and persist the snapshot.
    /// Saving under the registry lock keeps concurrent commits from writing
    /// interleaved snapshots; a persistence failure is logged and in-memory
    /// state stays authoritative.
    fn commit_and_save(&self, panel_id: &str, level: u8, ts: u64) {
        let mut registry = lock(&self.registry);
        registry.commit_level(panel_id, level, ts);
        if let Err(e) = self.store.save(registry.snapshot_data()) {
            warn!("failed to persist panel snapshot: {e}");
        }
    }

    fn summarize(
        target_type: TargetType,
        applied: &[String],
        deferred: &[String],
        dwell_skipped: &[String],
        conflicts: &[String],
        failed: &[(String, BackendError)],
    ) -> String {
        let clean =
            deferred.is_empty() && dwell_skipped.is_empty() && conflicts.is_empty() && failed.is_empty();
        if clean && !applied.is_empty() {
            return match target_type {
                TargetType::Panel => "panel updated".to_string(),
                TargetType::Group => "group updated".to_string(),
            };
        }

        let mut segments = Vec::new();
        if !applied.is_empty() {
            segments.push(format!("applied: {}", applied.join(", ")));
        }
        if !deferred.is_empty() {
            segments.push(format!(
                "accepted, awaiting confirmation: {}",
                deferred.join(", ")
            ));
        }
        if !dwell_skipped.is_empty() {
            segments.push(format!("dwell time not met: {}", dwell_skipped.join(", ")));
        }
        if !conflicts.is_empty() {
            segments.push(RejectReason::ControlConflict(conflicts.to_vec()).to_string());
        }
        if !failed.is_empty() {
            let detail: Vec<String> = failed
                .iter()
                .map(|(id, e)| format!("{id} ({e})"))
                .collect();
            segments.push(format!("backend failure: {}", detail.join(", ")));
        }
        if segments.is_empty() {
            "no panels changed".to_string()
        } else {
            segments.join("; ")
        }
    }

    fn reject(
        &self,
        req: &CommandRequest,
        actor: &str,
        clock: &impl Clock,
        reason: RejectReason,
    ) -> CommandResult {
        let message = reason.to_string();
        debug!("{actor}: rejected: {message}");
        self.append_audit(req, actor, clock, &[], &message);
        CommandResult::rejected(message)
    }

    fn append_audit(
        &self,
        req: &CommandRequest,
        actor: &str,
        clock: &impl Clock,
        applied_to: &[String],
        result: &str,
    ) {
        lock(&self.audit).append(AuditEntry {
            ts: clock.now_epoch_secs(),
            actor: actor.to_string(),
            target_type: req.target_type,
            target_id: req.target_id.clone(),
            level: req.level,
            applied_to: applied_to.to_vec(),
            result: result.to_string(),
        });
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
