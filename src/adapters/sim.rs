//! Deterministic simulated device backend.
//!
//! Each known panel has an instantaneous device level. A `set_level` blocks
//! for the configured settle time (the glass transition) and then reports
//! [`ApplyOutcome::AppliedImmediately`]. Device state optionally persists
//! to a JSON file so restarts in sim mode keep the last levels.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use log::{debug, warn};

use crate::adapters::store::{load_json, save_json_atomic};
use crate::adapters::time::epoch_secs;
use crate::app::ports::{ApplyOutcome, BackendError, DeviceBackend, DeviceReading, StoreError};
use crate::registry::RegistrySnapshot;

pub struct SimulatedBackend {
    state: Mutex<BTreeMap<String, DeviceReading>>,
    settle: Duration,
    path: Option<PathBuf>,
}

impl SimulatedBackend {
    /// Memory-only simulator.
    pub fn new(settle: Duration) -> Self {
        Self {
            state: Mutex::new(BTreeMap::new()),
            settle,
            path: None,
        }
    }

    /// File-backed simulator; prior device state is reloaded if present.
    pub fn with_persistence(
        path: impl Into<PathBuf>,
        settle: Duration,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        let state = load_json::<BTreeMap<String, DeviceReading>>(&path)?.unwrap_or_default();
        Ok(Self {
            state: Mutex::new(state),
            settle,
            path: Some(path),
        })
    }

    /// Register every panel from the snapshot that the simulator does not
    /// know yet, at its registry level. Already-known panels keep their
    /// device state.
    pub fn seed_missing(&self, snapshot: &RegistrySnapshot) {
        let mut state = self.lock_state();
        for (id, panel) in &snapshot.panels {
            state.entry(id.clone()).or_insert(DeviceReading {
                level: panel.level,
                ts: panel.last_change_ts,
            });
        }
        self.persist(&state);
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, DeviceReading>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, state: &BTreeMap<String, DeviceReading>) {
        if let Some(path) = &self.path {
            if let Err(e) = save_json_atomic(path, state) {
                warn!("sim: failed to persist device state: {e}");
            }
        }
    }
}

impl DeviceBackend for SimulatedBackend {
    fn set_level(&self, panel_id: &str, level: u8) -> Result<ApplyOutcome, BackendError> {
        if !self.lock_state().contains_key(panel_id) {
            return Err(BackendError::NotFound);
        }

        // Settle outside the lock; readers see the old level mid-transition,
        // like real glass.
        if !self.settle.is_zero() {
            std::thread::sleep(self.settle);
        }

        let mut state = self.lock_state();
        state.insert(
            panel_id.to_string(),
            DeviceReading {
                level,
                ts: epoch_secs(),
            },
        );
        self.persist(&state);
        debug!("sim: {panel_id} settled at level {level}");
        Ok(ApplyOutcome::AppliedImmediately)
    }

    fn get_level(&self, panel_id: &str) -> Result<DeviceReading, BackendError> {
        self.lock_state()
            .get(panel_id)
            .copied()
            .ok_or(BackendError::NotFound)
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PanelRegistry;

    fn seeded() -> SimulatedBackend {
        let sim = SimulatedBackend::new(Duration::ZERO);
        let mut reg = PanelRegistry::default();
        reg.bootstrap_default_if_empty();
        sim.seed_missing(reg.snapshot_data());
        sim
    }

    #[test]
    fn set_then_get_reflects_new_level() {
        let sim = seeded();
        assert_eq!(
            sim.set_level("P01", 70).unwrap(),
            ApplyOutcome::AppliedImmediately
        );
        assert_eq!(sim.get_level("P01").unwrap().level, 70);
    }

    #[test]
    fn unknown_panel_is_not_found() {
        let sim = seeded();
        assert!(matches!(
            sim.set_level("nope", 10),
            Err(BackendError::NotFound)
        ));
        assert!(matches!(sim.get_level("nope"), Err(BackendError::NotFound)));
    }

    #[test]
    fn seeding_does_not_clobber_existing_device_state() {
        let sim = seeded();
        sim.set_level("P01", 33).unwrap();

        let mut reg = PanelRegistry::default();
        reg.bootstrap_default_if_empty();
        sim.seed_missing(reg.snapshot_data());
        assert_eq!(sim.get_level("P01").unwrap().level, 33);
    }

    #[test]
    fn device_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim_state.json");

        {
            let sim = SimulatedBackend::with_persistence(&path, Duration::ZERO).unwrap();
            let mut reg = PanelRegistry::default();
            reg.bootstrap_default_if_empty();
            sim.seed_missing(reg.snapshot_data());
            sim.set_level("SK1", 90).unwrap();
        }

        let sim = SimulatedBackend::with_persistence(&path, Duration::ZERO).unwrap();
        assert_eq!(sim.get_level("SK1").unwrap().level, 90);
    }
}
