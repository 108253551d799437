//! Port traits, the hexagonal boundary between domain logic and the
//! outside world.
//!
//! ```text
//!   Adapter (sim / remote / store) ──▶ Port trait ──▶ ControlService
//! ```
//!
//! Driven adapters (device backends, snapshot stores, clocks) implement
//! these traits. The [`ControlService`](super::service::ControlService)
//! consumes them via generics, so the domain core never touches a socket
//! or the filesystem directly.

use serde::{Deserialize, Serialize};

use crate::registry::RegistrySnapshot;

// ───────────────────────────────────────────────────────────────
// Device backend port (domain → physical panels)
// ───────────────────────────────────────────────────────────────

/// Uniform contract for applying level changes to physical panels.
///
/// Implementations take `&self`: a backend is shared between concurrently
/// executing commands and manages its own state with interior mutability.
/// The executor never holds a registry or arbiter lock across these calls.
pub trait DeviceBackend {
    /// Command the panel to the given level (0-100).
    ///
    /// Returns [`ApplyOutcome::AcceptedPending`] when the device has
    /// acknowledged the request without confirming the physical change;
    /// the caller must not assume the panel has reached the level and
    /// should rely on [`get_level`](Self::get_level) polling.
    fn set_level(&self, panel_id: &str, level: u8) -> Result<ApplyOutcome, BackendError>;

    /// Device-reported truth for a panel, used to reconcile cached state.
    fn get_level(&self, panel_id: &str) -> Result<DeviceReading, BackendError>;
}

/// Successful [`DeviceBackend::set_level`] outcomes.
///
/// A tagged outcome rather than a boolean: the "accepted but not yet
/// applied" case of asynchronous devices must never collapse into plain
/// success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The physical change is confirmed complete.
    AppliedImmediately,
    /// The device acknowledged the request; confirmation comes later.
    AcceptedPending,
}

/// A device-reported level with its observation timestamp (epoch seconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceReading {
    pub level: u8,
    pub ts: u64,
}

/// Failure reasons from [`DeviceBackend`] operations.
///
/// Only `Unreachable` is eligible for caller-level retry; `NotFound` and
/// `Rejected` indicate a configuration or request defect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The panel identifier has no device behind it (unmapped or unknown).
    NotFound,
    /// Transient transport failure; the device may be fine.
    Unreachable(String),
    /// The device refused the request (validation failure on its side).
    Rejected(String),
}

impl core::fmt::Display for BackendError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "device not found"),
            Self::Unreachable(why) => write!(f, "unreachable: {why}"),
            Self::Rejected(why) => write!(f, "rejected: {why}"),
        }
    }
}

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Wall-clock time source in epoch seconds.
///
/// Injected so that dwell and confirmation-timeout behaviour is testable
/// with a hand-advanced clock.
pub trait Clock {
    fn now_epoch_secs(&self) -> u64;
}

// ───────────────────────────────────────────────────────────────
// Snapshot store port (domain ↔ durable panel/group state)
// ───────────────────────────────────────────────────────────────

/// Loads and persists the panel/group snapshot.
///
/// Implementations MUST write atomically: a crash mid-save must leave
/// either the old snapshot or the new one, never a torn file.
pub trait SnapshotStore {
    /// Load the stored snapshot. `Ok(None)` means nothing stored yet
    /// (first boot).
    fn load(&self) -> Result<Option<RegistrySnapshot>, StoreError>;

    /// Persist the snapshot atomically.
    fn save(&self, snapshot: &RegistrySnapshot) -> Result<(), StoreError>;
}

/// Errors from [`SnapshotStore`] operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Stored data failed deserialization or referential checks.
    Corrupted(String),
    /// Underlying I/O failure.
    Io(String),
}

impl core::fmt::Display for StoreError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Corrupted(why) => write!(f, "corrupted: {why}"),
            Self::Io(why) => write!(f, "I/O error: {why}"),
        }
    }
}

impl std::error::Error for BackendError {}
impl std::error::Error for StoreError {}
