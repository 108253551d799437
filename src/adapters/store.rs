//! JSON document persistence.
//!
//! Snapshot writes are atomic (temp file + rename): a crash mid-save
//! leaves either the old document or the new one, never a torn file.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::app::ports::{SnapshotStore, StoreError};
use crate::registry::RegistrySnapshot;

/// Load a JSON document. `Ok(None)` when the file does not exist.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::Io(e.to_string())),
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| StoreError::Corrupted(e.to_string()))
}

/// Serialize `value` and atomically replace the document at `path`.
pub fn save_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }
    }
    let json =
        serde_json::to_string_pretty(value).map_err(|e| StoreError::Corrupted(e.to_string()))?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, json).map_err(|e| StoreError::Io(e.to_string()))?;
    fs::rename(&tmp, path).map_err(|e| StoreError::Io(e.to_string()))
}

/// File-backed [`SnapshotStore`].
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SnapshotStore for JsonFileStore {
    fn load(&self) -> Result<Option<RegistrySnapshot>, StoreError> {
        load_json(&self.path)
    }

    fn save(&self, snapshot: &RegistrySnapshot) -> Result<(), StoreError> {
        save_json_atomic(&self.path, snapshot)
    }
}

/// In-memory [`SnapshotStore`] for tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    cell: Mutex<Option<RegistrySnapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self) -> Result<Option<RegistrySnapshot>, StoreError> {
        Ok(self
            .cell
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone())
    }

    fn save(&self, snapshot: &RegistrySnapshot) -> Result<(), StoreError> {
        *self
            .cell
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(snapshot.clone());
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
