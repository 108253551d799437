//! Append-only audit log.
//!
//! Every executed or rejected top-level command produces exactly one entry
//! summarizing its fan-out (deferred confirmations add a follow-up entry
//! when they resolve). Entries are immutable once appended. Durability is
//! one JSON object per line, appended on every entry so the file can be
//! tailed; a write failure is logged and never fails the command itself.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Deserialize, Serialize};

use crate::app::commands::TargetType;

/// One audited control action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Epoch seconds when the action occurred.
    pub ts: u64,
    /// Who initiated it (e.g. `manual:P01`, `group:G-facade`, `reconcile`).
    pub actor: String,
    pub target_type: TargetType,
    pub target_id: String,
    /// Requested tint level.
    pub level: u8,
    /// Panels that actually changed (or were confirmed), not the request
    /// fan-out.
    pub applied_to: Vec<String>,
    /// Result summary: success, or the specific rejection reason.
    pub result: String,
}

/// Read-side query filters. All optional; an empty filter returns the most
/// recent entries up to `limit`.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    /// Maximum entries returned (newest first). Unset = all matches.
    pub limit: Option<usize>,
    pub target_type: Option<TargetType>,
    /// Substring match against target id or any applied panel id.
    pub id_contains: Option<String>,
    /// Substring match against the result string.
    pub result_contains: Option<String>,
    /// Inclusive epoch-seconds range.
    pub since: Option<u64>,
    pub until: Option<u64>,
}

/// Append-only audit log with an in-memory tail and optional JSONL file.
pub struct AuditLog {
    entries: Vec<AuditEntry>,
    path: Option<PathBuf>,
}

impl AuditLog {
    /// Open (or create) a file-backed log, loading existing entries.
    /// Corrupt lines are skipped with a warning rather than failing startup.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut entries = Vec::new();
        if let Ok(file) = File::open(&path) {
            for (lineno, line) in BufReader::new(file).lines().enumerate() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<AuditEntry>(&line) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => warn!(
                        "audit: skipping corrupt line {} in {}: {}",
                        lineno + 1,
                        path.display(),
                        e
                    ),
                }
            }
        }
        Self {
            entries,
            path: Some(path),
        }
    }

    /// Memory-only log for tests.
    pub fn in_memory() -> Self {
        Self {
            entries: Vec::new(),
            path: None,
        }
    }

    /// Append an entry, durably when file-backed.
    pub fn append(&mut self, entry: AuditEntry) {
        if let Some(path) = &self.path {
            match Self::append_line(path, &entry) {
                Ok(()) => {}
                Err(e) => warn!("audit: failed to append to {}: {}", path.display(), e),
            }
        }
        self.entries.push(entry);
    }

    fn append_line(path: &Path, entry: &AuditEntry) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let line = serde_json::to_string(entry).map_err(std::io::Error::other)?;
        writeln!(file, "{line}")
    }

    /// Query entries, newest first.
    pub fn entries(&self, filter: &AuditFilter) -> Vec<AuditEntry> {
        let mut matches: Vec<AuditEntry> = self
            .entries
            .iter()
            .filter(|e| Self::matches(e, filter))
            .cloned()
            .collect();
        matches.reverse();
        if let Some(limit) = filter.limit {
            matches.truncate(limit);
        }
        matches
    }

    fn matches(entry: &AuditEntry, filter: &AuditFilter) -> bool {
        if let Some(tt) = filter.target_type {
            if entry.target_type != tt {
                return false;
            }
        }
        if let Some(needle) = &filter.id_contains {
            let in_target = entry.target_id.contains(needle.as_str());
            let in_applied = entry.applied_to.iter().any(|p| p.contains(needle.as_str()));
            if !in_target && !in_applied {
                return false;
            }
        }
        if let Some(needle) = &filter.result_contains {
            if !entry.result.contains(needle.as_str()) {
                return false;
            }
        }
        if let Some(since) = filter.since {
            if entry.ts < since {
                return false;
            }
        }
        if let Some(until) = filter.until {
            if entry.ts > until {
                return false;
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ts: u64, target_id: &str, result: &str) -> AuditEntry {
        AuditEntry {
            ts,
            actor: "manual:P01".to_string(),
            target_type: TargetType::Panel,
            target_id: target_id.to_string(),
            level: 50,
            applied_to: vec![target_id.to_string()],
            result: result.to_string(),
        }
    }

    #[test]
    fn query_is_newest_first_with_limit() {
        let mut log = AuditLog::in_memory();
        for ts in 1..=5 {
            log.append(entry(ts, "P01", "panel updated"));
        }
        let got = log.entries(&AuditFilter {
            limit: Some(2),
            ..AuditFilter::default()
        });
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].ts, 5);
        assert_eq!(got[1].ts, 4);
    }

    #[test]
    fn filters_compose() {
        let mut log = AuditLog::in_memory();
        log.append(entry(10, "P01", "panel updated"));
        log.append(entry(20, "P02", "dwell time not met: P02"));
        log.append(entry(30, "P11", "panel updated"));

        let dwell = log.entries(&AuditFilter {
            result_contains: Some("dwell".to_string()),
            ..AuditFilter::default()
        });
        assert_eq!(dwell.len(), 1);
        assert_eq!(dwell[0].target_id, "P02");

        let p1 = log.entries(&AuditFilter {
            id_contains: Some("P1".to_string()),
            since: Some(15),
            ..AuditFilter::default()
        });
        assert_eq!(p1.len(), 1);
        assert_eq!(p1[0].target_id, "P11");
    }

    #[test]
    fn time_range_is_inclusive() {
        let mut log = AuditLog::in_memory();
        log.append(entry(10, "P01", "ok"));
        log.append(entry(20, "P02", "ok"));
        log.append(entry(30, "P03", "ok"));
        let got = log.entries(&AuditFilter {
            since: Some(10),
            until: Some(20),
            ..AuditFilter::default()
        });
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn file_backed_log_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        {
            let mut log = AuditLog::open(&path);
            log.append(entry(1, "P01", "panel updated"));
            log.append(entry(2, "P02", "panel updated"));
        }

        let log = AuditLog::open(&path);
        assert_eq!(log.len(), 2);
        let got = log.entries(&AuditFilter::default());
        assert_eq!(got[0].target_id, "P02");
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        {
            let mut log = AuditLog::open(&path);
            log.append(entry(1, "P01", "panel updated"));
        }
        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .and_then(|mut f| writeln!(f, "{{not json"))
            .unwrap();

        let log = AuditLog::open(&path);
        assert_eq!(log.len(), 1);
    }
}
