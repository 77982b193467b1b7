//! Append-only audit trail of authorization evaluations.
//!
//! Every call to [`super::AuthorizationService::authorize`] produces exactly
//! one [`AuditEntry`]. Sinks only ever append; nothing in the crate rewrites
//! or removes an entry once it has been handed to a sink.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::capability::Action;

/// Immutable record of one authorization evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in the log, starting at 1. Assigned by the service under its append lock.
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub agent_id: String,
    pub action: Action,
    pub resource: String,
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Errors produced by audit sinks.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("malformed audit record on line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("audit sink lock poisoned")]
    Poisoned,
}

/// Result type for audit operations.
pub type AuditResult<T> = std::result::Result<T, AuditError>;

/// Destination for audit entries.
///
/// Implementations must make each `append` atomic with respect to other
/// appends; callers additionally serialize appends through a single lock.
pub trait AuditSink: Send + Sync {
    fn append(&self, entry: &AuditEntry) -> AuditResult<()>;
}

// ---------------------------------------------------------------------------
// MemoryAuditLog
// ---------------------------------------------------------------------------

/// In-memory audit log, used by tests and in-process inspection.
#[derive(Debug, Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all entries appended so far, in append order.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuditSink for MemoryAuditLog {
    fn append(&self, entry: &AuditEntry) -> AuditResult<()> {
        self.entries
            .lock()
            .map_err(|_| AuditError::Poisoned)?
            .push(entry.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JsonlAuditLog
// ---------------------------------------------------------------------------

/// File-backed audit log: one JSON record per line, opened in append mode.
///
/// Each record is written with a single `write_all` followed by a flush, so a
/// crash can at worst truncate the final line, never interleave two records.
#[derive(Debug)]
pub struct JsonlAuditLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlAuditLog {
    /// Open (or create) the log at `path`, creating parent directories as needed.
    pub fn open(path: impl AsRef<Path>) -> AuditResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlAuditLog {
    fn append(&self, entry: &AuditEntry) -> AuditResult<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut file = self.file.lock().map_err(|_| AuditError::Poisoned)?;
        file.write_all(&line)?;
        file.flush()?;
        Ok(())
    }
}

/// Read every record from a JSONL audit log. Blank lines are ignored.
pub fn read_audit_log(path: impl AsRef<Path>) -> AuditResult<Vec<AuditEntry>> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let mut entries = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry = serde_json::from_str(&line).map_err(|e| AuditError::Malformed {
            line: idx + 1,
            reason: e.to_string(),
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(seq: u64, allowed: bool) -> AuditEntry {
        AuditEntry {
            seq,
            timestamp: Utc::now(),
            run_id: Some("run-1".to_string()),
            agent_id: "code_agent:mod1".to_string(),
            action: Action::Write,
            resource: "module_code:mod1".to_string(),
            allowed,
            reason: (!allowed).then(|| "permission denied".to_string()),
            metadata: None,
        }
    }

    #[test]
    fn test_memory_log_preserves_append_order() {
        let log = MemoryAuditLog::new();
        assert!(log.is_empty());
        log.append(&entry(1, true)).unwrap();
        log.append(&entry(2, false)).unwrap();

        let entries = log.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].seq, 1);
        assert_eq!(entries[1].seq, 2);
        assert!(!entries[1].allowed);
    }

    #[test]
    fn test_jsonl_log_writes_one_line_per_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.jsonl");
        let log = JsonlAuditLog::open(&path).unwrap();

        log.append(&entry(1, true)).unwrap();
        log.append(&entry(2, false)).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 2);

        let back = read_audit_log(&path).unwrap();
        assert_eq!(back.len(), 2);
        assert_eq!(back[1].reason.as_deref(), Some("permission denied"));
    }

    #[test]
    fn test_jsonl_log_appends_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        JsonlAuditLog::open(&path)
            .unwrap()
            .append(&entry(1, true))
            .unwrap();
        JsonlAuditLog::open(&path)
            .unwrap()
            .append(&entry(2, true))
            .unwrap();

        assert_eq!(read_audit_log(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_denied_entry_omits_nothing_required() {
        let json = serde_json::to_value(entry(7, false)).unwrap();
        for key in ["seq", "timestamp", "agent_id", "action", "resource", "allowed", "reason"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["action"], "write");
    }

    #[test]
    fn test_read_reports_malformed_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let good = serde_json::to_string(&entry(1, true)).unwrap();
        std::fs::write(&path, format!("{good}\nnot json\n")).unwrap();

        match read_audit_log(&path) {
            Err(AuditError::Malformed { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected Malformed, got {other:?}"),
        }
    }
}
