/// Execution audit trail
///
/// One JSON object per line for every lifecycle event of a request, keyed by
/// execution id. Source code is never recorded, only its SHA-256 digest.
use crate::config::types::{ExecutionId, Language, OutcomeKind, Result, SandboxError};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    ExecutionStart {
        language: Language,
        source_sha256: String,
        source_bytes: usize,
        stdin_bytes: usize,
    },
    IdentityAcquired {
        account: String,
        uid: u32,
    },
    ForcedKill {
        reason: String,
    },
    ExecutionEnd {
        outcome: OutcomeKind,
        exit_code: Option<i32>,
        signal: Option<String>,
        wall_time_ms: Option<u64>,
    },
    ExecutionAborted {
        error: String,
    },
    IdentityReleased {
        account: String,
    },
    CleanupFailure {
        account: String,
        errors: Vec<String>,
    },
    StaleAccountSwept {
        account: String,
    },
}

impl AuditEvent {
    fn is_failure(&self) -> bool {
        matches!(
            self,
            AuditEvent::ForcedKill { .. }
                | AuditEvent::ExecutionAborted { .. }
                | AuditEvent::CleanupFailure { .. }
        )
    }
}

#[derive(Debug, Serialize)]
struct AuditRecord<'a> {
    timestamp: DateTime<Utc>,
    execution_id: &'a str,
    process_id: u32,
    #[serde(flatten)]
    event: &'a AuditEvent,
}

/// Hex SHA-256 of submitted source
pub fn source_digest(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Audit sink: always the `log` facade, plus a file when configured
pub struct AuditLog {
    file: Option<Mutex<File>>,
    path: Option<PathBuf>,
}

impl AuditLog {
    /// Log-only trail
    pub fn disabled() -> Self {
        Self {
            file: None,
            path: None,
        }
    }

    pub fn open(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::disabled());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SandboxError::Config(format!("Failed to create audit log directory: {}", e))
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| SandboxError::Config(format!("Failed to open audit log: {}", e)))?;

        Ok(Self {
            file: Some(Mutex::new(file)),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record an event. Write failures are logged, never propagated.
    pub fn record(&self, id: &str, event: AuditEvent) {
        let record = AuditRecord {
            timestamp: Utc::now(),
            execution_id: id,
            process_id: std::process::id(),
            event: &event,
        };
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to serialize audit event for {}: {}", id, e);
                return;
            }
        };

        if event.is_failure() {
            warn!("AUDIT {}", line);
        } else {
            info!("AUDIT {}", line);
        }

        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = writeln!(file, "{}", line).and_then(|_| file.flush()) {
                error!("Failed to write audit log: {}", e);
            }
        }
    }

    pub fn execution_start(&self, id: &ExecutionId, language: Language, source: &str, stdin: Option<&str>) {
        self.record(
            id.as_str(),
            AuditEvent::ExecutionStart {
                language,
                source_sha256: source_digest(source),
                source_bytes: source.len(),
                stdin_bytes: stdin.map_or(0, str::len),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_digest() {
        assert_eq!(
            source_digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_file_trail_is_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit").join("trail.jsonl");
        let audit = AuditLog::open(Some(&path)).unwrap();
        let id = ExecutionId::parse("ubxaudit").unwrap();

        audit.execution_start(&id, Language::Python, "print('secret')", None);
        audit.record(
            id.as_str(),
            AuditEvent::ExecutionEnd {
                outcome: OutcomeKind::Success,
                exit_code: Some(0),
                signal: None,
                wall_time_ms: Some(12),
            },
        );

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "execution_start");
        assert_eq!(lines[0]["execution_id"], "ubxaudit");
        assert_eq!(lines[0]["language"], "python");
        assert!(!content.contains("secret"));
        assert_eq!(lines[1]["event"], "execution_end");
        assert_eq!(lines[1]["outcome"], "success");
        assert!(lines[1]["timestamp"].is_string());
    }

    #[test]
    fn test_disabled_trail_has_no_path() {
        let audit = AuditLog::disabled();
        assert!(audit.path().is_none());
        audit.record("ubxnone", AuditEvent::ForcedKill { reason: "test".into() });
    }
}
