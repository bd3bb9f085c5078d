//! Audit trail of every attempted operation.
//!
//! Records accumulate in memory for the duration of a run and are written
//! once, at the end, through an [`AuditSink`]. An empty trail is never
//! written. The trail is the input for any manual rollback, so each record
//! carries the exact statement text (except dry-run records at standard
//! detail, which carry only the description).

use crate::Result;
use crate::error::SqlPermsError;
use crate::executor::OperationStatus;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One attempted operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    /// Human-readable description of the operation
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    pub status: OperationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditRecord {
    /// Creates a record stamped with the current time.
    pub fn new(action: impl Into<String>, status: OperationStatus) -> Self {
        Self {
            timestamp: Utc::now(),
            action: action.into(),
            sql: None,
            status,
            error: None,
        }
    }

    /// Builder method to attach the statement text.
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    /// Builder method to attach an error message.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Count of audit records per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditTally {
    pub applied: usize,
    pub simulated: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Append-only, in-memory audit trail for one run.
#[derive(Debug, Default)]
pub struct AuditRecorder {
    records: Vec<AuditRecord>,
}

impl AuditRecorder {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record.
    pub fn record(&mut self, record: AuditRecord) {
        self.records.push(record);
    }

    /// Records in the order they were appended.
    pub fn records(&self) -> &[AuditRecord] {
        &self.records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Counts records by status.
    pub fn tally(&self) -> AuditTally {
        let mut tally = AuditTally::default();
        for record in &self.records {
            match record.status {
                OperationStatus::Applied => tally.applied += 1,
                OperationStatus::Simulated => tally.simulated += 1,
                OperationStatus::Failed => tally.failed += 1,
                OperationStatus::Skipped => tally.skipped += 1,
            }
        }
        tally
    }

    /// Writes the trail through `sink`, once.
    ///
    /// Returns `Ok(None)` without touching the sink when there is nothing
    /// to write, otherwise the location reported by the sink.
    ///
    /// # Errors
    /// Returns [`SqlPermsError::AuditFlush`] when the sink fails. Callers
    /// treat this as a degraded run, not a failed one.
    pub async fn flush(&self, sink: &dyn AuditSink) -> Result<Option<String>> {
        if self.records.is_empty() {
            return Ok(None);
        }
        sink.persist(&self.records).await.map(Some)
    }
}

/// Durable destination for an audit trail.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persists all records as one unit and returns where they went.
    ///
    /// # Errors
    /// Returns [`SqlPermsError::AuditFlush`] on any failure.
    async fn persist(&self, records: &[AuditRecord]) -> Result<String>;
}

/// Writes the trail as a pretty-printed JSON array.
///
/// The file is written next to its final location and then renamed into
/// place, so readers never observe a partial array.
#[derive(Debug, Clone)]
pub struct JsonFileSink {
    target: FileTarget,
}

#[derive(Debug, Clone)]
enum FileTarget {
    Directory(PathBuf),
    Path(PathBuf),
}

impl JsonFileSink {
    /// Writes `sql_permissions_audit_<YYYYmmdd_HHMMSS>.json` into `directory`.
    pub fn in_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            target: FileTarget::Directory(directory.into()),
        }
    }

    /// Writes to exactly `path`.
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self {
            target: FileTarget::Path(path.into()),
        }
    }

    /// File name used for directory targets at the given local time.
    pub fn file_name_for(time: chrono::DateTime<chrono::Local>) -> String {
        format!("sql_permissions_audit_{}.json", time.format("%Y%m%d_%H%M%S"))
    }

    fn resolve(&self) -> PathBuf {
        match &self.target {
            FileTarget::Directory(dir) => dir.join(Self::file_name_for(chrono::Local::now())),
            FileTarget::Path(path) => path.clone(),
        }
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[async_trait]
impl AuditSink for JsonFileSink {
    async fn persist(&self, records: &[AuditRecord]) -> Result<String> {
        let path = self.resolve();

        let json = serde_json::to_string_pretty(records)
            .map_err(|e| SqlPermsError::audit_flush("JSON serialization", e))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                SqlPermsError::audit_flush(format!("Failed to create {}", parent.display()), e)
            })?;
        }

        let temp = temp_path_for(&path);
        tokio::fs::write(&temp, json).await.map_err(|e| {
            SqlPermsError::audit_flush(format!("Failed to write {}", temp.display()), e)
        })?;

        if let Err(e) = tokio::fs::rename(&temp, &path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(SqlPermsError::audit_flush(
                format!("Failed to move audit file into {}", path.display()),
                e,
            ));
        }

        Ok(path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_records() -> AuditRecorder {
        let mut recorder = AuditRecorder::new();
        recorder.record(
            AuditRecord::new("Add 'svc' to role 'db_datareader' in database 'App'", OperationStatus::Applied)
                .with_sql("USE [App];\nALTER ROLE [db_datareader] ADD MEMBER [svc]"),
        );
        recorder.record(
            AuditRecord::new("Grant EXECUTE to 'svc' in 'App'", OperationStatus::Failed)
                .with_sql("USE [App];\nGRANT EXECUTE TO [svc]")
                .with_error("Cannot find the user 'svc'"),
        );
        recorder.record(AuditRecord::new("Create login: sqluser", OperationStatus::Skipped));
        recorder
    }

    #[test]
    fn test_tally() {
        let tally = sample_records().tally();
        assert_eq!(
            tally,
            AuditTally {
                applied: 1,
                simulated: 0,
                failed: 1,
                skipped: 1
            }
        );
    }

    #[test]
    fn test_record_serialization_shape() {
        let recorder = sample_records();
        let value = serde_json::to_value(recorder.records()).unwrap();
        let array = value.as_array().unwrap();

        assert_eq!(array[0]["status"], "applied");
        assert!(array[0].get("error").is_none());
        assert!(array[0]["timestamp"].is_string());

        assert_eq!(array[1]["status"], "failed");
        assert_eq!(array[1]["error"], "Cannot find the user 'svc'");

        assert_eq!(array[2]["status"], "skipped");
        assert!(array[2].get("sql").is_none());
    }

    #[test]
    fn test_file_name_format() {
        use chrono::TimeZone;
        let time = chrono::Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            JsonFileSink::file_name_for(time),
            "sql_permissions_audit_20240309_140507.json"
        );
    }

    #[tokio::test]
    async fn test_json_file_sink_writes_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.json");
        let sink = JsonFileSink::at_path(&path);

        let location = sample_records().flush(&sink).await.unwrap();
        assert_eq!(location, Some(path.display().to_string()));

        let written: Vec<AuditRecord> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written.len(), 3);
        assert_eq!(written[1].status, OperationStatus::Failed);
        assert!(!temp_path_for(&path).exists());
    }

    #[tokio::test]
    async fn test_directory_sink_creates_timestamped_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::in_directory(dir.path().join("audits"));

        let location = sample_records().flush(&sink).await.unwrap().unwrap();
        assert!(location.contains("sql_permissions_audit_"));
        assert!(std::path::Path::new(&location).exists());
    }

    #[tokio::test]
    async fn test_empty_recorder_does_not_flush() {
        let dir = tempfile::tempdir().unwrap();
        let sink = JsonFileSink::in_directory(dir.path());

        let location = AuditRecorder::new().flush(&sink).await.unwrap();
        assert!(location.is_none());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_unwritable_target_reports_flush_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();
        let sink = JsonFileSink::at_path(blocker.join("audit.json"));

        let error = sample_records().flush(&sink).await.unwrap_err();
        assert!(matches!(error, SqlPermsError::AuditFlush { .. }));
        assert!(!error.is_fatal());
    }
}
