//! Result-record model and the directory scan that buckets records by
//! composite key.
//!
//! A record is one persisted JSON document describing a single benchmark
//! attempt (model x website x task). Identity is strict: a record missing
//! any key component is corrupted, never inferred from its file name.
//! Extra payload fields (logs, generated code, validation detail) are
//! carried opaquely and never interpreted here.

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::infra::io::read_file_bytes;
use crate::infra::walk::ResultFileWalker;

/// Separator used in composite keys: `model__website__task`.
pub const KEY_SEPARATOR: &str = "__";

/// Build the composite key identifying logically equivalent attempts.
pub fn composite_key(model: &str, website: &str, task_id: &str) -> String {
    format!("{model}{KEY_SEPARATOR}{website}{KEY_SEPARATOR}{task_id}")
}

/// Why a result file was classified corrupted.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing or empty required field `{0}`")]
    MissingField(&'static str),
}

/// Fields consumed from a result document. Unknown fields are ignored on
/// purpose; records are never rewritten, so nothing is lost.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub website: Option<String>,

    #[serde(default)]
    pub task: Option<TaskRef>,

    /// Absent means unknown; treated as failed everywhere.
    #[serde(default)]
    pub success: Option<bool>,

    #[serde(default)]
    pub timestamp: Option<String>,

    /// Retry counter assigned by the benchmark runner (1-based).
    #[serde(default)]
    pub attempt: Option<u32>,

    /// Per-retry sub-records, when the runner kept them.
    #[serde(default)]
    pub attempts: Option<Vec<AttemptRecord>>,

    #[serde(default)]
    pub total_execution_time: Option<f64>,

    #[serde(default)]
    pub execution_time: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskRef {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttemptRecord {
    #[serde(default)]
    pub success: bool,
}

impl ResultRecord {
    pub fn is_success(&self) -> bool {
        self.success == Some(true)
    }

    /// Count of passing sub-attempts; falls back to the top-level flag
    /// when the runner kept no attempt list.
    pub fn successful_attempts(&self) -> usize {
        match &self.attempts {
            Some(list) => list.iter().filter(|a| a.success).count(),
            None => usize::from(self.is_success()),
        }
    }

    pub fn attempt_number(&self) -> u32 {
        self.attempt.unwrap_or(1)
    }

    /// Wall-clock duration in milliseconds; whichever field the runner set.
    pub fn execution_time_ms(&self) -> f64 {
        self.total_execution_time
            .or(self.execution_time)
            .unwrap_or(0.0)
    }

    /// Parsed timestamp; records with a missing or malformed timestamp
    /// sort as the epoch rather than being rejected (the field is a
    /// tie-breaker, not identity).
    pub fn timestamp_utc(&self) -> DateTime<Utc> {
        self.timestamp
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

/// A validated record plus its extracted identity components.
#[derive(Debug, Clone)]
pub struct ParsedRecord {
    pub model: String,
    pub website: String,
    pub task_id: String,
    pub record: ResultRecord,
}

/// Parse and strictly validate one result document.
pub fn parse_record(bytes: &[u8]) -> Result<ParsedRecord, RecordError> {
    let record: ResultRecord = serde_json::from_slice(bytes)?;

    let model = required(record.model.as_deref(), "model")?;
    let website = required(record.website.as_deref(), "website")?;
    let task_id = required(
        record.task.as_ref().and_then(|t| t.id.as_deref()),
        "task.id",
    )?;

    Ok(ParsedRecord {
        model,
        website,
        task_id,
        record,
    })
}

fn required(value: Option<&str>, field: &'static str) -> Result<String, RecordError> {
    match value {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(RecordError::MissingField(field)),
    }
}

/// One in-scope file with its validated record and identity.
#[derive(Debug, Clone)]
pub struct RecordFile {
    pub path: Utf8PathBuf,
    pub filename: String,
    pub size_bytes: u64,
    pub model: String,
    pub website: String,
    pub task_id: String,
    pub key: String,
    pub record: ResultRecord,
}

/// A file that failed parse or validation. Never a keeper; always slated
/// for removal.
#[derive(Debug, Clone)]
pub struct CorruptedFile {
    pub path: Utf8PathBuf,
    pub filename: String,
    pub error: String,
}

/// Everything a scan learned about a results directory.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Records bucketed by composite key, in first-seen (sorted-scan) order.
    pub groups: IndexMap<String, Vec<RecordFile>>,
    pub corrupted: Vec<CorruptedFile>,
    pub total_files: usize,
}

impl ScanOutcome {
    pub fn records(&self) -> impl Iterator<Item = &RecordFile> {
        self.groups.values().flatten()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn duplicate_group_count(&self) -> usize {
        self.groups.values().filter(|g| g.len() > 1).count()
    }
}

/// Scan every in-scope result file under `dir` and bucket it by composite
/// key. Corrupted files are collected, not fatal; an unreadable directory
/// is fatal before any other work happens.
pub fn scan_results(dir: &Utf8Path, walker: &ResultFileWalker) -> Result<ScanOutcome> {
    if !dir.is_dir() {
        bail!("results directory not found: {dir}");
    }

    // Surface permission problems up front; the walker drops IO errors.
    std::fs::read_dir(dir.as_std_path())
        .with_context(|| format!("results directory not readable: {dir}"))?;

    let mut outcome = ScanOutcome::default();

    for path in walker.walk_files(dir.as_std_path()) {
        outcome.total_files += 1;

        let path = match Utf8PathBuf::from_path_buf(path) {
            Ok(p) => p,
            Err(p) => {
                let lossy = Utf8PathBuf::from(p.to_string_lossy().into_owned());
                warn!(path = %lossy, "skipping non UTF-8 path");
                let filename = lossy.file_name().unwrap_or_default().to_string();
                outcome.corrupted.push(CorruptedFile {
                    path: lossy,
                    filename,
                    error: "non UTF-8 path".to_string(),
                });
                continue;
            }
        };
        let filename = path.file_name().unwrap_or_default().to_string();

        let content = match read_file_bytes(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!(file = %filename, error = %e, "unreadable result file");
                outcome.corrupted.push(CorruptedFile {
                    path,
                    filename,
                    error: e.to_string(),
                });
                continue;
            }
        };

        match parse_record(content.as_bytes()) {
            Ok(parsed) => {
                let key = composite_key(&parsed.model, &parsed.website, &parsed.task_id);
                outcome.groups.entry(key.clone()).or_default().push(RecordFile {
                    path,
                    filename,
                    size_bytes: content.len() as u64,
                    model: parsed.model,
                    website: parsed.website,
                    task_id: parsed.task_id,
                    key,
                    record: parsed.record,
                });
            }
            Err(e) => {
                warn!(file = %filename, error = %e, "corrupted result file");
                outcome.corrupted.push(CorruptedFile {
                    path,
                    filename,
                    error: e.to_string(),
                });
            }
        }
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_json(model: &str, website: &str, task: &str, success: bool) -> String {
        format!(
            r#"{{"model":"{model}","website":"{website}","task":{{"id":"{task}"}},"success":{success},"timestamp":"2024-01-01T00:00:00Z"}}"#
        )
    }

    #[test]
    fn test_parse_valid_record() {
        let parsed = parse_record(record_json("m1", "w1", "t1", true).as_bytes()).unwrap();
        assert_eq!(parsed.model, "m1");
        assert_eq!(parsed.website, "w1");
        assert_eq!(parsed.task_id, "t1");
        assert!(parsed.record.is_success());
    }

    #[test]
    fn test_missing_field_is_corrupted() {
        let err = parse_record(br#"{"model":"m1","website":"w1","success":true}"#).unwrap_err();
        assert!(matches!(err, RecordError::MissingField("task.id")));

        let err = parse_record(br#"{"website":"w1","task":{"id":"t1"}}"#).unwrap_err();
        assert!(matches!(err, RecordError::MissingField("model")));

        // Empty strings are as bad as absent values.
        let err =
            parse_record(br#"{"model":"","website":"w1","task":{"id":"t1"}}"#).unwrap_err();
        assert!(matches!(err, RecordError::MissingField("model")));
    }

    #[test]
    fn test_invalid_json_is_corrupted() {
        let err = parse_record(b"{not valid").unwrap_err();
        assert!(matches!(err, RecordError::Json(_)));
    }

    #[test]
    fn test_successful_attempts_fallback() {
        let record: ResultRecord =
            serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert_eq!(record.successful_attempts(), 1);

        let record: ResultRecord = serde_json::from_str(
            r#"{"success":true,"attempts":[{"success":false},{"success":true},{"success":true}]}"#,
        )
        .unwrap();
        assert_eq!(record.successful_attempts(), 2);
    }

    #[test]
    fn test_execution_time_prefers_total() {
        let record: ResultRecord =
            serde_json::from_str(r#"{"totalExecutionTime":1200.5,"executionTime":99.0}"#).unwrap();
        assert_eq!(record.execution_time_ms(), 1200.5);

        let record: ResultRecord =
            serde_json::from_str(r#"{"executionTime":99.0}"#).unwrap();
        assert_eq!(record.execution_time_ms(), 99.0);
    }

    #[test]
    fn test_bad_timestamp_sorts_as_epoch() {
        let record: ResultRecord =
            serde_json::from_str(r#"{"timestamp":"yesterday-ish"}"#).unwrap();
        assert_eq!(record.timestamp_utc(), DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn test_scan_groups_by_composite_key() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap();

        std::fs::write(dir.join("result_a.json"), record_json("m1", "w1", "t1", false)).unwrap();
        std::fs::write(dir.join("result_b.json"), record_json("m1", "w1", "t1", true)).unwrap();
        std::fs::write(dir.join("result_c.json"), record_json("m1", "w2", "t1", true)).unwrap();
        std::fs::write(dir.join("result_d.json"), "{not valid").unwrap();

        let walker = ResultFileWalker::new("result_", &[]).unwrap();
        let scan = scan_results(dir, &walker).unwrap();

        assert_eq!(scan.total_files, 4);
        assert_eq!(scan.group_count(), 2);
        assert_eq!(scan.duplicate_group_count(), 1);
        assert_eq!(scan.corrupted.len(), 1);
        assert_eq!(scan.corrupted[0].filename, "result_d.json");

        let dup = scan.groups.get("m1__w1__t1").unwrap();
        assert_eq!(dup.len(), 2);
    }

    #[test]
    fn test_scan_missing_directory_is_fatal() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = Utf8Path::from_path(tmp.path()).unwrap().join("absent");

        let walker = ResultFileWalker::new("result_", &[]).unwrap();
        assert!(scan_results(&dir, &walker).is_err());
    }
}
