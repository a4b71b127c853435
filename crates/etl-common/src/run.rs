//! Per-run metadata for auditability.
//!
//! Created at orchestration start, updated by each stage as it
//! completes, and persisted as a JSON run report at run end.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::artifact::write_atomic;
use crate::error::EtlResult;
use crate::source::SourceKind;

/// Status of one pipeline stage for one dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

/// Outcome of a single stage: status plus in/out row counts and the
/// error that terminated it, if any.
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_in: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_out: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for StageReport {
    fn default() -> Self {
        Self {
            status: StageStatus::Pending,
            rows_in: None,
            rows_out: None,
            error: None,
        }
    }
}

/// Everything recorded about one dataset within one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct DatasetRun {
    pub source: SourceKind,
    pub extract: StageReport,
    pub transform: StageReport,
    pub load: StageReport,
    /// Partition labels that exhausted retries during extraction.
    pub failed_partitions: Vec<String>,
    /// Records the transformer excluded because mapping failed.
    pub excluded_records: usize,
    /// Rows the warehouse copy skipped as malformed.
    pub rejected_rows: usize,
    /// Duplicate (user id, start time) keys observed in the sessions
    /// export. Diagnostic only; no dedup is performed.
    pub duplicate_keys: usize,
}

impl DatasetRun {
    fn new(source: SourceKind) -> Self {
        Self {
            source,
            extract: StageReport::default(),
            transform: StageReport::default(),
            load: StageReport::default(),
            failed_partitions: Vec::new(),
            excluded_records: 0,
            rejected_rows: 0,
            duplicate_keys: 0,
        }
    }

    pub fn failed(&self) -> bool {
        [&self.extract, &self.transform, &self.load]
            .iter()
            .any(|s| s.status == StageStatus::Failed)
    }
}

/// Per-pipeline-run record, serialized for logging and auditing.
#[derive(Debug, Clone, Serialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub datasets: Vec<DatasetRun>,
}

impl RunMetadata {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            datasets: Vec::new(),
        }
    }

    /// The record for `source`, created on first access.
    pub fn dataset_mut(&mut self, source: SourceKind) -> &mut DatasetRun {
        if let Some(idx) = self.datasets.iter().position(|d| d.source == source) {
            return &mut self.datasets[idx];
        }
        self.datasets.push(DatasetRun::new(source));
        self.datasets.last_mut().expect("just pushed")
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn succeeded(&self) -> bool {
        !self.datasets.iter().any(|d| d.failed())
    }

    /// Persist the run report under `dir`, named by start time and run id.
    pub fn write_report(&self, dir: &Path) -> EtlResult<PathBuf> {
        std::fs::create_dir_all(dir)?;
        let name = format!(
            "run_{}_{}.json",
            self.started_at.format("%Y%m%dT%H%M%SZ"),
            self.run_id
        );
        let path = dir.join(name);
        write_atomic(&path, &serde_json::to_vec_pretty(self)?)?;
        Ok(path)
    }
}

impl Default for RunMetadata {
    fn default() -> Self {
        Self::new()
    }
}
