//! Immutable pipeline artifacts and their on-disk representation.
//!
//! A raw artifact is the self-describing container one extraction run
//! produces: a metadata header plus one JSON record per logical unit.
//! Artifacts are written once via temp-file + rename and never edited;
//! a rerun produces a new file with a new timestamp and the latest
//! timestamp is authoritative.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EtlError, EtlResult};
use crate::source::SourceKind;

/// Timestamp format used in raw artifact file names. Lexicographic order
/// equals chronological order, so the latest artifact is the maximum name.
const ARTIFACT_TS_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Metadata header of a raw artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawArtifactMeta {
    pub source: SourceKind,
    pub extracted_at: DateTime<Utc>,
    /// Partition labels attempted this run, in configuration order.
    pub partitions_attempted: Vec<String>,
    /// Partition labels whose extraction exhausted retries.
    pub partitions_failed: Vec<String>,
    pub record_count: usize,
}

/// An immutable container holding the unparsed payloads collected by one
/// extraction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawArtifact {
    pub metadata: RawArtifactMeta,
    pub records: Vec<Value>,
}

impl RawArtifact {
    pub fn new(
        source: SourceKind,
        extracted_at: DateTime<Utc>,
        partitions_attempted: Vec<String>,
        partitions_failed: Vec<String>,
        records: Vec<Value>,
    ) -> Self {
        Self {
            metadata: RawArtifactMeta {
                source,
                extracted_at,
                partitions_attempted,
                partitions_failed,
                record_count: records.len(),
            },
            records,
        }
    }

    /// File name for this artifact, e.g. `stations_20250806T141500Z.json`.
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}.json",
            self.metadata.source.as_str(),
            self.metadata.extracted_at.format(ARTIFACT_TS_FORMAT)
        )
    }

    /// Persist the artifact under `dir`, atomically. Refuses to replace an
    /// existing artifact: raw artifacts are superseded, never overwritten.
    pub fn write_to(&self, dir: &Path) -> EtlResult<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        if path.exists() {
            return Err(EtlError::Artifact(format!(
                "raw artifact already exists: {}",
                path.display()
            )));
        }
        let body = serde_json::to_vec_pretty(self)?;
        write_atomic(&path, &body)?;
        Ok(path)
    }

    pub fn read_from(path: &Path) -> EtlResult<Self> {
        let body = fs::read(path)?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// Latest artifact for a source under `dir`, by extraction timestamp.
    pub fn latest_in(dir: &Path, source: SourceKind) -> EtlResult<Option<PathBuf>> {
        let prefix = format!("{}_", source.as_str());
        let mut latest: Option<PathBuf> = None;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let name = match path.file_name().and_then(|n| n.to_str()) {
                Some(name) => name,
                None => continue,
            };
            if !name.starts_with(&prefix) || !name.ends_with(".json") {
                continue;
            }
            match &latest {
                Some(prev) if prev.file_name() >= path.file_name() => {}
                _ => latest = Some(path),
            }
        }
        Ok(latest)
    }
}

/// The normalized tabular file one transform run produces, plus the
/// metadata the loader and run report need. Owned by the transformer;
/// consumed read-only by the loader.
#[derive(Debug, Clone, Serialize)]
pub struct StagingArtifact {
    pub source: SourceKind,
    pub path: PathBuf,
    pub row_count: usize,
    /// Records excluded because the mapper reported an error.
    pub excluded_count: usize,
    /// File name of the raw artifact this was derived from.
    pub raw_artifact: String,
    pub created_at: DateTime<Utc>,
}

/// Write `contents` to `path` through a sibling temp file and an atomic
/// rename, so a crash mid-write never leaves a partial file visible.
pub fn write_atomic(path: &Path, contents: &[u8]) -> EtlResult<()> {
    let tmp = path.with_extension("partial");
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn artifact_at(ts: DateTime<Utc>) -> RawArtifact {
        RawArtifact::new(
            SourceKind::Stations,
            ts,
            vec!["CA".into(), "NY".into()],
            vec![],
            vec![json!({"id": 1}), json!({"id": 2})],
        )
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let ts = Utc.with_ymd_and_hms(2025, 8, 6, 14, 15, 0).unwrap();
        let artifact = artifact_at(ts);

        let path = artifact.write_to(dir.path()).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "stations_20250806T141500Z.json"
        );

        let loaded = RawArtifact::read_from(&path).unwrap();
        assert_eq!(loaded.metadata.record_count, 2);
        assert_eq!(loaded.records, artifact.records);
    }

    #[test]
    fn refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let ts = Utc.with_ymd_and_hms(2025, 8, 6, 14, 15, 0).unwrap();
        artifact_at(ts).write_to(dir.path()).unwrap();

        let err = artifact_at(ts).write_to(dir.path()).unwrap_err();
        assert!(matches!(err, EtlError::Artifact(_)));
    }

    #[test]
    fn latest_picks_newest_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        for hour in [9, 15, 12] {
            let ts = Utc.with_ymd_and_hms(2025, 8, 6, hour, 0, 0).unwrap();
            artifact_at(ts).write_to(dir.path()).unwrap();
        }
        // Other sources must not be picked up.
        RawArtifact::new(
            SourceKind::Weather,
            Utc.with_ymd_and_hms(2025, 8, 6, 23, 0, 0).unwrap(),
            vec![],
            vec![],
            vec![],
        )
        .write_to(dir.path())
        .unwrap();

        let latest = RawArtifact::latest_in(dir.path(), SourceKind::Stations)
            .unwrap()
            .unwrap();
        assert!(latest.ends_with("stations_20250806T150000Z.json"));
    }

    #[test]
    fn atomic_write_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        write_atomic(&path, b"a,b\n1,2\n").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"a,b\n1,2\n");
        assert!(!path.with_extension("partial").exists());
    }
}
