//! Batch CSV export ingestion.
//!
//! The sessions dataset arrives as a CSV export rather than an API. It
//! still produces a raw artifact so the transform and load stages see
//! all three sources the same way: one JSON record per row, keyed by
//! the export's header.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use etl_common::{EtlError, EtlResult, RawArtifact, SourceKind};

/// The configured batch export of charging sessions.
pub struct SessionExport {
    path: PathBuf,
}

impl SessionExport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the export and persist it as a raw artifact. The whole file
    /// is the single extraction partition: an unreadable or empty export
    /// is the fatal zero-partitions-succeeded outcome.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    pub fn extract(&self, raw_dir: &Path) -> EtlResult<(RawArtifact, PathBuf)> {
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| {
                EtlError::ExtractionFailed(format!(
                    "cannot read sessions export {}: {e}",
                    self.path.display()
                ))
            })?;

        let headers = reader
            .headers()
            .map_err(|e| EtlError::Csv(e.to_string()))?
            .clone();

        let mut records = Vec::new();
        let mut skipped = 0usize;
        for row in reader.records() {
            let row = match row {
                Ok(row) => row,
                Err(err) => {
                    warn!(error = %err, "skipping unreadable export row");
                    skipped += 1;
                    continue;
                }
            };
            let mut object = Map::with_capacity(headers.len());
            for (header, value) in headers.iter().zip(row.iter()) {
                object.insert(header.to_string(), Value::String(value.to_string()));
            }
            records.push(Value::Object(object));
        }

        if records.is_empty() {
            return Err(EtlError::ExtractionFailed(format!(
                "sessions export {} contains no rows",
                self.path.display()
            )));
        }

        let export_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string());

        let artifact = RawArtifact::new(
            SourceKind::Sessions,
            Utc::now(),
            vec![export_name],
            vec![],
            records,
        );
        let path = artifact.write_to(raw_dir)?;

        info!(
            path = %path.display(),
            records = artifact.metadata.record_count,
            skipped,
            "sessions export ingested"
        );

        Ok((artifact, path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_export(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("ev_charging_patterns.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn rows_become_records_keyed_by_header() {
        let dir = tempfile::tempdir().unwrap();
        let export = write_export(
            dir.path(),
            "User ID,Vehicle Model,Energy Consumed (kWh)\n\
             U1,Model 3,42.5\n\
             U2,Leaf,18.0\n",
        );

        let (artifact, _) = SessionExport::new(&export).extract(dir.path()).unwrap();

        assert_eq!(artifact.metadata.source, SourceKind::Sessions);
        assert_eq!(artifact.metadata.record_count, 2);
        assert_eq!(artifact.records[0]["User ID"], "U1");
        assert_eq!(artifact.records[1]["Energy Consumed (kWh)"], "18.0");
        assert_eq!(
            artifact.metadata.partitions_attempted,
            vec!["ev_charging_patterns.csv"]
        );
    }

    #[test]
    fn empty_export_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let export = write_export(dir.path(), "User ID,Vehicle Model\n");

        let err = SessionExport::new(&export).extract(dir.path()).unwrap_err();
        assert!(matches!(err, EtlError::ExtractionFailed(_)));
    }

    #[test]
    fn missing_export_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = SessionExport::new(dir.path().join("absent.csv"))
            .extract(dir.path())
            .unwrap_err();
        assert!(matches!(err, EtlError::ExtractionFailed(_)));
    }
}
