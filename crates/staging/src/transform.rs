//! Applies a schema mapping across a whole raw artifact.

use std::path::PathBuf;

use chrono::Utc;
use tracing::{info, instrument, warn};

use etl_common::artifact::write_atomic;
use etl_common::{EtlError, EtlResult, RawArtifact, SourceKind, StagingArtifact};

use crate::mapping::SchemaMapping;
use crate::quality;

/// Turns one raw artifact into one staging CSV.
///
/// Records are processed in input order so row numbers line up with
/// loader diagnostics. Records the mapper rejects are excluded and
/// counted; a run where nothing maps is fatal.
pub struct Transformer {
    processed_dir: PathBuf,
}

impl Transformer {
    pub fn new(processed_dir: impl Into<PathBuf>) -> Self {
        Self {
            processed_dir: processed_dir.into(),
        }
    }

    /// Output path for a source's staging file.
    pub fn staging_path(&self, source: SourceKind) -> PathBuf {
        self.processed_dir
            .join(format!("{}_transformed.csv", source.as_str()))
    }

    #[instrument(skip_all, fields(source = %artifact.metadata.source, records = artifact.records.len()))]
    pub fn transform(
        &self,
        artifact: &RawArtifact,
        mapping: &SchemaMapping,
    ) -> EtlResult<StagingArtifact> {
        mapping.validate()?;

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(mapping.target_fields())
            .map_err(|e| EtlError::Csv(e.to_string()))?;

        let mut written = 0usize;
        let mut excluded = 0usize;
        for (row, record) in artifact.records.iter().enumerate() {
            match mapping.map_record(record) {
                Ok(values) => {
                    writer
                        .write_record(&values)
                        .map_err(|e| EtlError::Csv(e.to_string()))?;
                    written += 1;
                }
                Err(err) => {
                    warn!(row, error = %err, "record excluded from staging output");
                    excluded += 1;
                }
            }
        }

        if written == 0 {
            return Err(EtlError::TransformFailed(if excluded == 0 {
                "raw artifact contains no records".to_string()
            } else {
                format!("all {excluded} records failed mapping")
            }));
        }
        if excluded > 0 {
            warn!(excluded, written, "transform completed with exclusions");
        }

        let body = writer
            .into_inner()
            .map_err(|e| EtlError::Csv(e.to_string()))?;

        std::fs::create_dir_all(&self.processed_dir)?;
        let path = self.staging_path(artifact.metadata.source);
        write_atomic(&path, &body)?;

        quality::validate_staging_file(&path, &mapping.target_fields())?;

        info!(
            path = %path.display(),
            rows = written,
            excluded,
            "staging artifact written"
        );

        Ok(StagingArtifact {
            source: artifact.metadata.source,
            path,
            row_count: written,
            excluded_count: excluded,
            raw_artifact: artifact.file_name(),
            created_at: Utc::now(),
        })
    }
}
