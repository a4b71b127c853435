//! Run orchestration: Extract → Transform → Load per dataset.
//!
//! Each dataset moves through its stages independently; a dataset's
//! fatal error marks it failed and the run continues with the others.
//! Everything staged successfully is then loaded in one warehouse
//! transaction. Retry never crosses a stage boundary: a failed run is
//! rerun externally, and all partial artifacts stay on disk.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use etl_common::{
    EtlError, EtlResult, QueryPartition, RawArtifact, RunMetadata, SourceKind, StageStatus,
    StagingArtifact,
};
use extraction::{Extractor, RateLimiter, RetryingFetcher, SessionExport, StationSource, WeatherSource};
use staging::{mapping_for, quality, Transformer};
use warehouse::{StagingLoader, WarehouseSession};

use crate::config::PipelineConfig;

/// Sequences the three stages for each dataset and tracks run metadata.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
}

impl PipelineOrchestrator {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Execute one pipeline run over `sources`. The returned metadata is
    /// also persisted as a JSON run report.
    #[instrument(skip_all, fields(sources = sources.len()))]
    pub async fn run<S: WarehouseSession>(
        &self,
        loader: &mut StagingLoader<S>,
        sources: &[SourceKind],
        cancel: &CancellationToken,
    ) -> EtlResult<RunMetadata> {
        let mut run = RunMetadata::new();
        info!(run_id = %run.run_id, "pipeline run started");

        let mut staged = Vec::new();
        for &source in sources {
            if cancel.is_cancelled() {
                warn!(source = %source, "run cancelled before dataset started");
                break;
            }
            match self.extract_and_transform(source, &mut run, cancel).await {
                Ok(artifact) => staged.push(artifact),
                Err(EtlError::Cancelled) => {
                    warn!(source = %source, "dataset cancelled");
                    break;
                }
                Err(err) => {
                    // Already recorded against its stage; keep going with
                    // the remaining datasets.
                    error!(source = %source, error = %err, "dataset failed");
                }
            }
        }

        if !staged.is_empty() && !cancel.is_cancelled() {
            self.load_batch(loader, &staged, &mut run, cancel).await;
        }

        run.finish();
        let report = run.write_report(&self.config.runtime.report_dir)?;
        info!(
            run_id = %run.run_id,
            succeeded = run.succeeded(),
            report = %report.display(),
            "pipeline run finished"
        );

        Ok(run)
    }

    /// Extraction and transformation for one dataset, with run metadata
    /// updated at every transition.
    async fn extract_and_transform(
        &self,
        source: SourceKind,
        run: &mut RunMetadata,
        cancel: &CancellationToken,
    ) -> EtlResult<StagingArtifact> {
        run.dataset_mut(source).extract.status = StageStatus::Running;

        let (artifact, _path) = match self.extract(source, cancel).await {
            Ok(extracted) => extracted,
            Err(err) => {
                let report = &mut run.dataset_mut(source).extract;
                report.status = StageStatus::Failed;
                report.error = Some(err.to_string());
                return Err(err);
            }
        };

        {
            let dataset = run.dataset_mut(source);
            dataset.failed_partitions = artifact.metadata.partitions_failed.clone();
            dataset.extract.status = StageStatus::Succeeded;
            dataset.extract.rows_out = Some(artifact.metadata.record_count);
            if source == SourceKind::Sessions {
                dataset.duplicate_keys = quality::duplicate_session_keys(&artifact.records);
                if dataset.duplicate_keys > 0 {
                    warn!(
                        duplicates = dataset.duplicate_keys,
                        "duplicate session keys observed in export"
                    );
                }
            }
            dataset.transform.status = StageStatus::Running;
            dataset.transform.rows_in = Some(artifact.metadata.record_count);
        }

        let transformer = Transformer::new(self.config.runtime.processed_dir());
        match transformer.transform(&artifact, &mapping_for(source)) {
            Ok(staged) => {
                let dataset = run.dataset_mut(source);
                dataset.transform.status = StageStatus::Succeeded;
                dataset.transform.rows_out = Some(staged.row_count);
                dataset.excluded_records = staged.excluded_count;
                Ok(staged)
            }
            Err(err) => {
                let report = &mut run.dataset_mut(source).transform;
                report.status = StageStatus::Failed;
                report.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    async fn extract(
        &self,
        source: SourceKind,
        cancel: &CancellationToken,
    ) -> EtlResult<(RawArtifact, PathBuf)> {
        let raw_dir = self.config.runtime.raw_dir();
        match source {
            SourceKind::Sessions => {
                SessionExport::new(&self.config.sessions.export_path).extract(&raw_dir)
            }
            SourceKind::Stations => {
                let fetcher = self.fetcher()?;
                let extractor = Extractor::new(
                    StationSource {
                        base_url: self.config.stations.base_url.clone(),
                        api_key: self.config.stations.api_key.clone(),
                        limit: self.config.stations.limit,
                    },
                    fetcher,
                    self.config.runtime.parallel_extractions,
                    raw_dir,
                );
                let partitions = partitions_of(&self.config.stations.states);
                extractor.extract(&partitions, cancel).await
            }
            SourceKind::Weather => {
                let fetcher = self.fetcher()?;
                let extractor = Extractor::new(
                    WeatherSource {
                        base_url: self.config.weather.base_url.clone(),
                        api_key: self.config.weather.api_key.clone(),
                    },
                    fetcher,
                    self.config.runtime.parallel_extractions,
                    raw_dir,
                );
                let partitions = partitions_of(&self.config.weather.cities);
                extractor.extract(&partitions, cancel).await
            }
        }
    }

    /// One rate limiter per source per run: grants are shared across that
    /// source's workers, never across sources.
    fn fetcher(&self) -> EtlResult<Arc<RetryingFetcher>> {
        let fetch_config = self.config.http.fetch_config();
        let limiter = Arc::new(RateLimiter::new(fetch_config.rate_limit_interval));
        Ok(Arc::new(RetryingFetcher::over_http(&fetch_config, limiter)?))
    }

    /// One warehouse transaction for everything staged this run.
    async fn load_batch<S: WarehouseSession>(
        &self,
        loader: &mut StagingLoader<S>,
        staged: &[StagingArtifact],
        run: &mut RunMetadata,
        cancel: &CancellationToken,
    ) {
        for artifact in staged {
            let dataset = run.dataset_mut(artifact.source);
            dataset.load.status = StageStatus::Running;
            dataset.load.rows_in = Some(artifact.row_count);
        }

        match loader.load(staged, cancel).await {
            Ok(result) => {
                for file in &result.files {
                    let dataset = run.dataset_mut(file.source);
                    dataset.load.status = StageStatus::Succeeded;
                    dataset.load.rows_out = Some(file.loaded as usize);
                    dataset.rejected_rows = file.rejected as usize;
                }
                if result.degraded {
                    warn!("load committed degraded: some rows were rejected");
                }
            }
            Err(err) => {
                error!(error = %err, "load failed; transaction rolled back");
                let message = err.to_string();
                for artifact in staged {
                    let report = &mut run.dataset_mut(artifact.source).load;
                    report.status = StageStatus::Failed;
                    report.error = Some(message.clone());
                }
            }
        }
    }
}

fn partitions_of(labels: &[String]) -> Vec<QueryPartition> {
    labels.iter().map(QueryPartition::new).collect()
}
