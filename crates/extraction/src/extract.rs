//! Partition-driven extraction into immutable raw artifacts.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use etl_common::{EtlError, EtlResult, QueryPartition, RawArtifact};

use crate::fetch::RetryingFetcher;
use crate::sources::ApiSource;

/// Drives the retrying fetcher across a list of query partitions and
/// persists everything collected as one raw artifact.
///
/// Partition processing is parallelized on a bounded worker pool. A
/// partition whose retries are exhausted contributes no records and is
/// recorded in the artifact metadata; extraction continues. Only a run
/// where no partition succeeds is fatal.
pub struct Extractor<S: ApiSource> {
    source: S,
    fetcher: Arc<RetryingFetcher>,
    parallelism: usize,
    raw_dir: PathBuf,
}

impl<S: ApiSource> Extractor<S> {
    pub fn new(
        source: S,
        fetcher: Arc<RetryingFetcher>,
        parallelism: usize,
        raw_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source,
            fetcher,
            parallelism: parallelism.max(1),
            raw_dir: raw_dir.into(),
        }
    }

    /// Extract all partitions and persist the artifact. The artifact file
    /// is written only after every partition has been attempted.
    #[instrument(skip_all, fields(source = %self.source.kind(), partitions = partitions.len()))]
    pub async fn extract(
        &self,
        partitions: &[QueryPartition],
        cancel: &CancellationToken,
    ) -> EtlResult<(RawArtifact, PathBuf)> {
        let fetches = partitions.iter().enumerate().map(|(idx, partition)| {
            let fetcher = self.fetcher.clone();
            async move {
                let request = self.source.request(partition);
                let result = match fetcher.fetch(&request, cancel).await {
                    Ok(payload) => self.source.records(payload, Utc::now()),
                    Err(err) => Err(err),
                };
                (idx, result)
            }
        });

        let mut outcomes: Vec<(usize, EtlResult<Vec<Value>>)> = stream::iter(fetches)
            .buffer_unordered(self.parallelism)
            .collect()
            .await;
        outcomes.sort_by_key(|(idx, _)| *idx);

        let mut records = Vec::new();
        let mut failed = Vec::new();
        let mut succeeded = 0usize;
        let mut last_cause = None;

        for ((_, result), partition) in outcomes.into_iter().zip(partitions) {
            match result {
                Ok(partition_records) => {
                    info!(
                        partition = %partition,
                        records = partition_records.len(),
                        "partition extracted"
                    );
                    records.extend(partition_records);
                    succeeded += 1;
                }
                Err(EtlError::Cancelled) => return Err(EtlError::Cancelled),
                Err(err) => {
                    warn!(partition = %partition, error = %err, "partition failed");
                    last_cause = Some(err.to_string());
                    failed.push(partition.label.clone());
                }
            }
        }

        if succeeded == 0 {
            return Err(EtlError::ExtractionFailed(format!(
                "no partition succeeded ({})",
                last_cause.unwrap_or_else(|| "no partitions configured".into())
            )));
        }

        let attempted = partitions.iter().map(|p| p.label.clone()).collect();
        let artifact = RawArtifact::new(self.source.kind(), Utc::now(), attempted, failed, records);
        let path = artifact.write_to(&self.raw_dir)?;

        info!(
            path = %path.display(),
            records = artifact.metadata.record_count,
            failed_partitions = artifact.metadata.partitions_failed.len(),
            "raw artifact persisted"
        );

        Ok((artifact, path))
    }
}
