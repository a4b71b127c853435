//! The staged, transactional loader.

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use etl_common::{EtlError, EtlResult, SourceKind, StagingArtifact};

use crate::session::WarehouseSession;
use crate::stage::WarehouseStage;

/// Where a load is in its upload-then-copy-then-commit sequence. Failure
/// anywhere rolls the transaction back from one place, tagged with the
/// phase that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Connecting,
    Uploading,
    Copying,
    Committing,
}

impl LoadPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Uploading => "uploading",
            Self::Copying => "copying",
            Self::Committing => "committing",
        }
    }
}

impl std::fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-file outcome of a committed load.
#[derive(Debug, Clone)]
pub struct FileLoadReport {
    pub source: SourceKind,
    pub table: String,
    pub loaded: u64,
    pub rejected: u64,
}

/// Outcome of one committed load batch. `degraded` is set when any file
/// carried rejected rows; the transaction still committed.
#[derive(Debug, Clone)]
pub struct LoadResult {
    pub files: Vec<FileLoadReport>,
    pub degraded: bool,
}

/// Uploads staging files to the warehouse stage and bulk-copies them
/// into their staging tables inside a single transaction.
pub struct StagingLoader<S> {
    session: S,
}

impl<S: WarehouseSession> StagingLoader<S> {
    pub fn new(session: S) -> Self {
        Self { session }
    }

    /// Load a batch of staging artifacts. Commits only if every
    /// upload+copy completed; any unrecoverable error rolls the whole
    /// transaction back so no partial table is left behind.
    #[instrument(skip_all, fields(artifacts = artifacts.len()))]
    pub async fn load(
        &mut self,
        artifacts: &[StagingArtifact],
        cancel: &CancellationToken,
    ) -> EtlResult<LoadResult> {
        self.session
            .set_context()
            .await
            .map_err(|e| aborted(LoadPhase::Connecting, e))?;
        self.session
            .begin()
            .await
            .map_err(|e| aborted(LoadPhase::Connecting, e))?;

        match self.run_batch(artifacts, cancel).await {
            Ok(result) => Ok(result),
            Err(err) => {
                // Single rollback point: whatever phase failed, the
                // warehouse is left untouched.
                if let Err(rb) = self.session.rollback().await {
                    warn!(error = %rb, "rollback after load failure also failed");
                }
                Err(err)
            }
        }
    }

    async fn run_batch(
        &mut self,
        artifacts: &[StagingArtifact],
        cancel: &CancellationToken,
    ) -> EtlResult<LoadResult> {
        for artifact in artifacts {
            check_cancelled(cancel)?;
            let contents = std::fs::read(&artifact.path)
                .map(Bytes::from)
                .map_err(|e| {
                    aborted(
                        LoadPhase::Uploading,
                        EtlError::Storage(format!(
                            "cannot read staging file {}: {e}",
                            artifact.path.display()
                        )),
                    )
                })?;
            let key = staged_key(artifact);
            self.session
                .put_staged(&key, contents)
                .await
                .map_err(|e| aborted(LoadPhase::Uploading, e))?;
            info!(source = %artifact.source, key = %key, "staging file uploaded");
        }

        let mut files = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            check_cancelled(cancel)?;
            let table = artifact.source.staging_table();
            let outcome = self
                .session
                .copy_into(table, &staged_key(artifact))
                .await
                .map_err(|e| aborted(LoadPhase::Copying, e))?;
            info!(
                source = %artifact.source,
                table,
                loaded = outcome.loaded,
                rejected = outcome.rejected,
                "staged file copied"
            );
            files.push(FileLoadReport {
                source: artifact.source,
                table: table.to_string(),
                loaded: outcome.loaded,
                rejected: outcome.rejected,
            });
        }

        check_cancelled(cancel)?;
        self.session
            .commit()
            .await
            .map_err(|e| aborted(LoadPhase::Committing, e))?;

        let degraded = files.iter().any(|f| f.rejected > 0);
        if degraded {
            warn!("load committed with rejected rows");
        }
        Ok(LoadResult { files, degraded })
    }
}

fn staged_key(artifact: &StagingArtifact) -> String {
    let file_name = artifact
        .path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("{}_transformed.csv", artifact.source.as_str()));
    WarehouseStage::staged_key(&file_name)
}

fn aborted(phase: LoadPhase, cause: EtlError) -> EtlError {
    // Cancellation is not a load failure; it propagates as itself.
    if matches!(cause, EtlError::Cancelled) {
        return cause;
    }
    EtlError::LoadAborted {
        phase: phase.as_str().to_string(),
        cause: cause.to_string(),
    }
}

fn check_cancelled(cancel: &CancellationToken) -> EtlResult<()> {
    if cancel.is_cancelled() {
        Err(EtlError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::Utc;

    use crate::session::CopyOutcome;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        SetContext,
        Begin,
        Put(String),
        Copy(String),
        Commit,
        Rollback,
    }

    /// Session that records the call sequence and fails on request.
    #[derive(Default)]
    struct ScriptedSession {
        calls: Arc<Mutex<Vec<Call>>>,
        fail_context: bool,
        fail_put_key: Option<String>,
        fail_copy_table: Option<String>,
        rejected_per_copy: u64,
    }

    impl ScriptedSession {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl WarehouseSession for ScriptedSession {
        async fn set_context(&mut self) -> EtlResult<()> {
            self.calls.lock().unwrap().push(Call::SetContext);
            if self.fail_context {
                Err(EtlError::Database("schema missing".into()))
            } else {
                Ok(())
            }
        }

        async fn begin(&mut self) -> EtlResult<()> {
            self.calls.lock().unwrap().push(Call::Begin);
            Ok(())
        }

        async fn put_staged(&mut self, key: &str, _contents: Bytes) -> EtlResult<()> {
            self.calls.lock().unwrap().push(Call::Put(key.to_string()));
            if self.fail_put_key.as_deref() == Some(key) {
                Err(EtlError::Storage("stage unreachable".into()))
            } else {
                Ok(())
            }
        }

        async fn copy_into(&mut self, table: &str, _key: &str) -> EtlResult<CopyOutcome> {
            self.calls.lock().unwrap().push(Call::Copy(table.to_string()));
            if self.fail_copy_table.as_deref() == Some(table) {
                Err(EtlError::Database("connection lost during copy".into()))
            } else {
                Ok(CopyOutcome {
                    loaded: 10,
                    rejected: self.rejected_per_copy,
                })
            }
        }

        async fn commit(&mut self) -> EtlResult<()> {
            self.calls.lock().unwrap().push(Call::Commit);
            Ok(())
        }

        async fn rollback(&mut self) -> EtlResult<()> {
            self.calls.lock().unwrap().push(Call::Rollback);
            Ok(())
        }
    }

    fn staged(dir: &std::path::Path, source: SourceKind) -> StagingArtifact {
        let path: PathBuf = dir.join(format!("{}_transformed.csv", source.as_str()));
        std::fs::write(&path, "a,b\n1,2\n").unwrap();
        StagingArtifact {
            source,
            path,
            row_count: 1,
            excluded_count: 0,
            raw_artifact: format!("{}_20250806T000000Z.json", source.as_str()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn commits_after_every_upload_and_copy() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = vec![
            staged(dir.path(), SourceKind::Sessions),
            staged(dir.path(), SourceKind::Stations),
        ];
        let session = ScriptedSession::default();
        let calls = session.calls.clone();
        let mut loader = StagingLoader::new(session);

        let result = loader
            .load(&artifacts, &CancellationToken::new())
            .await
            .unwrap();

        assert!(!result.degraded);
        assert_eq!(result.files.len(), 2);
        let calls = calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                Call::SetContext,
                Call::Begin,
                Call::Put("stage/sessions_transformed.csv".into()),
                Call::Put("stage/stations_transformed.csv".into()),
                Call::Copy("stg_ev_sessions".into()),
                Call::Copy("stg_stations".into()),
                Call::Commit,
            ]
        );
    }

    #[tokio::test]
    async fn copy_failure_rolls_back_earlier_files() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = vec![
            staged(dir.path(), SourceKind::Sessions),
            staged(dir.path(), SourceKind::Weather),
        ];
        // File A (sessions) copies fine; file B (weather) dies mid-copy.
        let session = ScriptedSession {
            fail_copy_table: Some("stg_weather".into()),
            ..ScriptedSession::default()
        };
        let calls = session.calls.clone();
        let mut loader = StagingLoader::new(session);

        let err = loader
            .load(&artifacts, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            EtlError::LoadAborted { phase, cause } => {
                assert_eq!(phase, "copying");
                assert!(cause.contains("connection lost"));
            }
            other => panic!("expected LoadAborted, got {other:?}"),
        }
        let calls = calls.lock().unwrap().clone();
        // Rollback happened; commit never did. Nothing from file A is
        // visible after the run.
        assert!(calls.contains(&Call::Copy("stg_ev_sessions".into())));
        assert!(calls.contains(&Call::Rollback));
        assert!(!calls.contains(&Call::Commit));
    }

    #[tokio::test]
    async fn upload_failure_aborts_in_the_uploading_phase() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = vec![staged(dir.path(), SourceKind::Stations)];
        let session = ScriptedSession {
            fail_put_key: Some("stage/stations_transformed.csv".into()),
            ..ScriptedSession::default()
        };
        let calls = session.calls.clone();
        let mut loader = StagingLoader::new(session);

        let err = loader
            .load(&artifacts, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, EtlError::LoadAborted { ref phase, .. } if phase == "uploading"));
        assert!(calls.lock().unwrap().contains(&Call::Rollback));
    }

    #[tokio::test]
    async fn context_failure_aborts_before_any_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = vec![staged(dir.path(), SourceKind::Stations)];
        let session = ScriptedSession {
            fail_context: true,
            ..ScriptedSession::default()
        };
        let calls = session.calls.clone();
        let mut loader = StagingLoader::new(session);

        let err = loader
            .load(&artifacts, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, EtlError::LoadAborted { ref phase, .. } if phase == "connecting"));
        assert_eq!(calls.lock().unwrap().clone(), vec![Call::SetContext]);
    }

    #[tokio::test]
    async fn rejected_rows_degrade_but_commit() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = vec![staged(dir.path(), SourceKind::Weather)];
        let session = ScriptedSession {
            rejected_per_copy: 3,
            ..ScriptedSession::default()
        };
        let calls = session.calls.clone();
        let mut loader = StagingLoader::new(session);

        let result = loader
            .load(&artifacts, &CancellationToken::new())
            .await
            .unwrap();

        assert!(result.degraded);
        assert_eq!(result.files[0].rejected, 3);
        assert!(calls.lock().unwrap().contains(&Call::Commit));
    }

    #[tokio::test]
    async fn cancellation_rolls_back_and_never_commits() {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = vec![staged(dir.path(), SourceKind::Sessions)];
        let session = ScriptedSession::default();
        let calls = session.calls.clone();
        let mut loader = StagingLoader::new(session);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = loader.load(&artifacts, &cancel).await.unwrap_err();

        assert!(matches!(err, EtlError::Cancelled));
        let calls = calls.lock().unwrap().clone();
        assert!(calls.contains(&Call::Rollback));
        assert!(!calls.contains(&Call::Commit));
    }
}
