//! Warehouse session abstraction and its PostgreSQL implementation.
//!
//! The loader drives a session through a fixed call sequence:
//! `set_context`, `begin`, `put_staged`/`copy_into` per file, then
//! `commit` or `rollback`. The trait seam keeps transactional behavior
//! testable without a live warehouse.

use async_trait::async_trait;
use bytes::Bytes;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::Arc;
use tracing::{debug, warn};

use etl_common::{EtlError, EtlResult};

use crate::stage::WarehouseStage;

/// Outcome of one bulk copy: rows loaded plus rows skipped as malformed.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyOutcome {
    pub loaded: u64,
    pub rejected: u64,
}

/// One warehouse session, inherently single-threaded: uploads and copies
/// within a load are strictly ordered against the same transaction.
#[async_trait]
pub trait WarehouseSession: Send {
    /// Establish target database/schema context. Fatal on failure.
    async fn set_context(&mut self) -> EtlResult<()>;

    /// Open the transaction the rest of the sequence runs in.
    async fn begin(&mut self) -> EtlResult<()>;

    /// Upload a staging file to the stage location, replacing any
    /// previous upload under the same key.
    async fn put_staged(&mut self, key: &str, contents: Bytes) -> EtlResult<()>;

    /// Bulk-copy a staged file into `table`, skipping malformed rows
    /// rather than aborting the file.
    async fn copy_into(&mut self, table: &str, key: &str) -> EtlResult<CopyOutcome>;

    async fn commit(&mut self) -> EtlResult<()>;

    async fn rollback(&mut self) -> EtlResult<()>;
}

/// PostgreSQL-backed session: files live on the object-store stage, the
/// bulk-load primitive is COPY FROM STDIN.
pub struct PgWarehouseSession {
    pool: PgPool,
    schema: String,
    stage: Arc<WarehouseStage>,
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgWarehouseSession {
    pub async fn connect(
        database_url: &str,
        schema: impl Into<String>,
        stage: Arc<WarehouseStage>,
    ) -> EtlResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await
            .map_err(|e| EtlError::Database(format!("connection failed: {e}")))?;

        Ok(Self {
            pool,
            schema: schema.into(),
            stage,
            tx: None,
        })
    }

    fn open_tx(&mut self) -> EtlResult<&mut Transaction<'static, Postgres>> {
        self.tx
            .as_mut()
            .ok_or_else(|| EtlError::Database("no open transaction".into()))
    }
}

#[async_trait]
impl WarehouseSession for PgWarehouseSession {
    async fn set_context(&mut self) -> EtlResult<()> {
        let found: Option<String> = sqlx::query_scalar(
            "SELECT schema_name FROM information_schema.schemata WHERE schema_name = $1",
        )
        .bind(&self.schema)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| EtlError::Database(format!("context check failed: {e}")))?;

        match found {
            Some(_) => Ok(()),
            None => Err(EtlError::Database(format!(
                "target schema '{}' does not exist",
                self.schema
            ))),
        }
    }

    async fn begin(&mut self) -> EtlResult<()> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| EtlError::Database(format!("begin failed: {e}")))?;
        self.tx = Some(tx);
        Ok(())
    }

    async fn put_staged(&mut self, key: &str, contents: Bytes) -> EtlResult<()> {
        self.stage.put(key, contents).await
    }

    async fn copy_into(&mut self, table: &str, key: &str) -> EtlResult<CopyOutcome> {
        let staged = self.stage.get(key).await?;
        let (tolerated, rejected) = filter_malformed_rows(&staged)?;

        let statement = format!(
            "COPY {}.{} FROM STDIN WITH (FORMAT csv, HEADER true)",
            self.schema, table
        );
        let tx = self.open_tx()?;
        let mut sink = tx
            .copy_in_raw(&statement)
            .await
            .map_err(|e| EtlError::Database(format!("copy into {table} failed: {e}")))?;
        sink.send(tolerated.as_ref())
            .await
            .map_err(|e| EtlError::Database(format!("copy into {table} failed: {e}")))?;
        let loaded = sink
            .finish()
            .await
            .map_err(|e| EtlError::Database(format!("copy into {table} failed: {e}")))?;

        if rejected > 0 {
            warn!(table, rejected, "copy skipped malformed rows");
        }
        debug!(table, loaded, "copy completed");

        Ok(CopyOutcome { loaded, rejected })
    }

    async fn commit(&mut self) -> EtlResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| EtlError::Database("no open transaction".into()))?;
        tx.commit()
            .await
            .map_err(|e| EtlError::Database(format!("commit failed: {e}")))
    }

    async fn rollback(&mut self) -> EtlResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback()
                .await
                .map_err(|e| EtlError::Database(format!("rollback failed: {e}")))?;
        }
        Ok(())
    }
}

/// Client-side row tolerance for the COPY primitive: rows whose field
/// count disagrees with the header are dropped and counted, everything
/// else is fed through byte-faithfully.
pub fn filter_malformed_rows(contents: &[u8]) -> EtlResult<(Bytes, u64)> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(contents);
    let header = reader
        .headers()
        .map_err(|e| EtlError::Csv(e.to_string()))?
        .clone();
    let expected = header.len();

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&header)
        .map_err(|e| EtlError::Csv(e.to_string()))?;

    let mut rejected = 0u64;
    for row in reader.records() {
        match row {
            Ok(row) if row.len() == expected => {
                writer
                    .write_record(&row)
                    .map_err(|e| EtlError::Csv(e.to_string()))?;
            }
            Ok(_) | Err(_) => rejected += 1,
        }
    }

    let body = writer
        .into_inner()
        .map_err(|e| EtlError::Csv(e.to_string()))?;
    Ok((Bytes::from(body), rejected))
}
