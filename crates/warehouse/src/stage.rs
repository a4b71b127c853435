//! Warehouse-side file stage (S3/MinIO compatible).

use bytes::Bytes;
use object_store::{aws::AmazonS3Builder, path::Path, ObjectStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument};

use etl_common::{EtlError, EtlResult};

/// Configuration for the stage connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    /// S3/MinIO endpoint URL
    pub endpoint: String,
    /// Bucket name
    pub bucket: String,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// AWS region (use "us-east-1" for MinIO)
    pub region: String,
    /// Allow HTTP (for local MinIO)
    pub allow_http: bool,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://minio:9000".to_string(),
            bucket: "ev-dw-stage".to_string(),
            access_key_id: "minioadmin".to_string(),
            secret_access_key: "minioadmin".to_string(),
            region: "us-east-1".to_string(),
            allow_http: true,
        }
    }
}

/// Stage client. A PUT to an existing key replaces the previous upload,
/// which is exactly the overwrite semantics re-running a load relies on.
pub struct WarehouseStage {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl WarehouseStage {
    pub fn new(config: &StageConfig) -> EtlResult<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_endpoint(&config.endpoint)
            .with_bucket_name(&config.bucket)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key)
            .with_region(&config.region);

        if config.allow_http {
            builder = builder.with_allow_http(true);
        }

        let store = builder
            .build()
            .map_err(|e| EtlError::Storage(format!("failed to create stage client: {e}")))?;

        Ok(Self {
            store: Arc::new(store),
            bucket: config.bucket.clone(),
        })
    }

    /// Stage key for a staging file, e.g. `stage/weather_transformed.csv`.
    pub fn staged_key(file_name: &str) -> String {
        format!("stage/{file_name}")
    }

    #[instrument(skip(self, data), fields(bucket = %self.bucket, key = %key))]
    pub async fn put(&self, key: &str, data: Bytes) -> EtlResult<()> {
        let location = Path::from(key);
        debug!(size = data.len(), "uploading staged file");

        self.store
            .put(&location, data.into())
            .await
            .map_err(|e| EtlError::Storage(format!("failed to upload {key}: {e}")))?;

        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket, key = %key))]
    pub async fn get(&self, key: &str) -> EtlResult<Bytes> {
        let location = Path::from(key);

        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| EtlError::Storage(format!("failed to read {key}: {e}")))?;

        result
            .bytes()
            .await
            .map_err(|e| EtlError::Storage(format!("failed to read {key}: {e}")))
    }

    pub async fn exists(&self, key: &str) -> EtlResult<bool> {
        let location = Path::from(key);

        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(EtlError::Storage(format!("failed to check {key}: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_keys_live_under_the_stage_prefix() {
        assert_eq!(
            WarehouseStage::staged_key("sessions_transformed.csv"),
            "stage/sessions_transformed.csv"
        );
    }
}
