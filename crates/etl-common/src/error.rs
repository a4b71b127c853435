//! Error types for ev-charging-dw services.

use thiserror::Error;

/// Result type alias using EtlError.
pub type EtlResult<T> = Result<T, EtlError>;

/// Primary error type for pipeline operations.
#[derive(Debug, Error)]
pub enum EtlError {
    // === Source Errors ===
    #[error("Transient source error: {0}")]
    TransientSource(String),

    #[error("Permanent source error: {0}")]
    PermanentSource(String),

    #[error("Source unavailable after {attempts} attempts: {cause}")]
    SourceUnavailable { attempts: u32, cause: String },

    // === Stage-Fatal Errors ===
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Transform failed: {0}")]
    TransformFailed(String),

    #[error("Load aborted during {phase}: {cause}")]
    LoadAborted { phase: String, cause: String },

    // === Per-Record Errors ===
    #[error("Mapping error for field '{field}': {message}")]
    Mapping { field: String, message: String },

    // === Infrastructure Errors ===
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EtlError {
    /// Whether a retry of the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, EtlError::TransientSource(_))
    }

    /// Whether this error terminates a pipeline stage (as opposed to a
    /// single attempt, partition, or record).
    pub fn is_stage_fatal(&self) -> bool {
        matches!(
            self,
            EtlError::ExtractionFailed(_)
                | EtlError::TransformFailed(_)
                | EtlError::LoadAborted { .. }
                | EtlError::Cancelled
        )
    }
}
