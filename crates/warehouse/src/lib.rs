//! Staged, transactional warehouse loading.
//!
//! The loader mirrors the warehouse contract: staging files are PUT to a
//! stage location (overwrite allowed), then bulk-copied into their
//! staging tables inside one transaction. Any unrecoverable error rolls
//! the whole batch back from a single point; committed loads carrying
//! rejected rows are reported as degraded, not failed.

pub mod loader;
pub mod session;
pub mod stage;

pub use loader::{FileLoadReport, LoadPhase, LoadResult, StagingLoader};
pub use session::{CopyOutcome, PgWarehouseSession, WarehouseSession};
pub use stage::{StageConfig, WarehouseStage};
