//! Resilient extraction of external datasets into raw artifacts.
//!
//! The extraction layer drives rate-limited, retrying fetches across a
//! list of query partitions and persists everything collected for one
//! run as a single immutable raw artifact:
//!
//! - [`RateLimiter`] spaces request grants system-wide
//! - [`Backoff`] and [`RetryingFetcher`] bound transient-failure retries
//! - [`Extractor`] fans partitions out on a bounded worker pool
//! - [`SessionExport`] ingests the batch CSV export the same way
//!
//! A single partition's exhausted retries leave that partition empty and
//! extraction continues; only a run where every partition fails is fatal.

pub mod extract;
pub mod fetch;
pub mod rate_limit;
pub mod sessions;
pub mod sources;

pub use extract::Extractor;
pub use fetch::{
    Backoff, FetchConfig, HttpTransport, RetryingFetcher, Sleeper, SourceRequest, TokioSleeper,
    Transport,
};
pub use rate_limit::RateLimiter;
pub use sessions::SessionExport;
pub use sources::{ApiSource, StationSource, WeatherSource};
