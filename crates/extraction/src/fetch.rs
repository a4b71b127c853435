//! Bounded retry around a single source request.
//!
//! The retry schedule is an explicit [`Backoff`] policy and sleeping goes
//! through the [`Sleeper`] trait, so retry behavior is testable without
//! real time delays. Transport is likewise a trait; the production
//! implementation is [`HttpTransport`] over reqwest.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use etl_common::{EtlError, EtlResult};

use crate::rate_limit::RateLimiter;

/// Retry and throughput settings for one source.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// HTTP request timeout.
    pub timeout: Duration,
    /// Total attempts per request, including the first.
    pub max_retries: u32,
    /// Delay schedule between attempts.
    pub backoff: Backoff,
    /// Minimum spacing between request grants.
    pub rate_limit_interval: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff: Backoff::default(),
            rate_limit_interval: Duration::from_secs(1),
        }
    }
}

/// Exponential backoff schedule: `base`, doubling per attempt, capped.
#[derive(Debug, Clone)]
pub struct Backoff {
    pub base: Duration,
    pub cap: Duration,
}

impl Backoff {
    /// Delay before retry number `retry` (zero-based: the delay between
    /// the first and second attempt is `delay(0)`).
    pub fn delay(&self, retry: u32) -> Duration {
        let exp = retry.min(31);
        let delay = self.base.saturating_mul(1u32 << exp);
        delay.min(self.cap)
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
        }
    }
}

/// Sleeping abstraction so tests can observe delays instead of waiting.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer.
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// A fully-formed request descriptor for one partition.
#[derive(Debug, Clone)]
pub struct SourceRequest {
    pub url: String,
    /// Query parameters, including credentials. Never logged.
    pub params: Vec<(String, String)>,
}

/// Transport seam between the retry loop and the network.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &SourceRequest) -> EtlResult<Value>;
}

/// reqwest-backed transport classifying failures into the retryable and
/// non-retryable halves of the error taxonomy.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> EtlResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| EtlError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &SourceRequest) -> EtlResult<Value> {
        let response = self
            .client
            .get(&request.url)
            .query(&request.params)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(EtlError::TransientSource(format!("HTTP {status}")));
        }
        if status.is_client_error() {
            return Err(EtlError::PermanentSource(format!("HTTP {status}")));
        }

        response
            .json()
            .await
            .map_err(|e| EtlError::PermanentSource(format!("malformed response body: {e}")))
    }
}

/// Timeouts, connection resets, and other transport-level failures are
/// retryable; a request that could not even be built is not.
fn classify_send_error(err: reqwest::Error) -> EtlError {
    if err.is_builder() {
        EtlError::PermanentSource(err.to_string())
    } else {
        EtlError::TransientSource(err.to_string())
    }
}

/// Wraps a single network call with rate limiting and bounded
/// exponential-backoff retry.
pub struct RetryingFetcher {
    rate_limiter: Arc<RateLimiter>,
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    max_retries: u32,
    backoff: Backoff,
}

impl RetryingFetcher {
    pub fn new(
        config: &FetchConfig,
        rate_limiter: Arc<RateLimiter>,
        transport: Arc<dyn Transport>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            rate_limiter,
            transport,
            sleeper,
            max_retries: config.max_retries.max(1),
            backoff: config.backoff.clone(),
        }
    }

    /// Production fetcher: reqwest transport, tokio sleeper.
    pub fn over_http(config: &FetchConfig, rate_limiter: Arc<RateLimiter>) -> EtlResult<Self> {
        let transport = Arc::new(HttpTransport::new(config.timeout)?);
        Ok(Self::new(config, rate_limiter, transport, Arc::new(TokioSleeper)))
    }

    /// Fetch one request, retrying transient failures. Permanent failures
    /// surface immediately; exhausting retries surfaces
    /// `SourceUnavailable` with the last underlying cause.
    pub async fn fetch(
        &self,
        request: &SourceRequest,
        cancel: &CancellationToken,
    ) -> EtlResult<Value> {
        let mut last_cause = String::new();

        for attempt in 1..=self.max_retries {
            self.rate_limiter.acquire(cancel).await?;

            match self.transport.send(request).await {
                Ok(payload) => {
                    debug!(url = %request.url, attempt, "fetch succeeded");
                    return Ok(payload);
                }
                Err(err) if err.is_transient() => {
                    warn!(url = %request.url, attempt, error = %err, "transient fetch failure");
                    last_cause = err.to_string();
                    if attempt < self.max_retries {
                        let delay = self.backoff.delay(attempt - 1);
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Err(EtlError::Cancelled),
                            _ = self.sleeper.sleep(delay) => {}
                        }
                    }
                }
                Err(err) => {
                    warn!(url = %request.url, attempt, error = %err, "permanent fetch failure");
                    return Err(err);
                }
            }
        }

        Err(EtlError::SourceUnavailable {
            attempts: self.max_retries,
            cause: last_cause,
        })
    }
}
