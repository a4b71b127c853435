//! Request throughput limiter shared across extraction workers.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use etl_common::{EtlError, EtlResult};

/// Spaces grants so that no two callers proceed within less than the
/// configured interval of each other, system-wide.
///
/// Reservation of the next free slot happens under a mutex; the wait for
/// that slot happens outside it, so concurrent callers queue up in
/// strictly non-overlapping slots instead of serializing on the lock.
pub struct RateLimiter {
    interval: Duration,
    next_free: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_free: Mutex::new(None),
        }
    }

    /// Block until at least `interval` has elapsed since the previous
    /// grant. Cancellation aborts a pending acquisition.
    pub async fn acquire(&self, cancel: &CancellationToken) -> EtlResult<()> {
        let grant_at = {
            let mut next_free = self.next_free.lock().expect("rate limiter lock poisoned");
            let now = Instant::now();
            let grant_at = match *next_free {
                Some(at) if at > now => at,
                _ => now,
            };
            *next_free = Some(grant_at + self.interval);
            grant_at
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EtlError::Cancelled),
            _ = tokio::time::sleep_until(grant_at) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn grants_are_spaced_by_interval() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_secs(1)));
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let mut grant_offsets = Vec::new();
        for _ in 0..3 {
            limiter.acquire(&cancel).await.unwrap();
            grant_offsets.push(start.elapsed());
        }

        assert_eq!(grant_offsets[0], Duration::ZERO);
        assert_eq!(grant_offsets[1], Duration::from_secs(1));
        assert_eq!(grant_offsets[2], Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_never_overlap() {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(500)));
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = limiter.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    limiter.acquire(&cancel).await.unwrap();
                    start.elapsed()
                })
            })
            .collect();

        let mut offsets = Vec::new();
        for handle in handles {
            offsets.push(handle.await.unwrap());
        }
        offsets.sort();

        for pair in offsets.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_a_pending_wait() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let cancel = CancellationToken::new();

        // First grant is immediate; the second must wait a minute.
        limiter.acquire(&cancel).await.unwrap();
        cancel.cancel();
        let err = limiter.acquire(&cancel).await.unwrap_err();
        assert!(matches!(err, EtlError::Cancelled));
    }
}
