use std::future::Future;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::QuoteConfig;

use super::QuoteError;

/// Serializes outbound provider calls to a fixed rate with bounded
/// concurrency and a per-operation retry budget.
///
/// Callers queue transparently: both the concurrency semaphore and the
/// dispatch watermark mutex are FIFO-fair, so queued operations run in
/// submission order once a slot frees up. Transient failures are retried
/// with a fixed delay; exhausting the budget returns the failure to the
/// caller, never swallows it.
///
/// Constructed explicitly and injected into the quote client, never a
/// process-wide global.
pub struct RateLimiter {
    /// Minimum spacing between consecutive dispatches.
    interval: Duration,
    max_retries: u32,
    retry_delay: Duration,
    semaphore: Semaphore,
    /// Time of the most recent dispatch; the next eligible slot is computed
    /// from this watermark.
    watermark: Mutex<Option<Instant>>,
}

impl RateLimiter {
    pub fn new(config: &QuoteConfig) -> Self {
        let rps = config.requests_per_second.max(1);
        Self {
            interval: Duration::from_secs_f64(1.0 / f64::from(rps)),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay,
            semaphore: Semaphore::new(config.max_concurrent_requests.max(1)),
            watermark: Mutex::new(None),
        }
    }

    /// Run `op` under the rate limit, suspending the caller until a slot is
    /// free. The closure is re-invoked on transient failure, up to the retry
    /// budget; each retry waits for its own dispatch slot so retries also
    /// respect the provider quota.
    pub async fn throttle<F, Fut, T>(&self, op: F) -> Result<T, QuoteError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, QuoteError>>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| QuoteError::provider("rate limiter is shut down"))?;

        let mut attempt: u32 = 0;
        loop {
            self.wait_for_slot().await;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        error = %err,
                        "transient provider failure, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(err) if err.is_transient() => {
                    return Err(QuoteError::RetriesExhausted {
                        attempts: attempt + 1,
                        message: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn wait_for_slot(&self) {
        let mut last = self.watermark.lock().await;
        if let Some(prev) = *last {
            let next_slot = prev + self.interval;
            if next_slot > Instant::now() {
                debug!("waiting for next rate-limit slot");
                tokio::time::sleep_until(next_slot).await;
            }
        }
        *last = Some(Instant::now());
    }
}
