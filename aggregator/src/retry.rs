// Bounded retry with exponential backoff
//
// Re-runs an operation until it succeeds, fails permanently, or the
// wall-clock ceiling elapses. The delay between attempts doubles from
// `initial_interval` and is capped at `max_interval`.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::AggregatorError;

/// Backoff between attempts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay after the `attempt`-th failure (0-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(attempt);
        let delay = self.initial_interval.saturating_mul(multiplier);
        delay.min(self.max_interval)
    }
}

/// Errors that can end a retry loop early
pub trait Retryable {
    fn is_permanent(&self) -> bool;
}

impl Retryable for AggregatorError {
    fn is_permanent(&self) -> bool {
        AggregatorError::is_permanent(self)
    }
}

/// Run `operation` until it succeeds or `timeout` elapses.
///
/// The operation always runs at least once. An attempt that is already in
/// flight when the ceiling passes is allowed to finish; no new attempt
/// starts after it. The last error is returned on exhaustion.
pub async fn with_retries_timeout<T, E, F, Fut>(
    what: &str,
    policy: &RetryPolicy,
    timeout: Duration,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let deadline = Instant::now() + timeout;
    let mut attempt: u32 = 0;

    loop {
        let err = match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} retries", what, attempt);
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if err.is_permanent() {
            debug!("{} failed permanently: {}", what, err);
            return Err(err);
        }

        let delay = policy.backoff(attempt);
        let now = Instant::now();
        if now + delay >= deadline {
            warn!("{} failed after {} attempts: {}", what, attempt + 1, err);
            return Err(err);
        }

        warn!("{} failed, retrying in {:?}: {}", what, delay, err);
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
