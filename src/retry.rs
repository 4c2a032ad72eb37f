//! Exponential backoff and retry of transient backend failures.
//!
//! Only `BackendError::Unavailable` is retried. Any other error is returned
//! after the first attempt.
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::Backoff;
use crate::error::BackendError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub multiplier: f64,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            multiplier: 2.0,
            max,
        }
    }

    /// `initial * multiplier^attempt`, capped at `max`. `attempt` is 0-indexed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.min(64) as i32);
        let secs = self.initial.as_secs_f64() * factor;
        Duration::from_secs_f64(secs.min(self.max.as_secs_f64()))
    }
}

/// Attempt budget plus the backoff between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrySettings {
    pub attempts: u32,
    pub backoff: BackoffPolicy,
}

impl From<Backoff> for RetrySettings {
    fn from(b: Backoff) -> Self {
        Self {
            attempts: b.attempts.max(1),
            backoff: BackoffPolicy::new(
                Duration::from_millis(b.base_delay_ms),
                Duration::from_millis(b.max_delay_ms),
            ),
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or the attempt budget is
/// spent. Cancellation stops the waiting between attempts and returns the
/// last error seen.
pub async fn retry_transient<T, F, Fut>(
    label: &str,
    settings: RetrySettings,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, BackendError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, BackendError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(err) if err.is_transient() && attempt + 1 < settings.attempts => {
                let delay = settings.backoff.delay_for_attempt(attempt);
                warn!(label, attempt, ?delay, %err, "transient backend error; retrying");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(err),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
