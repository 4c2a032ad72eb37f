//! Retry-until-visible reads for an eventually consistent read model.
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::retry::BackoffPolicy;

/// Call `probe` until it yields a value, at most `ceiling` times, sleeping
/// with exponential backoff in between. Returns `None` when the budget is
/// spent or `cancel` fires; never waits past that.
pub async fn poll_until<T, F, Fut>(
    mut probe: F,
    policy: BackoffPolicy,
    ceiling: u32,
    cancel: &CancellationToken,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for attempt in 0..ceiling {
        if let Some(v) = probe().await {
            return Some(v);
        }
        if attempt + 1 == ceiling {
            break;
        }
        let delay = policy.delay_for_attempt(attempt);
        debug!(attempt, ?delay, "not visible yet");
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    None
}
