//! Bounded fan-out of one task per item.
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("cancelled before every item was dispatched")]
pub struct Cancelled;

/// Run `f` over every item with at most `limit` calls in flight and wait for
/// all of them.
///
/// Results come back in completion order. If `cancel` fires before every item
/// has been started, the remaining items are dropped, the started ones are
/// awaited, and `Cancelled` is returned. A panicking item loses its result
/// but never affects its siblings.
pub async fn run_bounded<T, R, F, Fut>(
    items: Vec<T>,
    limit: usize,
    cancel: &CancellationToken,
    f: F,
) -> Result<Vec<R>, Cancelled>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let total = items.len();
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let f = Arc::new(f);
    let mut set = JoinSet::new();
    let mut cancelled = false;

    for item in items {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = semaphore.clone().acquire_owned() => permit.ok(),
        };
        let Some(permit) = permit else {
            cancelled = true;
            break;
        };
        let f = f.clone();
        set.spawn(async move {
            let _permit = permit;
            f(item).await
        });
    }

    let mut results = Vec::with_capacity(total);
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(r) => results.push(r),
            Err(err) => error!(?err, "pool worker did not complete"),
        }
    }

    if cancelled {
        return Err(Cancelled);
    }
    Ok(results)
}
