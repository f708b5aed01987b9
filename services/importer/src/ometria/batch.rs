use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use listsync_common::error::{ListsyncError, ListsyncResult};

/// Split `items` into consecutive chunks of at most `batch_size` and run
/// `deliver` for each chunk concurrently, holding one permit of `permits` per
/// chunk in flight.
///
/// Every chunk runs to completion; the first error observed is returned and
/// chunks that already succeeded stay delivered. Returns the number of chunks.
pub async fn dispatch_chunks<T, F, Fut>(
    items: &[T],
    batch_size: usize,
    permits: &Arc<Semaphore>,
    cancel: &CancellationToken,
    deliver: F,
) -> ListsyncResult<usize>
where
    T: Clone,
    F: Fn(usize, Vec<T>) -> Fut,
    Fut: Future<Output = ListsyncResult<()>> + Send + 'static,
{
    if batch_size == 0 {
        return Err(ListsyncError::Validation("batch size must be at least 1".to_string()));
    }

    let mut tasks = JoinSet::new();
    for (index, chunk) in items.chunks(batch_size).enumerate() {
        let permits = Arc::clone(permits);
        let cancel = cancel.clone();
        let delivery = deliver(index, chunk.to_vec());

        tasks.spawn(async move {
            let _permit = acquire(&permits, &cancel).await?;
            delivery.await
        });
    }

    let chunks = tasks.len();
    let mut first_error = None;

    while let Some(joined) = tasks.join_next().await {
        let outcome = joined
            .unwrap_or_else(|e| Err(ListsyncError::Internal(format!("chunk task failed: {e}"))));
        if let Err(e) = outcome {
            tracing::warn!(error = %e, "chunk delivery failed");
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(chunks),
    }
}

/// Wait for a permit; fails immediately once `cancel` fires.
async fn acquire<'a>(
    permits: &'a Semaphore,
    cancel: &CancellationToken,
) -> ListsyncResult<SemaphorePermit<'a>> {
    if cancel.is_cancelled() {
        return Err(ListsyncError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ListsyncError::Cancelled),
        permit = permits.acquire() => permit
            .map_err(|_| ListsyncError::Internal("delivery permits closed".to_string())),
    }
}
