//! Bulk enqueue with partial-failure aggregation and bounded retry.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::warn;

use mediaq_models::MediaEntry;

use crate::error::{QueueError, QueueResult};

/// Producer-facing queue: submits a single entry to the broker.
#[async_trait]
pub trait MediaQueue: Send + Sync {
    async fn enqueue(&self, entry: &MediaEntry) -> QueueResult<()>;
}

/// One entry that could not be enqueued, paired with its cause.
#[derive(Debug)]
pub struct BulkEnqueueFailure {
    pub entry: MediaEntry,
    pub error: QueueError,
}

/// Outcome of one bulk enqueue call.
///
/// Partial success is always representable: `succeeded_count` accumulates
/// across retry rounds while `failed` holds only the latest round's failures.
#[derive(Debug, Default)]
pub struct BulkEnqueueResult {
    pub succeeded_count: usize,
    pub failed: Vec<BulkEnqueueFailure>,
}

impl BulkEnqueueResult {
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    pub fn total_processed(&self) -> usize {
        self.succeeded_count + self.failed.len()
    }
}

/// Submit every entry concurrently, once.
///
/// Successes bump an atomic counter; failures append to a mutex-guarded list.
/// The lock is held only across the list push, never across a submission.
/// Insertion order of failures is completion order, which is acceptable since
/// failures are retried as a set.
async fn enqueue_round<Q>(queue: &Q, entries: Vec<MediaEntry>) -> BulkEnqueueResult
where
    Q: MediaQueue + ?Sized,
{
    let succeeded = AtomicUsize::new(0);
    let failed: Mutex<Vec<BulkEnqueueFailure>> = Mutex::new(Vec::new());

    join_all(entries.into_iter().map(|entry| {
        let succeeded = &succeeded;
        let failed = &failed;
        async move {
            match queue.enqueue(&entry).await {
                Ok(()) => {
                    succeeded.fetch_add(1, Ordering::SeqCst);
                }
                Err(error) => {
                    failed
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .push(BulkEnqueueFailure { entry, error });
                }
            }
        }
    }))
    .await;

    BulkEnqueueResult {
        succeeded_count: succeeded.into_inner(),
        failed: failed
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner()),
    }
}

/// Enqueue a batch of entries with bounded retry of the failed subset.
///
/// Every entry is submitted concurrently with no ordering guarantee. After the
/// first round, entries that failed are resubmitted as a set, up to
/// `retry_count` additional rounds (so each persistently failing entry sees
/// exactly `retry_count + 1` attempts). `retry_count = 0` disables retries.
///
/// When `fail_on_residual` is set and failures remain after the last round,
/// a single residual failure re-surfaces its original error unchanged, while
/// several residual failures surface as [`QueueError::Aggregate`] enumerating
/// every cause. Otherwise the merged result is returned for inspection.
pub async fn enqueue_all<Q>(
    queue: &Q,
    entries: Vec<MediaEntry>,
    retry_count: u32,
    fail_on_residual: bool,
) -> QueueResult<BulkEnqueueResult>
where
    Q: MediaQueue + ?Sized,
{
    let mut result = enqueue_round(queue, entries).await;
    let mut remaining = retry_count;

    while !result.failed.is_empty() && remaining > 0 {
        remaining -= 1;
        let pending: Vec<MediaEntry> = result.failed.drain(..).map(|f| f.entry).collect();
        warn!(
            failed = pending.len(),
            remaining, "retrying failed enqueue subset"
        );
        let round = enqueue_round(queue, pending).await;
        result.succeeded_count += round.succeeded_count;
        result.failed = round.failed;
    }

    if result.failed.is_empty() || !fail_on_residual {
        return Ok(result);
    }
    if result.failed.len() == 1 {
        // Surface the original cause unchanged, not wrapped.
        return Err(result.failed.remove(0).error);
    }
    Err(QueueError::Aggregate(
        result.failed.into_iter().map(|f| f.error).collect(),
    ))
}

/// Enqueue a batch with the default policy: four retry rounds, escalating
/// residual failures to the caller.
pub async fn enqueue_many<Q>(queue: &Q, entries: Vec<MediaEntry>) -> QueueResult<BulkEnqueueResult>
where
    Q: MediaQueue + ?Sized,
{
    enqueue_all(queue, entries, 4, true).await
}
