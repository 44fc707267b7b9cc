// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::cmp::min;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub(crate) const DEFAULT_MAX_CONCURRENCY: usize = 5;
const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// How a command's attempts are isolated from the submitting task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationMode {
    /// Attempts run on a spawned worker task; submissions may queue for a slot.
    #[default]
    Pool,

    /// Attempts run on the submitting task; a full semaphore rejects immediately
    /// with no queueing.
    Semaphore,
}

/// Capacity configuration for one command's bulkhead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolPolicy {
    /// Maximum attempts executing concurrently.
    pub max_concurrency: usize,

    /// Maximum submissions waiting for a slot (pool isolation only).
    pub max_queue: usize,

    /// Rejection threshold cutting below `max_queue`, so queueing can be tightened
    /// at runtime without resizing the queue. `None` means the full queue is usable.
    pub queue_rejection_threshold: Option<usize>,

    /// Advisory idle-worker keep-alive for pool implementations that recycle workers.
    pub keep_alive: Duration,
}

impl Default for PoolPolicy {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_queue: 0,
            queue_rejection_threshold: None,
            keep_alive: DEFAULT_KEEP_ALIVE,
        }
    }
}

impl PoolPolicy {
    fn effective_queue(&self, isolation: IsolationMode) -> usize {
        match isolation {
            // Semaphore isolation never queues: the submission phase must not block.
            IsolationMode::Semaphore => 0,
            IsolationMode::Pool => min(
                self.max_queue,
                self.queue_rejection_threshold.unwrap_or(self.max_queue),
            ),
        }
    }
}

/// Bounds concurrency for one command name.
///
/// A submission first tries for an execution slot; failing that it takes a queue slot
/// (when the policy allows a queue) and waits for an execution slot to free up. With
/// both exhausted the submission is rejected immediately — slot acquisition is the
/// only wait the bulkhead ever imposes on a submitter.
///
/// Slots are RAII permits, so release happens on every exit path including panics.
#[derive(Debug)]
pub(crate) struct Bulkhead {
    workers: Arc<Semaphore>,
    queue: Option<Arc<Semaphore>>,
}

/// Holds an execution slot until dropped.
#[derive(Debug)]
pub(crate) struct SlotGuard {
    _permit: OwnedSemaphorePermit,
}

/// Marker for a rejected submission; the engine maps it to the pool-rejected error.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct PoolFull;

impl Bulkhead {
    pub fn new(isolation: IsolationMode, policy: &PoolPolicy) -> Self {
        let queue_slots = policy.effective_queue(isolation);

        Self {
            workers: Arc::new(Semaphore::new(policy.max_concurrency.max(1))),
            queue: (queue_slots > 0).then(|| Arc::new(Semaphore::new(queue_slots))),
        }
    }

    pub async fn acquire(&self) -> Result<SlotGuard, PoolFull> {
        if let Ok(permit) = Arc::clone(&self.workers).try_acquire_owned() {
            return Ok(SlotGuard { _permit: permit });
        }

        let Some(queue) = &self.queue else {
            return Err(PoolFull);
        };

        let Ok(queued) = Arc::clone(queue).try_acquire_owned() else {
            return Err(PoolFull);
        };

        // Hold the queue slot while waiting for a worker slot.
        let permit = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|_| PoolFull)?;
        drop(queued);

        Ok(SlotGuard { _permit: permit })
    }

    #[cfg(test)]
    pub fn available_slots(&self) -> usize {
        self.workers.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(max_concurrency: usize, max_queue: usize) -> Bulkhead {
        Bulkhead::new(
            IsolationMode::Pool,
            &PoolPolicy {
                max_concurrency,
                max_queue,
                ..PoolPolicy::default()
            },
        )
    }

    #[tokio::test]
    async fn slots_are_released_on_drop() {
        let bulkhead = pool(2, 0);

        let a = bulkhead.acquire().await.unwrap();
        let _b = bulkhead.acquire().await.unwrap();
        assert_eq!(bulkhead.available_slots(), 0);

        drop(a);
        assert_eq!(bulkhead.available_slots(), 1);
        assert!(bulkhead.acquire().await.is_ok());
    }

    #[tokio::test]
    async fn no_queue_rejects_at_capacity() {
        let bulkhead = pool(1, 0);

        let _held = bulkhead.acquire().await.unwrap();

        assert_eq!(bulkhead.acquire().await.unwrap_err(), PoolFull);
    }

    #[tokio::test]
    async fn queued_submission_waits_for_a_slot() {
        let bulkhead = Arc::new(pool(1, 1));

        let held = bulkhead.acquire().await.unwrap();

        let waiter = {
            let bulkhead = Arc::clone(&bulkhead);
            tokio::spawn(async move { bulkhead.acquire().await.is_ok() })
        };
        tokio::task::yield_now().await;

        // The queue slot is taken; a third submission is rejected.
        assert_eq!(bulkhead.acquire().await.unwrap_err(), PoolFull);

        drop(held);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn rejection_threshold_cuts_below_queue_capacity() {
        let bulkhead = Bulkhead::new(
            IsolationMode::Pool,
            &PoolPolicy {
                max_concurrency: 1,
                max_queue: 10,
                queue_rejection_threshold: Some(0),
                ..PoolPolicy::default()
            },
        );

        let _held = bulkhead.acquire().await.unwrap();

        assert_eq!(bulkhead.acquire().await.unwrap_err(), PoolFull);
    }

    #[tokio::test]
    async fn semaphore_isolation_never_queues() {
        let bulkhead = Bulkhead::new(
            IsolationMode::Semaphore,
            &PoolPolicy {
                max_concurrency: 1,
                max_queue: 10,
                ..PoolPolicy::default()
            },
        );

        let _held = bulkhead.acquire().await.unwrap();

        assert_eq!(bulkhead.acquire().await.unwrap_err(), PoolFull);
    }

    #[tokio::test]
    async fn zero_concurrency_is_clamped_to_one() {
        let bulkhead = pool(0, 0);

        assert!(bulkhead.acquire().await.is_ok());
    }
}
