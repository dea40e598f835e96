//! Bounded worker pool for direct-path shadow writes.
//!
//! A semaphore caps concurrent direct writes. The pool tracks how many tasks
//! hold a slot, how many are waiting for one and how many have finished, so
//! the synchronizer can read its saturation without introspecting the
//! runtime.

use kvshadow_core::{KvShadowResult, PoolUtilization, SyncError};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

#[derive(Debug, Default)]
struct PoolCounters {
    active: AtomicU64,
    queued: AtomicU64,
    completed: AtomicU64,
}

/// Semaphore-gated pool shared by every synchronizer call.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    counters: Arc<PoolCounters>,
}

/// A held worker slot. Releases the slot and counts the task as completed
/// when dropped, including when the owning task is aborted.
#[derive(Debug)]
pub struct PoolSlot {
    _permit: OwnedSemaphorePermit,
    counters: Arc<PoolCounters>,
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::AcqRel);
        self.counters.completed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Marks a task as waiting for a slot until dropped.
struct QueuedGuard {
    counters: Arc<PoolCounters>,
}

impl QueuedGuard {
    fn new(counters: &Arc<PoolCounters>) -> Self {
        counters.queued.fetch_add(1, Ordering::AcqRel);
        Self {
            counters: Arc::clone(counters),
        }
    }
}

impl Drop for QueuedGuard {
    fn drop(&mut self) {
        self.counters.queued.fetch_sub(1, Ordering::AcqRel);
    }
}

impl WorkerPool {
    /// Create a pool with `capacity` slots (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            counters: Arc::new(PoolCounters::default()),
        }
    }

    /// Number of slots the pool was created with.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait for a free slot. Only counts as queued while actually waiting.
    pub async fn reserve(&self) -> Result<PoolSlot, SyncError> {
        if let Some(slot) = self.try_reserve() {
            return Ok(slot);
        }
        self.reserve_queued().await
    }

    async fn reserve_queued(&self) -> Result<PoolSlot, SyncError> {
        let queued = QueuedGuard::new(&self.counters);
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| SyncError::PoolClosed)?;
        drop(queued);
        Ok(self.occupy(permit))
    }

    /// Take a slot if one is free right now.
    pub fn try_reserve(&self) -> Option<PoolSlot> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| self.occupy(permit))
    }

    fn occupy(&self, permit: OwnedSemaphorePermit) -> PoolSlot {
        self.counters.active.fetch_add(1, Ordering::AcqRel);
        PoolSlot {
            _permit: permit,
            counters: Arc::clone(&self.counters),
        }
    }

    /// Run `task` on the runtime once a slot is free.
    ///
    /// A free slot is taken before this returns, so the task counts as
    /// active straight away. Otherwise it counts as queued until a slot
    /// frees up. Aborting the returned handle releases whatever the task
    /// held.
    pub fn spawn<F, T>(&self, task: F) -> JoinHandle<KvShadowResult<T>>
    where
        F: Future<Output = KvShadowResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        match self.try_reserve() {
            Some(slot) => tokio::spawn(async move {
                let _slot = slot;
                task.await
            }),
            None => {
                let queued = QueuedGuard::new(&self.counters);
                let semaphore = Arc::clone(&self.semaphore);
                let pool = self.clone();
                tokio::spawn(async move {
                    let permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|_| SyncError::PoolClosed)?;
                    drop(queued);
                    let _slot = pool.occupy(permit);
                    task.await
                })
            }
        }
    }

    /// Stop handing out slots. Waiting and future reservations fail.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Point-in-time slot usage.
    pub fn utilization(&self) -> PoolUtilization {
        PoolUtilization {
            active: self.counters.active.load(Ordering::Acquire),
            queued: self.counters.queued.load(Ordering::Acquire),
            capacity: self.capacity as u64,
            completed: self.counters.completed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvshadow_core::KvShadowError;
    use std::time::Duration;

    #[tokio::test]
    async fn test_reserve_tracks_active_and_completed() {
        let pool = WorkerPool::new(3);
        let a = pool.reserve().await.unwrap();
        let b = pool.try_reserve().unwrap();
        assert_eq!(pool.utilization().active, 2);

        drop(a);
        drop(b);
        let util = pool.utilization();
        assert_eq!(util.active, 0);
        assert_eq!(util.completed, 2);
        assert_eq!(util.capacity, 3);
    }

    #[tokio::test]
    async fn test_try_reserve_fails_when_full() {
        let pool = WorkerPool::new(1);
        let _held = pool.try_reserve().unwrap();
        assert!(pool.try_reserve().is_none());
    }

    #[tokio::test]
    async fn test_zero_capacity_is_clamped() {
        assert_eq!(WorkerPool::new(0).capacity(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_counts_queued_tasks() {
        let pool = WorkerPool::new(1);
        let held = pool.reserve().await.unwrap();

        let handle = pool.spawn(async { Ok::<_, KvShadowError>(7) });
        tokio::task::yield_now().await;
        assert_eq!(pool.utilization().queued, 1);

        drop(held);
        assert_eq!(handle.await.unwrap().unwrap(), 7);
        let util = pool.utilization();
        assert_eq!(util.queued, 0);
        assert_eq!(util.active, 0);
        assert_eq!(util.completed, 2);
    }

    #[tokio::test]
    async fn test_spawn_with_free_slots_is_not_queued() {
        let pool = WorkerPool::new(4);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = pool.spawn(async move {
            let _ = rx.await;
            Ok::<_, KvShadowError>(())
        });

        let util = pool.utilization();
        assert_eq!(util.active, 1);
        assert_eq!(util.queued, 0);

        let _ = tx.send(());
        handle.await.unwrap().unwrap();
        assert_eq!(pool.utilization().active, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_releases_slot() {
        let pool = WorkerPool::new(1);
        let handle = pool.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, KvShadowError>(())
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(pool.utilization().active, 1);

        handle.abort();
        let _ = handle.await;
        assert_eq!(pool.utilization().active, 0);
        assert!(pool.try_reserve().is_some());
    }

    #[tokio::test]
    async fn test_closed_pool_rejects() {
        let pool = WorkerPool::new(1);
        pool.close();
        assert!(matches!(pool.reserve().await, Err(SyncError::PoolClosed)));

        let result = pool.spawn(async { Ok::<_, KvShadowError>(()) }).await.unwrap();
        assert!(matches!(
            result,
            Err(KvShadowError::Sync(SyncError::PoolClosed))
        ));
    }
}
