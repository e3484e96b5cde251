//! Worker pool: exclusive leases over statically configured workers.

use conveyor_core::ids::WorkerId;
use conveyor_core::worker::{Worker, WorkerStatus};
use conveyor_core::{Error, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Free/busy bookkeeping for every registered worker.
///
/// A worker is handed to at most one job at a time. Waiters queue on a
/// [`Notify`] that is signalled whenever a worker is released.
pub struct WorkerPool {
    slots: Mutex<Vec<Slot>>,
    released: Notify,
}

struct Slot {
    worker: Worker,
    status: WorkerStatus,
    /// Bumped on every acquire; only the matching lease may free the slot.
    lease: u64,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(Vec::new()),
            released: Notify::new(),
        }
    }

    /// Build a pool from a list of workers, in registration order.
    pub fn from_workers(workers: impl IntoIterator<Item = Worker>) -> Result<Self> {
        let pool = Self::new();
        for worker in workers {
            pool.register(worker)?;
        }
        Ok(pool)
    }

    /// Register a worker as free. Names must be unique.
    pub fn register(&self, worker: Worker) -> Result<()> {
        let mut slots = self.lock();
        if slots.iter().any(|s| s.worker.id == worker.id) {
            return Err(Error::DuplicateName {
                kind: "worker",
                name: worker.id.to_string(),
            });
        }
        debug!(worker = %worker.id, pool = %worker.pool, "Worker registered");
        slots.push(Slot {
            worker,
            status: WorkerStatus::Free,
            lease: 0,
        });
        drop(slots);
        self.released.notify_waiters();
        Ok(())
    }

    /// Fail with `UnknownPool` when no worker belongs to `pool`.
    pub fn validate_pool(&self, pool: &str) -> Result<()> {
        if self.lock().iter().any(|s| s.worker.pool == pool) {
            Ok(())
        } else {
            Err(Error::UnknownPool(pool.to_string()))
        }
    }

    /// Take the first free worker of `pool` without waiting.
    pub fn try_acquire(self: &Arc<Self>, pool: &str) -> Result<Option<WorkerLease>> {
        let mut slots = self.lock();
        let mut known = false;

        for slot in slots.iter_mut().filter(|s| s.worker.pool == pool) {
            known = true;
            if slot.status.is_available() {
                slot.status = WorkerStatus::Busy;
                slot.lease += 1;
                debug!(worker = %slot.worker.id, pool, lease = slot.lease, "Worker acquired");
                return Ok(Some(WorkerLease {
                    pool: Arc::clone(self),
                    worker: slot.worker.clone(),
                    lease: slot.lease,
                    released: false,
                }));
            }
        }

        if known {
            Ok(None)
        } else {
            Err(Error::UnknownPool(pool.to_string()))
        }
    }

    /// Wait for a free worker of `pool`.
    ///
    /// Fails with `WorkerUnavailable` once `wait` elapses and with
    /// `Cancelled` if `cancel` fires first.
    pub async fn acquire(
        self: &Arc<Self>,
        pool: &str,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> Result<WorkerLease> {
        let deadline = Instant::now() + wait;
        let mut logged = false;

        loop {
            // Register interest before checking so a release between the
            // check and the await is not lost.
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(lease) = self.try_acquire(pool)? {
                return Ok(lease);
            }

            if !logged {
                info!(pool, wait_secs = wait.as_secs(), "All workers busy, queueing");
                logged = true;
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = sleep_until(deadline) => {
                    warn!(pool, wait_secs = wait.as_secs(), "Gave up waiting for a worker");
                    return Err(Error::WorkerUnavailable {
                        pool: pool.to_string(),
                        seconds: wait.as_secs(),
                    });
                }
            }
        }
    }

    /// Hand a lease back. Same as [`WorkerLease::release`].
    pub fn release(&self, lease: WorkerLease) -> bool {
        lease.release()
    }

    /// Free `id` if `lease` is the one currently holding it. Returns
    /// `false` for a free worker or a lease that has been superseded.
    fn free(&self, id: &WorkerId, lease: u64) -> bool {
        let mut slots = self.lock();
        let Some(slot) = slots.iter_mut().find(|s| &s.worker.id == id) else {
            warn!(worker = %id, "Release of unknown worker ignored");
            return false;
        };
        if slot.status.is_available() || slot.lease != lease {
            debug!(worker = %id, lease, current = slot.lease, "Stale release ignored");
            return false;
        }
        slot.status = WorkerStatus::Free;
        drop(slots);

        debug!(worker = %id, "Worker released");
        self.released.notify_waiters();
        true
    }

    pub fn status(&self, id: &WorkerId) -> Option<WorkerStatus> {
        self.lock()
            .iter()
            .find(|s| &s.worker.id == id)
            .map(|s| s.status)
    }

    /// Number of free workers in `pool`.
    pub fn free_count(&self, pool: &str) -> usize {
        self.lock()
            .iter()
            .filter(|s| s.worker.pool == pool && s.status.is_available())
            .count()
    }

    pub fn workers(&self) -> Vec<(Worker, WorkerStatus)> {
        self.lock()
            .iter()
            .map(|s| (s.worker.clone(), s.status))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Slot>> {
        // The critical sections never panic mid-update, so a poisoned
        // lock still holds consistent data.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive hold on one worker. Dropping the lease frees the worker.
pub struct WorkerLease {
    pool: Arc<WorkerPool>,
    worker: Worker,
    lease: u64,
    released: bool,
}

impl WorkerLease {
    pub fn worker(&self) -> &Worker {
        &self.worker
    }

    pub fn id(&self) -> &WorkerId {
        &self.worker.id
    }

    /// Release now instead of at drop.
    pub fn release(mut self) -> bool {
        self.released = true;
        self.pool.free(&self.worker.id, self.lease)
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        if !self.released {
            self.pool.free(&self.worker.id, self.lease);
        }
    }
}

impl std::fmt::Debug for WorkerLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerLease")
            .field("worker", &self.worker.id)
            .field("lease", &self.lease)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready_ok};

    fn pool() -> Arc<WorkerPool> {
        Arc::new(
            WorkerPool::from_workers([
                Worker::new("linux-01", "linux"),
                Worker::new("linux-02", "linux"),
                Worker::new("win-01", "windows"),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn test_try_acquire_registration_order() {
        let pool = pool();
        let first = pool.try_acquire("linux").unwrap().unwrap();
        let second = pool.try_acquire("linux").unwrap().unwrap();

        assert_eq!(first.id().as_str(), "linux-01");
        assert_eq!(second.id().as_str(), "linux-02");
        assert!(pool.try_acquire("linux").unwrap().is_none());
        assert_eq!(pool.free_count("windows"), 1);
    }

    #[test]
    fn test_unknown_pool() {
        let pool = pool();
        assert!(matches!(pool.try_acquire("mac"), Err(Error::UnknownPool(p)) if p == "mac"));
        assert!(pool.validate_pool("mac").is_err());
        assert!(pool.validate_pool("linux").is_ok());
    }

    #[test]
    fn test_duplicate_registration() {
        let pool = pool();
        let err = pool.register(Worker::new("linux-01", "linux")).unwrap_err();
        assert!(matches!(err, Error::DuplicateName { kind: "worker", .. }));
    }

    #[test]
    fn test_release_is_idempotent() {
        let pool = pool();
        let lease = pool.try_acquire("windows").unwrap().unwrap();
        let id = lease.id().clone();
        let generation = lease.lease;

        assert!(pool.release(lease));
        assert!(!pool.free(&id, generation));
        assert_eq!(pool.status(&id), Some(WorkerStatus::Free));
    }

    #[test]
    fn test_superseded_lease_cannot_free_worker() {
        let pool = pool();
        let first = pool.try_acquire("windows").unwrap().unwrap();
        let id = first.id().clone();
        let stale = first.lease;
        assert!(first.release());

        let second = pool.try_acquire("windows").unwrap().unwrap();
        assert_eq!(second.id(), &id);

        assert!(!pool.free(&id, stale));
        assert_eq!(pool.status(&id), Some(WorkerStatus::Busy));
        assert!(pool.try_acquire("windows").unwrap().is_none());

        drop(second);
        assert_eq!(pool.status(&id), Some(WorkerStatus::Free));
    }

    #[test]
    fn test_drop_releases() {
        let pool = pool();
        {
            let _lease = pool.try_acquire("windows").unwrap().unwrap();
            assert_eq!(pool.free_count("windows"), 0);
        }
        assert_eq!(pool.free_count("windows"), 1);
    }

    #[test]
    fn test_never_hands_out_busy_worker() {
        let pool = pool();
        let mut held = Vec::new();
        while let Some(lease) = pool.try_acquire("linux").unwrap() {
            held.push(lease);
        }
        assert_eq!(held.len(), 2);
        assert_ne!(held[0].id(), held[1].id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_release() {
        let pool = pool();
        let lease = pool.try_acquire("windows").unwrap().unwrap();
        let cancel = CancellationToken::new();

        let mut waiter =
            tokio_test::task::spawn(pool.acquire("windows", Duration::from_secs(60), &cancel));
        assert_pending!(waiter.poll());

        drop(lease);
        assert!(waiter.is_woken());
        let lease = assert_ready_ok!(waiter.poll());
        assert_eq!(lease.id().as_str(), "win-01");
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_times_out() {
        let pool = pool();
        let _lease = pool.try_acquire("windows").unwrap().unwrap();

        let err = pool
            .acquire("windows", Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::WorkerUnavailable { seconds: 5, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_cancelled() {
        let pool = pool();
        let _lease = pool.try_acquire("windows").unwrap().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pool
            .acquire("windows", Duration::from_secs(5), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_never_double_assigns() {
        use std::collections::HashSet;

        let pool = Arc::new(
            WorkerPool::from_workers((0..3).map(|i| Worker::new(format!("w{}", i), "linux")))
                .unwrap(),
        );
        let held = Arc::new(Mutex::new(HashSet::new()));
        let cancel = CancellationToken::new();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let held = Arc::clone(&held);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    for _ in 0..20 {
                        let lease = pool
                            .acquire("linux", Duration::from_secs(30), &cancel)
                            .await
                            .unwrap();
                        assert!(
                            held.lock().unwrap().insert(lease.id().clone()),
                            "{} handed out twice",
                            lease.id()
                        );
                        tokio::task::yield_now().await;
                        assert!(held.lock().unwrap().len() <= 3);
                        held.lock().unwrap().remove(lease.id());
                        drop(lease);
                    }
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(pool.free_count("linux"), 3);
    }

    #[tokio::test]
    async fn test_acquire_unknown_pool_does_not_block() {
        let pool = pool();
        let err = pool
            .acquire("mac", Duration::from_secs(3600), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
