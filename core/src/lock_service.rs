//! Exclusive per-job locking, the cluster's single atomic coordination point.
//!
//! A thin, logging wrapper over [`LockStore`]; kept as its own type (rather than inlining calls
//! to the store everywhere) because several components — the selector, the supervisor, and
//! retirement — all need the same "lock, or skip" and "cleanup at a daemon boundary" behavior.

use crate::error::StoreError;
use crate::model::JobId;
use crate::store::LockStore;
use std::sync::Arc;
use tracing::debug;

pub struct LockService<L: LockStore + ?Sized> {
    store: Arc<L>,
    owner: String,
}

impl<L: LockStore + ?Sized> LockService<L> {
    pub fn new(store: Arc<L>, owner: impl Into<String>) -> Self {
        Self { store, owner: owner.into() }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Attempt to acquire the lock for `job_id`. `true` on success.
    pub async fn lock(&self, job_id: JobId) -> Result<bool, StoreError> {
        let acquired = self.store.lock(&self.owner, job_id).await?;
        if !acquired {
            debug!(job_id, "skipped job due to lock failure");
        }
        Ok(acquired)
    }

    pub async fn unlock(&self, job_id: JobId) -> Result<(), StoreError> {
        self.store.unlock(job_id).await
    }

    pub async fn is_locked(&self, job_id: JobId) -> Result<bool, StoreError> {
        self.store.is_locked(job_id).await
    }

    /// Remove every lock owned by this worker. Run at startup and teardown.
    pub async fn cleanup(&self) -> Result<u64, StoreError> {
        let removed = self.store.cleanup(&self.owner).await?;
        debug!(removed, owner = %self.owner, "cleanup removed sys.lock records");
        Ok(removed)
    }

    /// Remove locks whose job id is no longer present in the queue (see the Open Question
    /// resolution in the design notes).
    pub async fn cleanup_orphaned(&self, existing_ids: &[JobId]) -> Result<u64, StoreError> {
        let removed = self.store.cleanup_orphaned(existing_ids).await?;
        if removed > 0 {
            debug!(removed, "cleanup removed orphaned sys.lock records");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;

    #[tokio::test]
    async fn only_one_of_k_concurrent_lockers_succeeds() {
        let store = Arc::new(MemoryStore::new(vec![]));
        let services: Vec<_> = (0..5).map(|i| LockService::new(store.clone(), format!("worker-{i}"))).collect();

        let mut successes = 0;
        for svc in &services {
            if svc.lock(42).await.unwrap() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn cleanup_only_removes_locks_owned_by_that_worker() {
        let store = Arc::new(MemoryStore::new(vec![]));
        let a = LockService::new(store.clone(), "a");
        let b = LockService::new(store.clone(), "b");
        a.lock(1).await.unwrap();
        a.lock(2).await.unwrap();
        b.lock(3).await.unwrap();

        let removed = a.cleanup().await.unwrap();
        assert_eq!(removed, 2);
        assert!(!a.is_locked(1).await.unwrap());
        assert!(!a.is_locked(2).await.unwrap());
        assert!(b.is_locked(3).await.unwrap());
    }

    #[tokio::test]
    async fn cleanup_orphaned_drops_only_locks_for_ids_absent_from_the_queue() {
        let store = Arc::new(MemoryStore::new(vec![]));
        let svc = LockService::new(store.clone(), "a");
        svc.lock(1).await.unwrap();
        svc.lock(2).await.unwrap();

        let removed = svc.cleanup_orphaned(&[2]).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!svc.is_locked(1).await.unwrap());
        assert!(svc.is_locked(2).await.unwrap());
    }

    #[tokio::test]
    async fn unlock_then_relock_succeeds() {
        let store = Arc::new(MemoryStore::new(vec![]));
        let svc = LockService::new(store.clone(), "a");
        assert!(svc.lock(7).await.unwrap());
        assert!(!svc.lock(7).await.unwrap());
        svc.unlock(7).await.unwrap();
        assert!(svc.lock(7).await.unwrap());
    }
}
