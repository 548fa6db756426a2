//! Per-tenant mutual exclusion.
//!
//! Status read-modify-write and chain tip-read/append each need a
//! serialization point per tenant, while different tenants proceed in
//! parallel. One registry instance guards one concern; callers that need both
//! acquire the status lock before the chain lock.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

type LockMap = DashMap<Uuid, Arc<Mutex<()>>>;

/// Registry of async mutexes keyed by tenant id. An entry lives only while
/// some task holds or waits for it.
#[derive(Debug, Default)]
pub struct TenantLocks {
    locks: Arc<LockMap>,
}

impl TenantLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `tenant_id`. The guard releases on drop.
    pub async fn acquire(&self, tenant_id: Uuid) -> TenantGuard {
        // Clone the Arc out so the DashMap shard lock is not held across the await.
        let lock = self
            .locks
            .entry(tenant_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        TenantGuard {
            tenant_id,
            guard: Some(lock.lock_owned().await),
            locks: self.locks.clone(),
        }
    }

    pub fn tracked_tenants(&self) -> usize {
        self.locks.len()
    }
}

/// Exclusive access to one tenant. Dropping it releases the mutex and
/// removes the registry entry if no other task is waiting on it.
#[derive(Debug)]
pub struct TenantGuard {
    tenant_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl Drop for TenantGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Holding the shard lock, nobody can clone the entry concurrently; a
        // count of 1 means only the registry references it.
        self.locks
            .remove_if(&self.tenant_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_tenant_is_serialized() {
        let locks = Arc::new(TenantLocks::new());
        let tenant = Uuid::new_v4();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = inside.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire(tenant).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.tracked_tenants(), 0);
    }

    #[tokio::test]
    async fn test_entries_are_pruned_on_release() {
        let locks = Arc::new(TenantLocks::new());
        let tenant = Uuid::new_v4();

        let first = locks.acquire(tenant).await;
        assert_eq!(locks.tracked_tenants(), 1);

        let waiter = tokio::spawn({
            let locks = locks.clone();
            async move {
                let _guard = locks.acquire(tenant).await;
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The waiter still references the entry.
        drop(first);
        assert_eq!(locks.tracked_tenants(), 1);
        waiter.await.unwrap();
        assert_eq!(locks.tracked_tenants(), 0);

        for _ in 0..100 {
            let _guard = locks.acquire(Uuid::new_v4()).await;
        }
        assert_eq!(locks.tracked_tenants(), 0);
    }

    #[tokio::test]
    async fn test_different_tenants_do_not_block() {
        let locks = TenantLocks::new();
        let _a = locks.acquire(Uuid::new_v4()).await;
        let b =
            tokio::time::timeout(Duration::from_millis(100), locks.acquire(Uuid::new_v4())).await;
        assert!(b.is_ok());
    }
}
