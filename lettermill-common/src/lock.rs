//! Keyed exclusive locking
//!
//! Tracker storage and the due-campaign scan both need cheap mutual exclusion
//! scoped to an identifier, with a bounded acquisition timeout that the caller
//! handles as a normal outcome instead of an error. Independent keys never
//! contend with each other.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Exclusive locks keyed by an arbitrary identifier.
///
/// A lock entry is created on first use and kept for the lifetime of the
/// registry; the set of keys (tracker ids, scan names) is small and stable.
#[derive(Debug, Default)]
pub struct KeyedLock {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    fn entry(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the lock for `key`, waiting as long as it takes.
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        self.entry(key).lock_owned().await
    }

    /// Acquire the lock for `key`, giving up after `timeout`.
    ///
    /// Returns `None` on timeout so the caller can skip its critical section
    /// (e.g. a scheduler tick skipping one scan cycle) rather than fail.
    pub async fn try_acquire(&self, key: &str, timeout: Duration) -> Option<OwnedMutexGuard<()>> {
        let lock = self.entry(key);
        tokio::time::timeout(timeout, lock.lock_owned()).await.ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exclusive_within_a_key() {
        let locks = Arc::new(KeyedLock::new());

        let guard = locks.acquire("tracker:a").await;

        // A second acquisition on the same key must time out while the first
        // guard is held.
        assert!(
            locks
                .try_acquire("tracker:a", Duration::from_millis(50))
                .await
                .is_none()
        );

        drop(guard);
        assert!(
            locks
                .try_acquire("tracker:a", Duration::from_millis(50))
                .await
                .is_some()
        );
    }

    #[tokio::test]
    async fn independent_keys_do_not_contend() {
        let locks = KeyedLock::new();

        let _a = locks.acquire("tracker:a").await;
        let b = locks
            .try_acquire("tracker:b", Duration::from_millis(50))
            .await;
        assert!(b.is_some());
    }

    #[tokio::test]
    async fn timed_out_acquisition_is_not_an_error() {
        let locks = Arc::new(KeyedLock::new());
        let held = locks.acquire("scan").await;

        let locks_clone = Arc::clone(&locks);
        let skipped = tokio::spawn(async move {
            locks_clone
                .try_acquire("scan", Duration::from_millis(10))
                .await
                .is_none()
        })
        .await
        .expect("task panicked");

        assert!(skipped);
        drop(held);
    }
}
