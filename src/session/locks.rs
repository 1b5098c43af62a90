//! Advisory locks keyed by session or user id
//!
//! Appends and closes for the same session are serialized through these so a
//! turn cannot land on a session that is being archived underneath it.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default, Clone)]
pub struct SessionLocks {
    inner: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `key`
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut guard = self.inner.lock().await;
            Arc::clone(guard.entry(key.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Drops the lock entry for a key that will not be used again
    pub async fn remove(&self, key: &str) {
        self.inner.lock().await.remove(key);
    }

    /// Drops the entry for `key` unless another caller holds or awaits it
    pub async fn release(&self, key: &str) {
        let mut guard = self.inner.lock().await;
        if guard.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            guard.remove(key);
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = SessionLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let locks = locks.clone();
            let inside = Arc::clone(&inside);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _guard = locks.acquire("s1").await;
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
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = SessionLocks::new();
        let _a = locks.acquire("a").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("b")).await;
        assert!(b.is_ok());
        assert_eq!(locks.len().await, 2);

        locks.remove("a").await;
        assert_eq!(locks.len().await, 1);
    }

    #[tokio::test]
    async fn test_release_keeps_contended_entries() {
        let locks = SessionLocks::new();
        let held = locks.acquire("user:alice").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("user:alice").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        locks.release("user:alice").await;
        assert_eq!(locks.len().await, 1);

        drop(held);
        waiter.await.unwrap();
        locks.release("user:alice").await;
        assert!(locks.is_empty().await);
    }
}
