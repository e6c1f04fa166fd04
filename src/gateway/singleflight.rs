//! Per-key single-flight guard shared by the credential and document caches.
//!
//! Callers take the key's async mutex before refreshing; whoever wins the
//! race performs the work while everyone else parks on the lock and then
//! re-checks the cache. One refresh per key, no thundering herd.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct Group {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding refreshes for `key`. Lock it, re-check the cache,
    /// and only then do the work.
    pub fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drop locks for keys no longer tracked by the caller's cache. Only
    /// idle locks are removed; a lock some task still holds stays put.
    pub fn retain<F>(&self, mut keep: F)
    where
        F: FnMut(&str) -> bool,
    {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.retain(|key, lock| keep(key) || Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn concurrent_callers_share_one_refresh() {
        let group = Arc::new(Group::new());
        let refreshes = Arc::new(AtomicU32::new(0));
        let cache: Arc<Mutex<Option<u32>>> = Arc::new(Mutex::new(None));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let group = group.clone();
            let refreshes = refreshes.clone();
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                let lock = group.key_lock("instance-a");
                let _guard = lock.lock().await;
                if cache.lock().unwrap().is_some() {
                    return;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                refreshes.fetch_add(1, Ordering::SeqCst);
                *cache.lock().unwrap() = Some(42);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(*cache.lock().unwrap(), Some(42));
    }

    #[tokio::test]
    async fn retain_drops_only_idle_locks() {
        let group = Group::new();
        let held = group.key_lock("held");
        let _guard = held.lock().await;
        let _idle = group.key_lock("idle");
        drop(_idle);

        group.retain(|_| false);
        assert_eq!(group.len(), 1);
    }
}
