//! Per-id write serialization.
//!
//! One `tokio::sync::Mutex` per logical id, kept in a papaya map so looking a
//! lock up never blocks other ids. Acquisition is bounded by a timeout.
//!
//! Entries can be evicted. A lock only counts as held if, once acquired, it
//! is still the one mapped for its id; otherwise the waiter retries on the
//! current one.

use std::sync::Arc;
use std::time::Duration;

use octofhir_storage::{Key, StorageError};
use papaya::HashMap as PapayaHashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::warn;

pub type IdGuard = OwnedMutexGuard<()>;

#[derive(Debug)]
pub struct LockTable {
    locks: PapayaHashMap<Key, Arc<Mutex<()>>>,
    timeout: Duration,
}

impl LockTable {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: PapayaHashMap::new(),
            timeout,
        }
    }

    fn mutex_for(&self, key: &Key) -> Arc<Mutex<()>> {
        // The pin guard is not Send; drop it before any await.
        let guard = self.locks.pin();
        guard
            .get_or_insert_with(key.without_version(), || Arc::new(Mutex::new(())))
            .clone()
    }

    fn is_mapped(&self, key: &Key, mutex: &Arc<Mutex<()>>) -> bool {
        self.locks
            .pin()
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, mutex))
    }

    /// Lock one id.
    ///
    /// # Errors
    ///
    /// `Conflict` if the lock is not free within the timeout.
    pub async fn acquire(&self, key: &Key) -> Result<IdGuard, StorageError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            let mutex = self.mutex_for(key);
            let guard = match tokio::time::timeout_at(deadline, mutex.clone().lock_owned()).await {
                Ok(guard) => guard,
                Err(_) => {
                    warn!(
                        resource_type = %key.resource_type,
                        id = %key.id,
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Timed out waiting for resource lock"
                    );
                    return Err(StorageError::conflict(format!(
                        "{} is locked by another writer",
                        key.logical()
                    )));
                }
            };
            if self.is_mapped(key, &mutex) {
                return Ok(guard);
            }
            // Evicted while we waited.
        }
    }

    /// Drop the entry for `key`. The caller must hold its guard.
    pub fn remove(&self, key: &Key) -> bool {
        self.locks.pin().remove(key).is_some()
    }

    /// Drop entries nobody holds or waits on. Returns how many were dropped.
    pub fn evict_idle(&self) -> usize {
        let before = self.locks.len();
        self.locks
            .pin()
            .retain(|_, mutex| Arc::strong_count(mutex) > 1);
        before.saturating_sub(self.locks.len())
    }

    /// Lock several ids in sorted order. Duplicates are locked once.
    pub async fn acquire_all(&self, keys: &[Key]) -> Result<Vec<IdGuard>, StorageError> {
        let mut sorted: Vec<&Key> = keys.iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for key in sorted {
            guards.push(self.acquire(key).await?);
        }
        Ok(guards)
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_id_shares_a_lock() {
        let table = LockTable::new(Duration::from_millis(50));
        let _held = table.acquire(&Key::new("Patient", "p1")).await.unwrap();

        let err = table
            .acquire(&Key::versioned("Patient", "p1", "3"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        assert!(table.acquire(&Key::new("Patient", "p2")).await.is_ok());
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_released_on_drop() {
        let table = LockTable::new(Duration::from_millis(50));
        let key = Key::new("Patient", "p1");
        drop(table.acquire(&key).await.unwrap());
        assert!(table.acquire(&key).await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_while_held_hands_waiters_the_new_lock() {
        let table = Arc::new(LockTable::new(Duration::from_millis(500)));
        let key = Key::new("Patient", "p1");
        let held = table.acquire(&key).await.unwrap();

        let waiter = {
            let table = table.clone();
            let key = key.clone();
            tokio::spawn(async move { table.acquire(&key).await.map(|_| ()) })
        };
        tokio::task::yield_now().await;

        assert!(table.remove(&key));
        assert!(table.is_empty());
        drop(held);

        waiter.await.unwrap().unwrap();
        // The waiter re-registered a fresh lock for the id.
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_evict_idle_keeps_held_locks() {
        let table = LockTable::new(Duration::from_millis(50));
        let held = table.acquire(&Key::new("Patient", "busy")).await.unwrap();
        for id in ["a", "b", "c"] {
            drop(table.acquire(&Key::new("Patient", id)).await.unwrap());
        }
        assert_eq!(table.len(), 4);

        assert_eq!(table.evict_idle(), 3);
        assert_eq!(table.len(), 1);
        assert!(
            table
                .acquire(&Key::new("Patient", "busy"))
                .await
                .unwrap_err()
                .is_conflict()
        );
        drop(held);
        assert_eq!(table.evict_idle(), 1);
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_acquire_all_dedups() {
        let table = LockTable::new(Duration::from_millis(50));
        let keys = vec![
            Key::new("Patient", "b"),
            Key::new("Patient", "a"),
            Key::versioned("Patient", "b", "1"),
        ];
        let guards = table.acquire_all(&keys).await.unwrap();
        assert_eq!(guards.len(), 2);
    }
}
