//! Process-local storage backend.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use tokio::sync::Mutex;

use super::{counter_value, Mutator, Storage, StorageError};

#[derive(Default)]
struct Inner {
    data: HashMap<String, Value>,
    /// Expiry deadlines for keys created with a window hint.
    expiries: HashMap<String, Instant>,
    /// Lock key -> (holder token, deadline).
    locks: HashMap<String, (String, Instant)>,
}

impl Inner {
    /// Drops the value under `key` if its window has elapsed.
    fn evict_if_expired(&mut self, key: &str) {
        if let Some(deadline) = self.expiries.get(key) {
            if Instant::now() >= *deadline {
                self.expiries.remove(key);
                self.data.remove(key);
            }
        }
    }
}

/// In-memory [`Storage`] backend.
///
/// All operations run under a single mutex, which trivially satisfies the
/// atomicity contract. State is lost when the process exits; suitable for
/// development, testing, and single-process deployments.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage").finish_non_exhaustive()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn put(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().await;
        inner.expiries.remove(key);
        inner.data.insert(key.to_owned(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let mut inner = self.inner.lock().await;
        inner.evict_if_expired(key);
        Ok(inner.data.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().await;
        inner.expiries.remove(key);
        Ok(inner.data.remove(key).is_some())
    }

    async fn update(&self, key: &str, mutator: Mutator) -> Result<Option<Value>, StorageError> {
        let mut inner = self.inner.lock().await;
        inner.evict_if_expired(key);
        let current = inner.data.get(key).cloned();
        let next = mutator(current);
        match &next {
            Some(value) => {
                inner.data.insert(key.to_owned(), value.clone());
            }
            None => {
                inner.data.remove(key);
                inner.expiries.remove(key);
            }
        }
        Ok(next)
    }

    async fn atomic_add(
        &self,
        key: &str,
        delta: Decimal,
        window: Option<Duration>,
    ) -> Result<Decimal, StorageError> {
        let mut inner = self.inner.lock().await;
        inner.evict_if_expired(key);
        let created = !inner.data.contains_key(key);
        let current = counter_value(inner.data.get(key));
        let next = current + delta;
        inner.data.insert(key.to_owned(), Value::String(next.to_string()));
        if created {
            if let Some(window) = window {
                inner.expiries.insert(key.to_owned(), Instant::now() + window);
            }
        }
        Ok(next)
    }

    async fn acquire_lock(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        if let Some((_, deadline)) = inner.locks.get(key) {
            if now < *deadline {
                return Ok(false);
            }
        }
        inner.locks.insert(key.to_owned(), (token.to_owned(), now + ttl));
        Ok(true)
    }

    async fn release_lock(&self, key: &str, token: &str) -> Result<bool, StorageError> {
        let mut inner = self.inner.lock().await;
        match inner.locks.get(key) {
            Some((held, deadline)) if held == token && Instant::now() < *deadline => {
                inner.locks.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Value)>, StorageError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .data
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_delete() {
        let storage = MemoryStorage::new();
        storage.put("k", json!({"a": 1})).await.unwrap();
        assert_eq!(storage.get("k").await.unwrap(), Some(json!({"a": 1})));
        assert!(storage.delete("k").await.unwrap());
        assert!(!storage.delete("k").await.unwrap());
        assert_eq!(storage.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_creates_and_deletes() {
        let storage = MemoryStorage::new();
        let stored = storage
            .update("k", Box::new(|cur| {
                assert!(cur.is_none());
                Some(json!(1))
            }))
            .await
            .unwrap();
        assert_eq!(stored, Some(json!(1)));

        let stored = storage.update("k", Box::new(|_| None)).await.unwrap();
        assert_eq!(stored, None);
        assert_eq!(storage.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_atomic_add_accumulates() {
        let storage = MemoryStorage::new();
        let v = storage
            .atomic_add("c", Decimal::new(105, 1), None)
            .await
            .unwrap();
        assert_eq!(v, Decimal::new(105, 1));
        let v = storage
            .atomic_add("c", Decimal::new(-5, 1), None)
            .await
            .unwrap();
        assert_eq!(v, Decimal::new(100, 1));
        assert_eq!(storage.get("c").await.unwrap(), Some(json!("10.0")));
    }

    #[tokio::test]
    async fn test_atomic_add_window_expiry() {
        let storage = MemoryStorage::new();
        storage
            .atomic_add("c", Decimal::ONE, Some(Duration::from_millis(20)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        // Expired: the next add restarts from zero.
        let v = storage.atomic_add("c", Decimal::ONE, None).await.unwrap();
        assert_eq!(v, Decimal::ONE);
    }

    #[tokio::test]
    async fn test_lock_acquire_release_token_semantics() {
        let storage = MemoryStorage::new();
        let ttl = Duration::from_secs(30);
        assert!(storage.acquire_lock("lock:w", "t1", ttl).await.unwrap());
        assert!(!storage.acquire_lock("lock:w", "t2", ttl).await.unwrap());
        // Foreign token cannot release.
        assert!(!storage.release_lock("lock:w", "t2").await.unwrap());
        assert!(storage.release_lock("lock:w", "t1").await.unwrap());
        // Released: a fresh acquire succeeds.
        assert!(storage.acquire_lock("lock:w", "t2", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_ttl_expiry() {
        let storage = MemoryStorage::new();
        assert!(storage
            .acquire_lock("lock:w", "stale", Duration::from_millis(10))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        // Expired: takeover succeeds, stale token no longer releases.
        assert!(storage
            .acquire_lock("lock:w", "fresh", Duration::from_secs(30))
            .await
            .unwrap());
        assert!(!storage.release_lock("lock:w", "stale").await.unwrap());
        assert!(storage.release_lock("lock:w", "fresh").await.unwrap());
    }

    #[tokio::test]
    async fn test_scan_by_prefix() {
        let storage = MemoryStorage::new();
        storage.put("ledger:1", json!(1)).await.unwrap();
        storage.put("ledger:2", json!(2)).await.unwrap();
        storage.put("intent:1", json!(3)).await.unwrap();
        let mut keys: Vec<String> = storage
            .scan("ledger:")
            .await
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["ledger:1", "ledger:2"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_atomic_add_is_race_free() {
        use std::sync::Arc;

        let storage = Arc::new(MemoryStorage::new());
        let mut handles = Vec::new();
        for _ in 0..50 {
            let storage = Arc::clone(&storage);
            handles.push(tokio::spawn(async move {
                storage.atomic_add("c", Decimal::ONE, None).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let total = counter_value(storage.get("c").await.unwrap().as_ref());
        assert_eq!(total, Decimal::new(50, 0));
    }
}
