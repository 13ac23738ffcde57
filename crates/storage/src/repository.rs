use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("quota exceeded writing {key}: {needed} bytes over a {limit} byte limit")]
    QuotaExceeded {
        key: String,
        needed: usize,
        limit: usize,
    },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Durable string key-value medium shared by every page of the origin.
///
/// Mirrors the browser's `localStorage`: flat keys, string values, no
/// transactions, last write wins.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the medium cannot be read.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::QuotaExceeded` when the medium is full, or other
    /// storage errors.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove `key`. Removing a missing key is not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the medium cannot be written.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// List every key currently stored.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the medium cannot be read.
    async fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// In-memory store for tests, prototyping and hosts without durable storage.
///
/// Optionally enforces a byte quota (key plus value lengths, like browsers
/// do) and can be switched off entirely to emulate disabled storage.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
    quota_bytes: Option<usize>,
    disabled: Arc<AtomicBool>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_quota(mut self, bytes: usize) -> Self {
        self.quota_bytes = Some(bytes);
        self
    }

    /// Make every subsequent access fail with `StorageError::Unavailable`.
    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::Release);
    }

    /// Copy of the current contents, for assertions.
    #[must_use]
    pub fn dump(&self) -> BTreeMap<String, String> {
        self.entries
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    fn check_enabled(&self) -> Result<(), StorageError> {
        if self.disabled.load(Ordering::Acquire) {
            return Err(StorageError::Unavailable("storage is disabled".into()));
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>, StorageError> {
        self.entries
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check_enabled()?;
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check_enabled()?;
        let mut guard = self.lock()?;
        if let Some(limit) = self.quota_bytes {
            let others: usize = guard
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = others + key.len() + value.len();
            if needed > limit {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_owned(),
                    needed,
                    limit,
                });
            }
        }
        guard.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check_enabled()?;
        self.lock()?.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.check_enabled()?;
        Ok(self.lock()?.keys().cloned().collect())
    }
}

/// Wraps the key-value medium behind a trait object for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub kv: Arc<dyn KeyValueStore>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            kv: Arc::new(InMemoryStore::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_remove_round_trip() {
        let store = InMemoryStore::new();
        store.set("quiz_random_v2::a", "[1,2]").await.unwrap();
        assert_eq!(
            store.get("quiz_random_v2::a").await.unwrap().as_deref(),
            Some("[1,2]")
        );
        store.set("quiz_random_v2::a", "[3]").await.unwrap();
        assert_eq!(store.get("quiz_random_v2::a").await.unwrap().as_deref(), Some("[3]"));

        store.remove("quiz_random_v2::a").await.unwrap();
        store.remove("missing").await.unwrap();
        assert!(store.get("quiz_random_v2::a").await.unwrap().is_none());
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn quota_counts_keys_and_values() {
        let store = InMemoryStore::new().with_quota(10);
        store.set("ab", "cdef").await.unwrap();
        // Replacing an entry only counts its new size.
        store.set("ab", "cdefgh").await.unwrap();
        let err = store.set("xy", "z").await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::QuotaExceeded {
                needed: 11,
                limit: 10,
                ..
            }
        ));
        assert_eq!(store.dump().len(), 1);
    }

    #[tokio::test]
    async fn disabled_store_rejects_every_access() {
        let store = InMemoryStore::new();
        store.set("k", "v").await.unwrap();
        store.set_disabled(true);
        assert!(matches!(store.get("k").await, Err(StorageError::Unavailable(_))));
        assert!(store.set("k", "w").await.is_err());
        assert!(store.keys().await.is_err());
        store.set_disabled(false);
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn clones_share_contents() {
        let store = InMemoryStore::new();
        let other = store.clone();
        store.entries.lock().unwrap().insert("k".into(), "v".into());
        assert_eq!(other.dump().get("k").map(String::as_str), Some("v"));
    }
}
