//! Durable key-value boundary
//!
//! The session layer only needs three string operations from its storage:
//! read, write and delete. Anything that can provide them with
//! process-surviving semantics can back a session.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::kv::Result;

/// Storage for values that must survive process restarts
///
/// Each call completes synchronously; a write or delete that has returned
/// `Ok` is final. Writes are last-write-wins per key.
pub trait DurableStore: Send + Sync {
    /// Read the value stored under `key`
    fn read(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Removing an absent key succeeds.
    fn delete(&self, key: &str) -> Result<()>;
}

/// In-memory durable store
///
/// Survives nothing, but honours the same contract. Used for tests and for
/// sessions that should not outlive the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-seeded with entries
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self { entries: RwLock::new(entries) }
    }

    /// Check whether a key is present
    pub fn contains(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl DurableStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store.write("access_token", "T1").unwrap();
        assert_eq!(store.read("access_token").unwrap(), Some("T1".to_string()));
        assert!(store.contains("access_token"));

        store.write("access_token", "T2").unwrap();
        assert_eq!(store.read("access_token").unwrap(), Some("T2".to_string()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_memory_store_delete_absent() {
        let store = MemoryStore::new();
        store.delete("refresh_token").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_with_entries() {
        let store = MemoryStore::with_entries([("access_token", "STALE")]);
        assert_eq!(store.read("access_token").unwrap(), Some("STALE".to_string()));
        assert_eq!(store.read("refresh_token").unwrap(), None);
    }
}
