//! Key-value store for session tokens and snapshots
//!
//! This module provides an on-disk key-value store backed by sled. Values are
//! stored as JSON so the same database can hold raw token strings and
//! structured snapshot envelopes side by side.

use serde::{de::DeserializeOwned, Serialize};
use sled::Db;
use std::sync::Arc;
use thiserror::Error;

use crate::durable::DurableStore;

/// Key-value store error types
#[derive(Debug, Error)]
pub enum KvError {
    /// Sled database error
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid key
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Result type for key-value operations
pub type Result<T> = std::result::Result<T, KvError>;

/// Key-value store configuration
#[derive(Debug, Clone)]
pub struct KvConfig {
    /// Database path
    pub path: String,
    /// Cache capacity in bytes
    pub cache_capacity: u64,
    /// Enable compression
    pub use_compression: bool,
    /// Flush interval in milliseconds (None for immediate flush)
    pub flush_every_ms: Option<u64>,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            path: "vmhost_session.db".to_string(),
            cache_capacity: 8 * 1024 * 1024, // 8MB
            use_compression: false,
            flush_every_ms: None,
        }
    }
}

impl KvConfig {
    /// Create a new configuration with a custom path
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into(), ..Default::default() }
    }

    /// Set cache capacity in bytes
    pub fn cache_capacity(mut self, bytes: u64) -> Self {
        self.cache_capacity = bytes;
        self
    }

    /// Enable or disable compression
    pub fn use_compression(mut self, enabled: bool) -> Self {
        self.use_compression = enabled;
        self
    }

    /// Set flush interval in milliseconds
    ///
    /// `None` makes every write flush synchronously, which is what the session
    /// store expects: a transition is only final once its writes are durable.
    pub fn flush_every_ms(mut self, ms: Option<u64>) -> Self {
        self.flush_every_ms = ms;
        self
    }
}

/// Key-value store implementation
pub struct KvStore {
    db: Arc<Db>,
    flush_on_write: bool,
}

impl KvStore {
    /// Create a new key-value store with configuration
    pub fn new(config: KvConfig) -> Result<Self> {
        let mut db_config = sled::Config::new()
            .path(&config.path)
            .cache_capacity(config.cache_capacity)
            .use_compression(config.use_compression);

        let flush_on_write = config.flush_every_ms.is_none();
        db_config = db_config.flush_every_ms(config.flush_every_ms);

        let db = db_config.open()?;
        tracing::debug!(path = %config.path, "opened key-value store");

        Ok(Self { db: Arc::new(db), flush_on_write })
    }

    /// Create an in-memory key-value store (for testing)
    pub fn in_memory() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;

        Ok(Self { db: Arc::new(db), flush_on_write: false })
    }

    /// Get a value by key
    pub fn get<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.db.get(key.as_bytes())? {
            Some(bytes) => {
                let value: T = serde_json::from_slice(&bytes)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Set a value by key
    pub fn set<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize,
    {
        validate_key(key)?;
        let bytes = serde_json::to_vec(value)?;
        self.db.insert(key.as_bytes(), bytes)?;
        self.flush_if_sync()
    }

    /// Remove a value by key
    pub fn remove(&self, key: &str) -> Result<bool> {
        let existed = self.db.remove(key.as_bytes())?.is_some();
        if existed {
            self.flush_if_sync()?;
        }
        Ok(existed)
    }

    /// Check if a key exists
    pub fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.db.contains_key(key.as_bytes())?)
    }

    /// Clear all data
    pub fn clear(&self) -> Result<()> {
        self.db.clear()?;
        self.flush_if_sync()
    }

    /// Flush pending writes to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Get the number of keys in the store
    pub fn len(&self) -> usize {
        self.db.len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    fn flush_if_sync(&self) -> Result<()> {
        if self.flush_on_write {
            self.db.flush()?;
        }
        Ok(())
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(KvError::InvalidKey("key must not be empty".to_string()));
    }
    Ok(())
}

impl DurableStore for KvStore {
    fn read(&self, key: &str) -> Result<Option<String>> {
        self.get::<String>(key)
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        self.set(key, &value)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.remove(key).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestEnvelope {
        version: u32,
        data: String,
    }

    #[test]
    fn test_kv_store_creation() {
        let kv = KvStore::in_memory().unwrap();
        assert!(kv.is_empty());
    }

    #[test]
    fn test_set_and_get() {
        let kv = KvStore::in_memory().unwrap();

        kv.set("access_token", &"T1".to_string()).unwrap();
        let value: Option<String> = kv.get("access_token").unwrap();
        assert_eq!(value, Some("T1".to_string()));
    }

    #[test]
    fn test_set_and_get_struct() {
        let kv = KvStore::in_memory().unwrap();

        let envelope = TestEnvelope { version: 1, data: "{}".to_string() };
        kv.set("auth-storage", &envelope).unwrap();

        let value: Option<TestEnvelope> = kv.get("auth-storage").unwrap();
        assert_eq!(value, Some(envelope));
    }

    #[test]
    fn test_get_nonexistent() {
        let kv = KvStore::in_memory().unwrap();
        let value: Option<String> = kv.get("missing").unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_remove() {
        let kv = KvStore::in_memory().unwrap();

        kv.set("refresh_token", &"R1".to_string()).unwrap();
        assert!(kv.remove("refresh_token").unwrap());
        assert!(!kv.remove("refresh_token").unwrap());
        assert!(!kv.contains("refresh_token").unwrap());
    }

    #[test]
    fn test_empty_key_rejected() {
        let kv = KvStore::in_memory().unwrap();
        let result = kv.set("", &"value".to_string());
        assert!(matches!(result, Err(KvError::InvalidKey(_))));
    }

    #[test]
    fn test_clear() {
        let kv = KvStore::in_memory().unwrap();

        kv.set("key1", &"value1".to_string()).unwrap();
        kv.set("key2", &"value2".to_string()).unwrap();
        assert_eq!(kv.len(), 2);

        kv.clear().unwrap();
        assert!(kv.is_empty());
    }

    #[test]
    fn test_durable_store_impl() {
        let kv = KvStore::in_memory().unwrap();
        let store: &dyn DurableStore = &kv;

        store.write("access_token", "T1").unwrap();
        assert_eq!(store.read("access_token").unwrap(), Some("T1".to_string()));

        store.delete("access_token").unwrap();
        assert_eq!(store.read("access_token").unwrap(), None);

        // Deleting an absent key is not an error
        store.delete("access_token").unwrap();
    }

    #[test]
    fn test_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("session.db");
        let path = path.to_string_lossy().to_string();

        {
            let kv = KvStore::new(KvConfig::new(path.clone())).unwrap();
            kv.write("access_token", "persisted").unwrap();
        }

        let kv = KvStore::new(KvConfig::new(path)).unwrap();
        assert_eq!(kv.read("access_token").unwrap(), Some("persisted".to_string()));
    }

    #[test]
    fn test_compressed_store_reopens() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("compressed.db");
        let path = path.to_string_lossy().to_string();

        {
            let kv = KvStore::new(KvConfig::new(path.clone()).use_compression(true)).unwrap();
            kv.write("auth-storage", &"x".repeat(4096)).unwrap();
        }

        let kv = KvStore::new(KvConfig::new(path).use_compression(true)).unwrap();
        assert_eq!(kv.read("auth-storage").unwrap().map(|v| v.len()), Some(4096));
    }

    #[test]
    fn test_config_builder() {
        let config = KvConfig::new("custom.db")
            .cache_capacity(1024)
            .use_compression(true)
            .flush_every_ms(Some(250));

        assert_eq!(config.path, "custom.db");
        assert_eq!(config.cache_capacity, 1024);
        assert!(config.use_compression);
        assert_eq!(config.flush_every_ms, Some(250));
    }
}
