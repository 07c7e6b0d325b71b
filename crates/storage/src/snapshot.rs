//! Versioned snapshot slots
//!
//! A snapshot slot keeps one serialized value under a single key of a
//! [`DurableStore`], wrapped in an envelope carrying a schema version and a
//! checksum so that a torn or hand-edited value is detected on load instead of
//! being trusted.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

use crate::durable::DurableStore;
use crate::kv::KvError;

/// Snapshot error types
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Underlying store error
    #[error("Storage error: {0}")]
    Storage(#[from] KvError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Corruption detected
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// Version mismatch
    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected version
        expected: u32,
        /// Found version
        found: u32,
    },
}

/// Result type for snapshot operations
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Versioned state container
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VersionedState<T> {
    /// Version number
    version: u32,
    /// Checksum for corruption detection
    checksum: String,
    /// The actual state data
    data: T,
}

impl<T: Serialize> VersionedState<T> {
    fn new(version: u32, data: T) -> Result<Self> {
        let checksum = checksum_of(&data)?;
        Ok(Self { version, checksum, data })
    }

    fn verify_checksum(&self) -> Result<()> {
        let computed = checksum_of(&self.data)?;

        if computed != self.checksum {
            return Err(SnapshotError::Corruption(format!(
                "Checksum mismatch: expected {}, got {}",
                self.checksum, computed
            )));
        }

        Ok(())
    }
}

fn checksum_of<T: Serialize>(data: &T) -> Result<String> {
    let data_json = serde_json::to_string(data)?;
    Ok(format!("{:x}", md5::compute(&data_json)))
}

/// A typed, versioned value stored under one key
pub struct SnapshotSlot<T> {
    store: Arc<dyn DurableStore>,
    key: String,
    version: u32,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> SnapshotSlot<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Create a slot for `key` at schema version `version`
    pub fn new(store: Arc<dyn DurableStore>, key: impl Into<String>, version: u32) -> Self {
        Self { store, key: key.into(), version, _phantom: PhantomData }
    }

    /// The key this slot occupies
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Load the stored value
    ///
    /// Returns `Ok(None)` when nothing has been saved. An envelope that fails
    /// to parse, has the wrong version or fails its checksum is an error.
    pub fn load(&self) -> Result<Option<T>> {
        let Some(raw) = self.store.read(&self.key)? else {
            return Ok(None);
        };

        let versioned: VersionedState<T> = serde_json::from_str(&raw)?;
        versioned.verify_checksum()?;

        if versioned.version != self.version {
            return Err(SnapshotError::VersionMismatch {
                expected: self.version,
                found: versioned.version,
            });
        }

        Ok(Some(versioned.data))
    }

    /// Replace the stored value
    pub fn save(&self, data: &T) -> Result<()> {
        let versioned = VersionedState::new(self.version, data)?;
        let json = serde_json::to_string(&versioned)?;
        self.store.write(&self.key, &json)?;
        Ok(())
    }

    /// Remove the stored value
    pub fn clear(&self) -> Result<()> {
        self.store.delete(&self.key)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durable::MemoryStore;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Marker {
        name: String,
        flag: bool,
    }

    fn marker() -> Marker {
        Marker { name: "alice".to_string(), flag: true }
    }

    #[test]
    fn test_load_empty() {
        let store = Arc::new(MemoryStore::new());
        let slot: SnapshotSlot<Marker> = SnapshotSlot::new(store, "auth-storage", 1);
        assert!(slot.load().unwrap().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let store = Arc::new(MemoryStore::new());
        let slot = SnapshotSlot::new(store.clone(), "auth-storage", 1);

        slot.save(&marker()).unwrap();
        assert_eq!(slot.load().unwrap(), Some(marker()));

        let raw = store.read("auth-storage").unwrap().unwrap();
        assert!(raw.contains("\"checksum\""));
        assert!(raw.contains("\"version\":1"));
    }

    #[test]
    fn test_tampered_data_detected() {
        let store = Arc::new(MemoryStore::new());
        let slot = SnapshotSlot::new(store.clone(), "auth-storage", 1);
        slot.save(&marker()).unwrap();

        let raw = store.read("auth-storage").unwrap().unwrap();
        store.write("auth-storage", &raw.replace("alice", "mallory")).unwrap();

        assert!(matches!(slot.load(), Err(SnapshotError::Corruption(_))));
    }

    #[test]
    fn test_version_mismatch() {
        let store = Arc::new(MemoryStore::new());
        SnapshotSlot::new(store.clone(), "auth-storage", 1)
            .save(&marker())
            .unwrap();

        let slot: SnapshotSlot<Marker> = SnapshotSlot::new(store, "auth-storage", 2);
        assert!(matches!(
            slot.load(),
            Err(SnapshotError::VersionMismatch { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn test_garbage_is_serialization_error() {
        let store = Arc::new(MemoryStore::with_entries([("auth-storage", "not json")]));
        let slot: SnapshotSlot<Marker> = SnapshotSlot::new(store, "auth-storage", 1);
        assert!(matches!(slot.load(), Err(SnapshotError::Serialization(_))));
    }

    #[test]
    fn test_clear() {
        let store = Arc::new(MemoryStore::new());
        let slot = SnapshotSlot::new(store.clone(), "auth-storage", 1);
        slot.save(&marker()).unwrap();
        slot.clear().unwrap();
        assert!(slot.load().unwrap().is_none());
        assert!(store.is_empty());
    }
}
