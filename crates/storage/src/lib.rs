//! Storage layer for the VM hosting console
//!
//! This crate provides the durable key-value boundary used by the session
//! layer, a sled-backed on-disk implementation, an in-memory implementation,
//! and versioned snapshot slots.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod durable;
pub mod kv;
pub mod snapshot;

pub use durable::{DurableStore, MemoryStore};
pub use kv::{KvConfig, KvError, KvStore};
pub use snapshot::{SnapshotError, SnapshotSlot};
