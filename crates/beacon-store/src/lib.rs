//! Storage collaborator contract for queue persistence.
//!
//! The pipeline persists in-flight queue items through this narrow get/set/
//! remove interface; the actual backing medium (browser storage, disk, a
//! database) lives outside the core. Implementations must degrade to no-ops
//! when the medium is unavailable rather than failing queue operations.

mod traits;

pub use traits::Store;

use std::collections::HashMap;
use std::sync::Mutex;
use thiserror::Error;

/// Store error type.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing medium rejected the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;

/// In-memory store backed by a mutexed map.
///
/// The default backing for unpersisted queues and tests. Contents do not
/// survive a process restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<serde_json::Value>> {
        Ok(self
            .entries
            .lock()
            .expect("lock poisoned")
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: serde_json::Value) -> StoreResult<()> {
        self.entries
            .lock()
            .expect("lock poisoned")
            .insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.entries.lock().expect("lock poisoned").remove(key);
        Ok(())
    }
}

/// Store that accepts everything and retains nothing.
///
/// Stands in when no persistence medium is available; queue operations keep
/// working, nothing survives a restart.
#[derive(Debug, Default)]
pub struct NullStore;

impl NullStore {
    pub fn new() -> Self {
        Self
    }
}

impl Store for NullStore {
    fn get(&self, _key: &str) -> StoreResult<Option<serde_json::Value>> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: serde_json::Value) -> StoreResult<()> {
        Ok(())
    }

    fn remove(&self, _key: &str) -> StoreResult<()> {
        Ok(())
    }
}
