//! Store trait definition.

use crate::StoreResult;

/// Trait for persistence backends.
///
/// Values are JSON; keys are namespaced by the caller. Implementations that
/// lose their medium should return `Ok` defaults instead of erroring where
/// they can: the queue treats the store as best-effort either way.
pub trait Store: Send + Sync {
    /// Retrieve a value.
    fn get(&self, key: &str) -> StoreResult<Option<serde_json::Value>>;

    /// Store a value. Last write wins.
    fn set(&self, key: &str, value: serde_json::Value) -> StoreResult<()>;

    /// Delete a value. Missing keys are a no-op.
    fn remove(&self, key: &str) -> StoreResult<()>;

    /// Check if a key exists.
    fn has(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}
