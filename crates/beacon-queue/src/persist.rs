//! Persistence mirror for the retry queue.
//!
//! Queue contents are mirrored to a [`Store`] as a JSON array of
//! `{event, attempts}` records under one namespaced key per queue instance.
//! Store I/O is best-effort: failures are logged and never fail the
//! in-memory operation.

use beacon_core::Event;
use beacon_store::Store;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// One persisted queue entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedItem {
    pub event: Event,
    pub attempts: u32,
}

/// Namespaced store key for a queue instance.
pub fn queue_key(name: &str) -> String {
    format!("beacon:{name}:queue")
}

/// Handle pairing a store with the queue's namespaced key.
#[derive(Clone)]
pub(crate) struct Persistence {
    store: Arc<dyn Store>,
    key: String,
}

impl Persistence {
    pub(crate) fn new(store: Arc<dyn Store>, name: &str) -> Self {
        Self {
            store,
            key: queue_key(name),
        }
    }

    /// Overwrite the mirror with the current queue contents.
    pub(crate) fn save<'a>(&self, items: impl Iterator<Item = (&'a Event, u32)>) {
        let records: Vec<PersistedItem> = items
            .map(|(event, attempts)| PersistedItem {
                event: event.clone(),
                attempts,
            })
            .collect();

        let result = if records.is_empty() {
            self.store.remove(&self.key)
        } else {
            match serde_json::to_value(&records) {
                Ok(value) => self.store.set(&self.key, value),
                Err(e) => {
                    warn!(key = %self.key, error = %e, "Failed to encode queue mirror");
                    return;
                }
            }
        };

        if let Err(e) = result {
            warn!(key = %self.key, error = %e, "Failed to write queue mirror");
        }
    }

    /// Read the persisted records, or an empty list when missing or corrupt.
    pub(crate) fn load(&self) -> Vec<PersistedItem> {
        let value = match self.store.get(&self.key) {
            Ok(Some(value)) => value,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to read queue mirror");
                return Vec::new();
            }
        };

        match serde_json::from_value(value) {
            Ok(records) => records,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Discarding corrupt queue mirror");
                Vec::new()
            }
        }
    }
}
