//! In-process cache store.

use courier_core::cache::{CacheStore, StorageClass};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// [`CacheStore`] backed by one map per storage class.
///
/// Every class lives in process memory; `Session` and `Local` are kept apart
/// so keys never collide across classes, but nothing is persisted.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: RwLock<HashMap<StorageClass, HashMap<String, Value>>>,
}

impl InMemoryCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop one entry. Returns the removed value.
    pub fn remove(&self, class: StorageClass, key: &str) -> Option<Value> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&class)
            .and_then(|entries| entries.remove(key))
    }

    /// Drop every entry of one class.
    pub fn clear(&self, class: StorageClass) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&class);
    }

    /// Number of entries across all classes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(HashMap::len)
            .sum()
    }

    /// Whether the cache holds no entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for InMemoryCache {
    fn has(&self, class: StorageClass, key: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&class)
            .is_some_and(|entries| entries.contains_key(key))
    }

    fn get(&self, class: StorageClass, key: &str) -> Option<Value> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&class)
            .and_then(|entries| entries.get(key).cloned())
    }

    fn set(&self, class: StorageClass, key: &str, value: Value) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(class)
            .or_default()
            .insert(key.to_string(), value);
    }
}
