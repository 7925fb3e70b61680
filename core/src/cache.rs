//! Cache capability.
//!
//! The engine consults a [`CacheStore`] before touching the transport. A hit
//! short-circuits the network entirely but still replays the full processor
//! sequence (loading off, success, finally), one scheduler tick apart.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Named storage class a cache entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageClass {
    /// Lives as long as the store instance
    Memory,
    /// Lives for the current session of the host application
    Session,
    /// Survives restarts when the backend persists it
    Local,
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Memory => "memory",
            Self::Session => "session",
            Self::Local => "local",
        })
    }
}

/// Where a request's extracted result is cached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheDescriptor {
    /// Storage class
    pub storage_class: StorageClass,
    /// Entry key
    pub key: String,
}

impl CacheDescriptor {
    /// Create a descriptor.
    #[must_use]
    pub fn new(storage_class: StorageClass, key: impl Into<String>) -> Self {
        Self {
            storage_class,
            key: key.into(),
        }
    }
}

/// Keyed storage the engine queries and populates.
///
/// Implementations must be `Send + Sync`; the engine shares one store across
/// every orchestrated request.
pub trait CacheStore: Send + Sync {
    /// Whether `key` exists in `class`.
    fn has(&self, class: StorageClass, key: &str) -> bool;

    /// Read `key` from `class`.
    fn get(&self, class: StorageClass, key: &str) -> Option<Value>;

    /// Write `value` under `key` in `class`.
    fn set(&self, class: StorageClass, key: &str, value: Value);
}
