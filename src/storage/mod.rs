//! Shared key-value persistence.
//!
//! Session tokens and health markers live here so that several processes (or several clients
//! in one process) can reuse a login. The backend is pluggable through `KeyValueStore`; the
//! bundled `KvStore` is an in-memory TTL map with an optional bincode snapshot on disk.

pub mod kv;

use std::sync::Arc;
use std::time::Duration;

use crate::error::ClientResult;

pub use kv::KvStore;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> ClientResult<Option<String>>;
    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> ClientResult<()>;
    /// Returns true when the key existed.
    fn delete(&self, key: &str) -> ClientResult<bool>;
    /// Capability probe; false means the backend cannot be written to.
    fn ping(&self) -> bool;
}

/// A store plus the capability flag probed once at construction.
///
/// Backend errors are logged and treated as a miss; persistence is an optimisation, never a
/// reason to fail a request.
#[derive(Clone)]
pub struct Persistence {
    store: Option<Arc<dyn KeyValueStore>>,
    available: bool,
}

impl Persistence {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        let available = store.ping();
        if !available {
            tracing::warn!(target: "netmgmt::storage", "persistence store is not reachable; session tokens will not be shared");
        }
        Self { store: Some(store), available }
    }

    pub fn disabled() -> Self { Self { store: None, available: false } }

    pub fn is_available(&self) -> bool { self.available }

    pub fn get(&self, key: &str) -> Option<String> {
        let store = self.store.as_ref()?;
        match store.get(key) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!(target: "netmgmt::storage", "read of '{}' failed: {}", key, e);
                None
            }
        }
    }

    /// Writes only when the store is available; returns whether the value was written.
    pub fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> bool {
        let Some(store) = self.store.as_ref().filter(|_| self.available) else { return false; };
        match store.set(key, value, ttl) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(target: "netmgmt::storage", "write of '{}' failed: {}", key, e);
                false
            }
        }
    }

    pub fn remove(&self, key: &str) -> bool {
        let Some(store) = self.store.as_ref() else { return false; };
        store.delete(key).unwrap_or_else(|e| {
            tracing::debug!(target: "netmgmt::storage", "delete of '{}' failed: {}", key, e);
            false
        })
    }
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod storage_tests;
