//! Keyed mutual exclusion.
//!
//! A lock is created on first use for a key and never removed. Guards are owned so they can be
//! held across awaits (login, health probe).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default)]
pub struct KeyedLocks {
    inner: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self { Self::default() }

    fn handle(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut m = self.inner.lock();
        m.entry(key.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let handle = self.handle(key);
        tracing::trace!(target: "netmgmt::locks", "acquiring '{}'", key);
        handle.lock_owned().await
    }

    pub fn try_lock(&self, key: &str) -> Option<OwnedMutexGuard<()>> {
        self.handle(key).try_lock_owned().ok()
    }

    pub fn len(&self) -> usize { self.inner.lock().len() }
    pub fn is_empty(&self) -> bool { self.inner.lock().is_empty() }
}
