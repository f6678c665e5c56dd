//! Token store used when no external key-value server is configured.
//!
//! Values are strings with an optional TTL. Reads never extend a TTL, so a marker written
//! with a downtime window always lapses on time. With a directory the whole map is written
//! to `<dir>/<name>.snapshot` after every change.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};
use crate::tprintln;

use super::KeyValueStore;

const SNAPSHOT_VERSION: u32 = 2;

#[derive(Clone)]
struct Slot {
    value: String,
    expires_at: Option<Instant>,
}

impl Slot {
    fn live(&self, now: Instant) -> bool {
        self.expires_at.map(|e| now < e).unwrap_or(true)
    }
}

#[derive(Serialize, Deserialize)]
struct SnapshotSlot {
    key: String,
    value: String,
    remaining_ms: Option<u64>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    written_ms: i64,
    slots: Vec<SnapshotSlot>,
}

#[derive(Clone)]
pub struct KvStore {
    name: String,
    dir: Option<PathBuf>,
    slots: Arc<RwLock<HashMap<String, Slot>>>,
}

impl KvStore {
    /// Process-local store; nothing touches the disk.
    pub fn in_memory(name: &str) -> Self {
        Self { name: name.to_string(), dir: None, slots: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Store persisted under `dir`; an existing snapshot is loaded.
    pub fn open(dir: impl AsRef<Path>, name: &str) -> ClientResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let store = Self { name: name.to_string(), dir: Some(dir), slots: Arc::new(RwLock::new(HashMap::new())) };
        store.load()?;
        Ok(store)
    }

    pub fn name(&self) -> &str { &self.name }

    fn snapshot_path(&self) -> Option<PathBuf> {
        self.dir.as_ref().map(|d| d.join(format!("{}.snapshot", self.name)))
    }

    fn load(&self) -> ClientResult<()> {
        let Some(path) = self.snapshot_path() else { return Ok(()); };
        if !path.exists() { return Ok(()); }
        let bytes = std::fs::read(&path)?;
        let snap: Snapshot = match bincode::deserialize(&bytes) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(target: "netmgmt::storage", "ignoring unreadable snapshot {}: {}", path.display(), e);
                return Ok(());
            }
        };
        if snap.version != SNAPSHOT_VERSION {
            tracing::warn!(target: "netmgmt::storage", "ignoring snapshot {} with version {}", path.display(), snap.version);
            return Ok(());
        }
        let now = Instant::now();
        let mut slots = self.slots.write();
        for s in snap.slots {
            let expires_at = match s.remaining_ms {
                Some(0) => continue,
                Some(ms) => Some(now + Duration::from_millis(ms)),
                None => None,
            };
            slots.insert(s.key, Slot { value: s.value, expires_at });
        }
        tprintln!("kv.load name={} slots={}", self.name, slots.len());
        Ok(())
    }

    fn persist(&self) -> ClientResult<()> {
        let Some(path) = self.snapshot_path() else { return Ok(()); };
        let now = Instant::now();
        let slots: Vec<SnapshotSlot> = self.slots.read().iter()
            .filter(|(_, s)| s.live(now))
            .map(|(k, s)| SnapshotSlot {
                key: k.clone(),
                value: s.value.clone(),
                remaining_ms: s.expires_at.map(|e| e.saturating_duration_since(now).as_millis() as u64),
            })
            .collect();
        let written_ms = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0);
        let bytes = bincode::serialize(&Snapshot { version: SNAPSHOT_VERSION, written_ms, slots })
            .map_err(|e| ClientError::Application(format!("snapshot encode failed: {}", e)))?;
        let tmp = path.with_extension("snapshot.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(tmp, &path)?;
        Ok(())
    }

    fn persist_logged(&self) {
        if let Err(e) = self.persist() {
            tracing::warn!(target: "netmgmt::storage", "snapshot of store '{}' failed: {}", self.name, e);
        }
    }

    pub fn put(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.slots.write().insert(key.to_string(), Slot { value: value.to_string(), expires_at });
        self.persist_logged();
    }

    /// Live value for `key`; an expired entry is dropped on the way.
    pub fn fetch(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        if let Some(s) = self.slots.read().get(key) {
            if s.live(now) { return Some(s.value.clone()); }
        } else {
            return None;
        }
        self.slots.write().remove(key);
        None
    }

    pub fn remove(&self, key: &str) -> bool {
        let existed = self.slots.write().remove(key).is_some();
        if existed { self.persist_logged(); }
        existed
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots.read().values().filter(|s| s.live(now)).count()
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl KeyValueStore for KvStore {
    fn get(&self, key: &str) -> ClientResult<Option<String>> { Ok(self.fetch(key)) }

    fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> ClientResult<()> {
        self.put(key, value, ttl);
        Ok(())
    }

    fn delete(&self, key: &str) -> ClientResult<bool> { Ok(self.remove(key)) }

    fn ping(&self) -> bool {
        self.dir.as_ref().map(|d| d.is_dir()).unwrap_or(true)
    }
}
