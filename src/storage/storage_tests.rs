use super::*;
use std::time::Duration;

struct Unreachable;

impl KeyValueStore for Unreachable {
    fn get(&self, _key: &str) -> ClientResult<Option<String>> {
        Err(crate::error::ClientError::Connectivity("connection refused".into()))
    }
    fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> ClientResult<()> {
        panic!("set must not be called on an unavailable store")
    }
    fn delete(&self, _key: &str) -> ClientResult<bool> { Ok(false) }
    fn ping(&self) -> bool { false }
}

#[test]
fn test_kv_ttl_expiry() {
    let kv = KvStore::in_memory("t");
    kv.put("a", "1", Some(Duration::from_millis(10)));
    kv.put("b", "2", None);
    assert_eq!(kv.fetch("a").as_deref(), Some("1"));
    std::thread::sleep(Duration::from_millis(25));
    assert_eq!(kv.fetch("a"), None);
    assert_eq!(kv.fetch("b").as_deref(), Some("2"));
    assert_eq!(kv.len(), 1);
}

#[test]
fn test_kv_reads_never_extend_ttl() {
    let kv = KvStore::in_memory("t");
    kv.put("marker", "offline", Some(Duration::from_millis(40)));
    for _ in 0..6 {
        std::thread::sleep(Duration::from_millis(10));
        let _ = kv.fetch("marker");
    }
    assert_eq!(kv.fetch("marker"), None);
}

#[test]
fn test_kv_delete_is_idempotent() {
    let kv = KvStore::in_memory("t");
    kv.put("k", "v", None);
    assert!(kv.remove("k"));
    assert!(!kv.remove("k"));
    assert!(kv.is_empty());
}

#[test]
fn test_snapshot_survives_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    {
        let kv = KvStore::open(tmp.path(), "sessions").unwrap();
        KeyValueStore::set(&kv, "alice_session", "abc123", None).unwrap();
        kv.put("marker", "offline", Some(Duration::from_secs(60)));
        kv.put("gone", "x", Some(Duration::from_millis(1)));
        std::thread::sleep(Duration::from_millis(5));
        kv.put("bob_session", "def456", None);
    }
    let again = KvStore::open(tmp.path(), "sessions").unwrap();
    assert_eq!(KeyValueStore::get(&again, "alice_session").unwrap().as_deref(), Some("abc123"));
    assert_eq!(again.fetch("marker").as_deref(), Some("offline"));
    assert_eq!(again.fetch("gone"), None);
    assert_eq!(again.len(), 3);
}

#[test]
fn test_persistence_skips_writes_when_unavailable() {
    let p = Persistence::new(std::sync::Arc::new(Unreachable));
    assert!(!p.is_available());
    assert!(!p.set("k", "v", None));
    assert_eq!(p.get("k"), None);
    assert!(!p.remove("k"));
}

#[test]
fn test_persistence_roundtrip_with_kv_store() {
    let p = Persistence::new(std::sync::Arc::new(KvStore::in_memory("t")));
    assert!(p.is_available());
    assert!(p.set("bob_session", "tok", None));
    assert_eq!(p.get("bob_session").as_deref(), Some("tok"));
    assert!(p.remove("bob_session"));
    assert!(!p.remove("bob_session"));
    assert!(!Persistence::disabled().is_available());
}
