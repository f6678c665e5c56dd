use super::*;
use serde_json::json;

use crate::test_support::{alice, failing, manager, MockPlatform};

#[tokio::test]
async fn no_cached_token_means_exactly_one_login() {
    let platform = MockPlatform::new();
    let (m, store) = manager(&platform);
    let s = m.open_session(&alice(), false).await.unwrap();
    assert_eq!(s.token(), "abc123");
    assert_eq!(platform.logins(), 1);
    assert_eq!(store.get("alice_session").as_deref(), Some("abc123"));

    // second open reuses the in-memory session
    m.open_session(&alice(), false).await.unwrap();
    assert_eq!(platform.logins(), 1);
}

#[tokio::test]
async fn cached_token_is_reused_without_login() {
    let platform = MockPlatform::new();
    let (m, store) = manager(&platform);
    store.set("alice_session", "persisted-token", None);
    let s = m.open_session(&alice(), false).await.unwrap();
    assert_eq!(platform.logins(), 0);
    assert_eq!(s.token(), "persisted-token");
    assert_eq!(s.transport().auth_token().as_deref(), Some("persisted-token"));
}

#[tokio::test]
async fn non_persisting_principal_leaves_store_untouched() {
    let platform = MockPlatform::new();
    let (m, store) = manager(&platform);
    m.open_session(&alice().with_persist(false), false).await.unwrap();
    assert!(store.get("alice_session").is_none());
}

#[tokio::test]
async fn force_without_kept_password_is_refused() {
    let platform = MockPlatform::new();
    let (m, _) = manager(&platform);
    let p = Principal::new("bob").with_password("pw", false);
    m.open_session(&p, false).await.unwrap();
    let err = m.open_session(&p, true).await.unwrap_err();
    assert_eq!(err.kind(), crate::error::ErrorKind::NoStoredCredential);
    assert_eq!(platform.logins(), 1);
}

#[tokio::test]
async fn force_logs_in_again_and_replaces_token() {
    let platform = MockPlatform::new();
    let (m, store) = manager(&platform);
    m.open_session(&alice(), false).await.unwrap();
    platform.push_login(Ok("fresh".into()));
    let s = m.open_session(&alice(), true).await.unwrap();
    assert_eq!(s.token(), "fresh");
    assert_eq!(platform.logins(), 2);
    assert_eq!(store.get("alice_session").as_deref(), Some("fresh"));
}

#[tokio::test]
async fn auth_rejection_evicts_token_and_is_not_retried() {
    let platform = MockPlatform::new();
    let (m, store) = manager(&platform);
    store.set("alice_session", "stale", None);
    platform.push_login(Err(failing(401, json!({"message": "Unauthorized"}))));
    let err = m.open_session(&alice(), true).await.unwrap_err();
    assert!(matches!(err, ClientError::AuthFailure { ref username, .. } if username == "alice"));
    assert!(store.get("alice_session").is_none());
    assert_eq!(platform.logins(), 1);
}

#[tokio::test]
async fn other_login_failures_propagate_unchanged() {
    let platform = MockPlatform::new();
    let (m, _) = manager(&platform);
    platform.push_login(Err(ClientError::Connectivity("connection refused".into())));
    let err = m.open_session(&alice(), false).await.unwrap_err();
    assert!(matches!(err, ClientError::Connectivity(_)));
}

#[tokio::test]
async fn remove_session_is_idempotent() {
    let platform = MockPlatform::new();
    let (m, store) = manager(&platform);
    m.open_session(&alice(), false).await.unwrap();
    m.remove_session(&alice()).await;
    m.remove_session(&alice()).await;
    assert!(store.get("alice_session").is_none());
    assert!(m.session_for(&alice()).is_none());
    assert_eq!(platform.logouts.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_open_performs_single_login() {
    let platform = MockPlatform::new();
    *platform.login_delay.lock() = std::time::Duration::from_millis(30);
    let (m, _) = manager(&platform);
    let p = alice();
    let (a, b) = tokio::join!(m.open_session(&p, false), m.open_session(&p, false));
    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(platform.logins(), 1);
    assert_eq!(a.token(), b.token());
}

#[tokio::test]
async fn session_probe_hits_user_path() {
    let platform = MockPlatform::new();
    let (m, _) = manager(&platform);
    assert!(m.is_session_established(&alice()).await.unwrap());
    let sent = platform.sent.lock().clone();
    assert_eq!(sent[0].1, "https://nms.example.com/oss/idm/usermanagement/users/alice");
    assert_eq!(sent[0].2.as_deref(), Some("abc123"));
}

#[tokio::test]
async fn probe_rejection_is_session_not_established() {
    let platform = MockPlatform::new();
    let (m, _) = manager(&platform);
    platform.push_send(Err(failing(404, json!({"userMessage": "no such user"}))));
    let err = m.is_session_established(&alice()).await.unwrap_err();
    assert!(matches!(err, ClientError::SessionNotEstablished(ref msg) if msg.contains("no such user")));
}

#[tokio::test]
async fn missing_password_reports_false_and_cleans_up() {
    let platform = MockPlatform::new();
    let (m, _) = manager(&platform);
    assert!(!m.is_session_established(&Principal::new("carol")).await.unwrap());
    assert_eq!(platform.logins(), 0);
}
