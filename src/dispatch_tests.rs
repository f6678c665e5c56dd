use super::*;
use std::sync::Arc;

use serde_json::json;

use crate::health::AlwaysUp;
use crate::test_support::{alice, failing, manager, MockPlatform, MockScripting, MockScriptingConnector, BASE};

fn client(platform: &Arc<MockPlatform>) -> Client {
    let (m, _) = manager(platform);
    Client::with_parts(m, alice(), Arc::new(AlwaysUp), Arc::new(MockScriptingConnector(MockScripting::new())))
}

#[test]
fn normalization_inserts_exactly_one_separator() {
    assert_eq!(normalize_url("https://h", "/resource"), "https://h/resource");
    assert_eq!(normalize_url("https://h/", "resource"), "https://h/resource");
    assert_eq!(normalize_url("https://h/", "/resource"), "https://h/resource");
    assert_eq!(normalize_url("https://h", "resource"), "https://h/resource");
    let once = normalize_url("https://h", "/a/b");
    assert_eq!(normalize_url("https://h", &once), once);
    assert_eq!(normalize_url("https://h", "https://other/x"), "https://other/x");
}

#[test]
fn login_paths_are_recognised() {
    assert!(is_login_url("https://h/login"));
    assert!(is_login_url("https://h/login/"));
    assert!(!is_login_url("https://h/loginhistory"));
}

#[tokio::test]
async fn success_uses_session_cookie() {
    let platform = MockPlatform::new();
    let c = client(&platform);
    let r = c.get("/oss/x", RequestOptions::default()).await.unwrap();
    assert_eq!(r.status, 200);
    let sent = platform.sent.lock().clone();
    assert_eq!(sent, vec![("GET".to_string(), format!("{}/oss/x", BASE), Some("abc123".to_string()))]);
}

#[tokio::test]
async fn service_unavailable_is_retried_once() {
    let platform = MockPlatform::new();
    platform.push_send(Err(ClientError::Connectivity("503 Service Unavailable".into())));
    let c = client(&platform);
    let r = c.get("/x", RequestOptions::default()).await.unwrap();
    assert_eq!(r.status, 200);
    assert_eq!(platform.sends(), 2);
    assert_eq!(platform.logins(), 1);
}

#[tokio::test]
async fn failed_retry_surfaces_first_failure() {
    let platform = MockPlatform::new();
    platform.push_send(Err(ClientError::Connectivity("Network is unreachable (first)".into())));
    platform.push_send(Err(ClientError::Connectivity("Network is unreachable (second)".into())));
    platform.push_send(Ok(Response::new("GET", "/x", 200)));
    let c = client(&platform);
    let err = c.get("/x", RequestOptions::default()).await.unwrap_err();
    assert!(err.to_string().contains("(first)"));
    assert_eq!(platform.sends(), 2);
}

#[tokio::test]
async fn foreign_host_auth_failure_relogins_once() {
    let platform = MockPlatform::new();
    platform.push_send(Err(failing(403, json!({"message": "Forbidden"}))));
    platform.push_login(Ok("first".into()));
    platform.push_login(Ok("second".into()));
    let c = client(&platform);
    let r = c.get("https://apps.example.com/dashboard", RequestOptions::default()).await.unwrap();
    assert_eq!(r.status, 200);
    assert_eq!(platform.logins(), 2);
    let sent = platform.sent.lock().clone();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].2.as_deref(), Some("second"));
}

#[tokio::test]
async fn origin_auth_failure_is_fatal_by_default() {
    let platform = MockPlatform::new();
    platform.push_send(Err(failing(403, json!({"message": "Forbidden"}))));
    let c = client(&platform);
    let err = c.get("/x", RequestOptions::default()).await.unwrap_err();
    assert_eq!(err.status(), Some(403));
    assert_eq!(platform.sends(), 1);
}

#[tokio::test]
async fn server_error_is_fatal_with_user_message() {
    let platform = MockPlatform::new();
    platform.push_send(Err(failing(500, json!({"userMessage": "Database unavailable"}))));
    let c = client(&platform);
    let err = c.post("/x", RequestOptions::default().json(json!({"a": 1}))).await.unwrap_err();
    match err {
        ClientError::Http { status, message, .. } => {
            assert_eq!(status, 500);
            assert_eq!(message, "Database unavailable");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(platform.sends(), 1);
}

#[tokio::test]
async fn safe_mode_returns_599_and_tallies() {
    let platform = MockPlatform::new();
    platform.push_send(Err(ClientError::Connectivity("connection reset by peer".into())));
    let c = client(&platform);
    let r = c.get("/x", RequestOptions::default().safe(true)).await.unwrap();
    assert_eq!(r.status, 599);
    let rec = c.telemetry().get("GET", "/x").unwrap();
    assert_eq!((rec.passed, rec.failed), (0, 1));
    assert!(rec.last_failures.contains_key(&599));
}

#[tokio::test]
async fn safe_mode_tallies_successes_under_masked_path() {
    let platform = MockPlatform::new();
    let c = client(&platform);
    c.get("/resource/1", RequestOptions::default().safe(true)).await.unwrap();
    c.get("/resource/2", RequestOptions::default().safe(true)).await.unwrap();
    c.get("/resource/3", RequestOptions::default()).await.unwrap();
    let rec = c.telemetry().get("GET", "/resource/7").unwrap();
    assert_eq!((rec.passed, rec.failed), (2, 0));
}

#[tokio::test]
async fn ignored_status_is_returned_and_tallied() {
    let platform = MockPlatform::new();
    platform.push_send(Err(failing(404, json!({"message": "gone"}))));
    let c = client(&platform);
    let r = c.delete("/nodes/17", RequestOptions::default().safe(true).ignore(404)).await.unwrap();
    assert_eq!(r.status, 404);
    let rec = c.telemetry().get("DELETE", "/nodes/18").unwrap();
    assert_eq!(rec.failed, 1);
    assert_eq!(rec.last_failures[&404], r#"{"message":"gone"}"#);
}

#[tokio::test]
async fn ignored_status_without_safe_mode_is_not_raised() {
    let platform = MockPlatform::new();
    platform.push_send(Err(failing(409, json!({}))));
    let c = client(&platform);
    let r = c.put("/x", RequestOptions::default().ignore(409)).await.unwrap();
    assert_eq!(r.status, 409);
    assert!(c.telemetry().snapshot().is_empty());
}

#[tokio::test]
async fn principal_default_safe_mode_applies() {
    let platform = MockPlatform::new();
    platform.push_send(Err(failing(500, json!({"message": "boom"}))));
    let (m, _) = manager(&platform);
    let c = Client::with_parts(m, alice().with_safe_request(true), Arc::new(AlwaysUp), Arc::new(MockScriptingConnector(MockScripting::new())));
    let r = c.get("/x", RequestOptions::default()).await.unwrap();
    assert_eq!(r.status, 599);
    assert_eq!(c.telemetry().get("GET", "/x").unwrap().last_failures[&500], r#"{"message":"boom"}"#);
}
