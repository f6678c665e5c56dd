//! Scripted platform doubles shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::json;

use crate::command::{Artifact, ChannelError, CommandInput, CommandOutput, ScriptingConnector, ScriptingSession};
use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::identity::Principal;
use crate::response::Response;
use crate::session::{Session, SessionManager};
use crate::storage::{KvStore, Persistence};
use crate::transport::{Connector, Request, Transport};

pub const BASE: &str = "https://nms.example.com";

#[derive(Default)]
pub struct MockPlatform {
    pub logins: AtomicUsize,
    pub logouts: AtomicUsize,
    pub connects: AtomicUsize,
    pub login_delay: Mutex<Duration>,
    login_script: Mutex<VecDeque<ClientResult<String>>>,
    send_script: Mutex<VecDeque<ClientResult<Response>>>,
    pub sent: Mutex<Vec<(String, String, Option<String>)>>,
}

impl MockPlatform {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    pub fn push_login(&self, r: ClientResult<String>) { self.login_script.lock().push_back(r); }
    pub fn push_send(&self, r: ClientResult<Response>) { self.send_script.lock().push_back(r); }
    pub fn logins(&self) -> usize { self.logins.load(Ordering::SeqCst) }
    pub fn sends(&self) -> usize { self.sent.lock().len() }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn Connector> { Arc::new(MockConnector(self.clone())) }
}

pub struct MockConnector(pub Arc<MockPlatform>);

impl Connector for MockConnector {
    fn connect(&self, base_url: &str) -> ClientResult<Arc<dyn Transport>> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockTransport { platform: self.0.clone(), base: base_url.trim_end_matches('/').to_string(), token: RwLock::new(None) }))
    }
}

pub struct MockTransport {
    platform: Arc<MockPlatform>,
    base: String,
    token: RwLock<Option<String>>,
}

#[async_trait]
impl Transport for MockTransport {
    fn base_url(&self) -> &str { &self.base }

    async fn send(&self, request: Request) -> ClientResult<Response> {
        self.platform.sent.lock().push((request.method.as_str().to_string(), request.url.clone(), self.auth_token()));
        let next = self.platform.send_script.lock().pop_front();
        match next {
            Some(Ok(r)) => Ok(r),
            Some(Err(e)) => Err(e),
            None => Ok(Response::new(request.method.as_str(), request.url, 200).with_json(&json!({}))),
        }
    }

    async fn login(&self, _username: &str, _password: &str) -> ClientResult<String> {
        self.platform.logins.fetch_add(1, Ordering::SeqCst);
        let delay = *self.platform.login_delay.lock();
        if !delay.is_zero() { tokio::time::sleep(delay).await; }
        let next = self.platform.login_script.lock().pop_front();
        let token = next.unwrap_or_else(|| Ok("abc123".to_string()))?;
        self.set_auth_token(&token);
        Ok(token)
    }

    async fn logout(&self) -> ClientResult<()> {
        self.platform.logouts.fetch_add(1, Ordering::SeqCst);
        *self.token.write() = None;
        Ok(())
    }

    fn set_auth_token(&self, token: &str) { *self.token.write() = Some(token.to_string()); }
    fn auth_token(&self) -> Option<String> { self.token.read().clone() }
}

pub fn failing(status: u16, body: serde_json::Value) -> ClientError {
    ClientError::from_response(Response::new("GET", BASE, status).with_json(&body))
}

pub fn config() -> ClientConfig {
    ClientConfig {
        base_url: BASE.to_string(),
        health_downtime_secs: 0,
        health_poll_interval_secs: 0,
        health_max_wait_secs: 0,
        ..Default::default()
    }
}

pub fn manager(platform: &Arc<MockPlatform>) -> (Arc<SessionManager>, Persistence) {
    let persistence = Persistence::new(Arc::new(KvStore::in_memory("sessions")));
    (Arc::new(SessionManager::new(config(), platform.connector(), persistence.clone())), persistence)
}

pub fn alice() -> Principal { Principal::new("alice").with_password("pw", true) }

/// Scripting double: answers from a queue, records what was executed.
#[derive(Default)]
pub struct MockScripting {
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
    script: Mutex<VecDeque<Result<CommandOutput, ChannelError>>>,
    close_script: Mutex<VecDeque<Result<(), ChannelError>>>,
    pub executed: Mutex<Vec<CommandInput>>,
    pub execute_delay: Mutex<Duration>,
}

impl MockScripting {
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }
    pub fn push(&self, r: Result<CommandOutput, ChannelError>) { self.script.lock().push_back(r); }
    pub fn push_close(&self, r: Result<(), ChannelError>) { self.close_script.lock().push_back(r); }
    pub fn opens(&self) -> usize { self.opens.load(Ordering::SeqCst) }
    pub fn closes(&self) -> usize { self.closes.load(Ordering::SeqCst) }
}

pub struct MockScriptingConnector(pub Arc<MockScripting>);

#[async_trait]
impl ScriptingConnector for MockScriptingConnector {
    async fn open(&self, _session: &Arc<Session>, _principal: &Principal) -> Result<Arc<dyn ScriptingSession>, ChannelError> {
        self.0.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockScriptingSession(self.0.clone())))
    }
}

pub struct MockScriptingSession(Arc<MockScripting>);

#[async_trait]
impl ScriptingSession for MockScriptingSession {
    async fn execute(&self, input: CommandInput) -> Result<CommandOutput, ChannelError> {
        self.0.executed.lock().push(input);
        let delay = *self.0.execute_delay.lock();
        if !delay.is_zero() { tokio::time::sleep(delay).await; }
        let next = self.0.script.lock().pop_front();
        next.unwrap_or_else(|| Ok(CommandOutput { output: vec!["ok".into()], artifacts: Vec::new() }))
    }

    async fn download(&self, artifact: &Artifact) -> Result<Vec<u8>, ChannelError> {
        Ok(format!("contents of {}", artifact.name).into_bytes())
    }

    async fn close(&self) -> Result<(), ChannelError> {
        self.0.closes.fetch_add(1, Ordering::SeqCst);
        let next = self.0.close_script.lock().pop_front();
        next.unwrap_or(Ok(()))
    }
}
