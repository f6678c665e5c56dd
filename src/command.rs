//! Text-command channel.
//!
//! Commands that have no REST form run through a scripting session opened lazily on first use
//! and reused for later commands of the same client. The scripting side is a pair of traits so
//! the REST-backed connector below can be swapped for another engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::client::Client;
use crate::dispatch::normalize_url;
use crate::error::{ClientError, ClientResult};
use crate::identity::Principal;
use crate::logging::loggable_command;
use crate::session::Session;
use crate::transport::{Body, Request, Transport};

const POOL_CLOSED: &str = "Pool is closed";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChannelError {
    #[error("command timed out: {0}")]
    Timeout(String),
    #[error("{0}")]
    Failure(String),
}

impl ChannelError {
    fn is_pool_closed(&self) -> bool {
        matches!(self, ChannelError::Failure(m) if m.contains(POOL_CLOSED))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Stateful terminal sub-channel instead of the one-shot command sub-channel.
    pub on_terminal: bool,
    pub timeout: Option<Duration>,
    pub input_file: Option<PathBuf>,
    /// File, or directory, artifacts are downloaded into.
    pub output_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct InputFile {
    pub name: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct CommandInput {
    pub command: String,
    pub on_terminal: bool,
    pub timeout: Duration,
    pub file: Option<InputFile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub output: Vec<String>,
    pub artifacts: Vec<Artifact>,
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub command: String,
    pub output: Vec<String>,
    pub artifacts: Vec<Artifact>,
    pub downloaded: Vec<PathBuf>,
}

impl CommandResult {
    pub fn has_output(&self) -> bool { self.output.iter().any(|l| !l.trim().is_empty()) }
    pub fn has_artifacts(&self) -> bool { !self.artifacts.is_empty() }
    pub fn text(&self) -> String { self.output.join("\n") }
}

#[async_trait]
pub trait ScriptingSession: Send + Sync {
    async fn execute(&self, input: CommandInput) -> Result<CommandOutput, ChannelError>;
    async fn download(&self, artifact: &Artifact) -> Result<Vec<u8>, ChannelError>;
    async fn close(&self) -> Result<(), ChannelError>;
}

#[async_trait]
pub trait ScriptingConnector: Send + Sync {
    async fn open(&self, session: &Arc<Session>, principal: &Principal) -> Result<Arc<dyn ScriptingSession>, ChannelError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Absent,
    Open,
    InFlight,
    Closed,
}

/// Lazily opened scripting handle plus its observable state. No lock is held across a command.
pub struct CommandChannel {
    connector: Arc<dyn ScriptingConnector>,
    handle: Mutex<Option<Arc<dyn ScriptingSession>>>,
    state: Mutex<ChannelState>,
}

impl CommandChannel {
    pub fn new(connector: Arc<dyn ScriptingConnector>) -> Self {
        Self { connector, handle: Mutex::new(None), state: Mutex::new(ChannelState::Absent) }
    }

    pub fn state(&self) -> ChannelState { *self.state.lock() }

    fn set_state(&self, s: ChannelState) { *self.state.lock() = s; }

    async fn acquire(&self, session: &Arc<Session>, principal: &Principal) -> ClientResult<Arc<dyn ScriptingSession>> {
        if let Some(h) = self.handle.lock().clone() {
            return Ok(h);
        }
        debug!(target: "netmgmt::command", "Attempting to open command channel for {}", principal.username);
        let opened = self.connector.open(session, principal).await.map_err(|e| {
            debug!(target: "netmgmt::command", "Exception occurred while opening channel: {}", e);
            ClientError::SessionTimeout(e.to_string())
        })?;
        let mut slot = self.handle.lock();
        // another task may have opened one meanwhile; keep the first
        let h = slot.get_or_insert(opened).clone();
        drop(slot);
        self.set_state(ChannelState::Open);
        Ok(h)
    }

    fn discard(&self) {
        self.handle.lock().take();
        self.set_state(ChannelState::Absent);
    }

    fn take(&self) -> Option<Arc<dyn ScriptingSession>> { self.handle.lock().take() }
}

fn read_input_file(path: &Path) -> ClientResult<InputFile> {
    if !path.is_file() {
        return Err(ClientError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("File \"{}\" does not exist", path.display()),
        )));
    }
    let content = std::fs::read(path)?;
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "input".to_string());
    Ok(InputFile { name, content })
}

fn artifact_target(output: &Path, artifact: &Artifact) -> PathBuf {
    if output.is_dir() { output.join(&artifact.name) } else { output.to_path_buf() }
}

impl Client {
    pub fn channel_state(&self) -> ChannelState { self.channel.state() }

    /// Run a text command on the platform.
    pub async fn execute(&self, command: &str, opts: ExecuteOptions) -> ClientResult<CommandResult> {
        let session = self.open_session(false).await?;
        let input_file = match &opts.input_file {
            Some(p) => {
                debug!(target: "netmgmt::command", "File provided for command is: {}", p.display());
                Some(read_input_file(p)?)
            }
            None => None,
        };
        let shown = loggable_command(command);
        debug!(target: "netmgmt::command", "Attempting to execute command: {}", shown);
        let timeout = opts.timeout.unwrap_or_else(|| self.manager.config().command_timeout());
        let handle = self.channel.acquire(&session, &self.principal).await?;

        self.channel.set_state(ChannelState::InFlight);
        let input = CommandInput { command: command.to_string(), on_terminal: opts.on_terminal, timeout, file: input_file };
        let outcome = match tokio::time::timeout(timeout, handle.execute(input)).await {
            Err(_) => Err(ClientError::SessionTimeout(format!("no answer within {}s", timeout.as_secs()))),
            Ok(Err(ChannelError::Timeout(m))) => Err(ClientError::SessionTimeout(m)),
            Ok(Err(e)) if e.is_pool_closed() => {
                error!(target: "netmgmt::command", "Closed pool error received from command channel while running {}", shown);
                self.channel.discard();
                Err(ClientError::SessionTimeout(e.to_string()))
            }
            Ok(Err(e)) => Err(ClientError::Application(e.to_string())),
            Ok(Ok(out)) => Ok(out),
        };
        if self.channel.state() == ChannelState::InFlight {
            self.channel.set_state(ChannelState::Open);
        }

        let result = match outcome {
            Ok(out) => self.collect(command, out, handle.as_ref(), opts.output_file.as_deref()).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            debug!(target: "netmgmt::command", "Failed while executing command '{}' with file '{:?}': {}", shown, opts.input_file, e);
        }
        if self.manager.config().close_channel_after_command {
            self.close_channel_and_file(None).await;
        }
        let result = result?;
        if !result.has_output() {
            let head: String = command.chars().take(crate::logging::MAX_LOGGED_COMMAND).collect();
            return Err(ClientError::NoCommandOutput(head));
        }
        Ok(result)
    }

    async fn collect(
        &self,
        command: &str,
        out: CommandOutput,
        handle: &dyn ScriptingSession,
        output_file: Option<&Path>,
    ) -> ClientResult<CommandResult> {
        let mut downloaded = Vec::new();
        if let Some(target) = output_file {
            for artifact in &out.artifacts {
                let bytes = handle.download(artifact).await.map_err(|e| ClientError::Application(e.to_string()))?;
                let path = artifact_target(target, artifact);
                tokio::fs::write(&path, bytes).await?;
                info!(target: "netmgmt::command", "Downloaded file {}", path.display());
                downloaded.push(path);
            }
        }
        Ok(CommandResult { command: command.to_string(), output: out.output, artifacts: out.artifacts, downloaded })
    }

    /// Release the input file (if any) and the command channel (if attached). Never fails;
    /// closing twice is a no-op.
    pub async fn close_channel_and_file(&self, file: Option<std::fs::File>) {
        drop(file);
        let user = &self.principal.username;
        let Some(handle) = self.channel.take() else {
            if self.channel.state() == ChannelState::Closed {
                debug!(target: "netmgmt::command", "Command channel already closed for {}", user);
            } else {
                debug!(target: "netmgmt::command", "No command channel attached for {}", user);
            }
            return;
        };
        self.channel.set_state(ChannelState::Closed);
        match handle.close().await {
            Ok(()) => debug!(target: "netmgmt::command", "Successfully closed command channel for {}", user),
            Err(e) if e.is_pool_closed() => debug!(target: "netmgmt::command", "The command channel has already been closed for {}", user),
            Err(e) => debug!(target: "netmgmt::command", "Closing command channel for {} failed: {}", user, e),
        }
    }
}

/// Runs commands over the authenticated REST transport of the session.
pub struct RestScriptingConnector {
    command_endpoint: String,
}

impl RestScriptingConnector {
    pub fn new(command_endpoint: impl Into<String>) -> Self { Self { command_endpoint: command_endpoint.into() } }
}

#[async_trait]
impl ScriptingConnector for RestScriptingConnector {
    async fn open(&self, session: &Arc<Session>, _principal: &Principal) -> Result<Arc<dyn ScriptingSession>, ChannelError> {
        Ok(Arc::new(RestScriptingSession {
            transport: session.transport().clone(),
            endpoint: normalize_url(session.base_url(), &self.command_endpoint),
            channel_id: uuid::Uuid::new_v4().to_string(),
        }))
    }
}

pub struct RestScriptingSession {
    transport: Arc<dyn Transport>,
    endpoint: String,
    channel_id: String,
}

#[derive(Deserialize)]
struct CommandReply {
    #[serde(default)]
    output: Value,
    #[serde(default)]
    files: Vec<Artifact>,
}

fn channel_error(e: ClientError) -> ChannelError {
    let text = e.to_string();
    match &e {
        ClientError::Http { status: 504 | 408, .. } => ChannelError::Timeout(text),
        ClientError::Connectivity(m) if m.to_ascii_lowercase().contains("timed out") => ChannelError::Timeout(text),
        _ => ChannelError::Failure(text),
    }
}

fn output_lines(v: &Value) -> Vec<String> {
    match v {
        Value::String(s) => s.lines().map(str::to_string).collect(),
        Value::Array(items) => items.iter().map(|i| i.as_str().map(str::to_string).unwrap_or_else(|| i.to_string())).collect(),
        Value::Null => Vec::new(),
        other => vec![other.to_string()],
    }
}

#[async_trait]
impl ScriptingSession for RestScriptingSession {
    async fn execute(&self, input: CommandInput) -> Result<CommandOutput, ChannelError> {
        let mut payload = json!({
            "command": input.command,
            "terminal": input.on_terminal,
            "timeout_seconds": input.timeout.as_secs(),
            "channel": self.channel_id,
        });
        if let Some(f) = &input.file {
            payload["file"] = json!({
                "name": f.name,
                "content": base64::engine::general_purpose::STANDARD.encode(&f.content),
            });
        }
        let mut req = Request::new(reqwest::Method::POST, self.endpoint.as_str());
        req.body = Some(Body::Json(payload));
        req.timeout = Some(input.timeout);
        let resp = self.transport.send(req).await.map_err(channel_error)?;
        let reply: CommandReply = resp.json().map_err(|e| ChannelError::Failure(e.to_string()))?;
        Ok(CommandOutput { output: output_lines(&reply.output), artifacts: reply.files })
    }

    async fn download(&self, artifact: &Artifact) -> Result<Vec<u8>, ChannelError> {
        let url = match &artifact.url {
            Some(u) => normalize_url(self.transport.base_url(), u),
            None => format!("{}/files/{}", self.endpoint, urlencoding::encode(&artifact.name)),
        };
        let resp = self.transport.send(Request::get(url)).await.map_err(channel_error)?;
        Ok(resp.body().to_vec())
    }

    async fn close(&self) -> Result<(), ChannelError> {
        let url = format!("{}/{}", self.endpoint, self.channel_id);
        match self.transport.send(Request::new(reqwest::Method::DELETE, url)).await {
            Ok(_) => Ok(()),
            Err(ClientError::Http { status: 404, .. }) => Ok(()),
            Err(e) => Err(channel_error(e)),
        }
    }
}

#[cfg(test)]
#[path = "command_tests.rs"]
mod command_tests;
