//! Client configuration.
//!
//! Values come from defaults, then an optional JSON file named by `NMS_CONFIG`, then `NMS_*`
//! environment overrides. Durations are stored in whole seconds (or milliseconds where noted)
//! so the file stays hand-editable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};
use crate::health::Deployment;

pub const CONFIG_ENV: &str = "NMS_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the platform, e.g. `https://nms.example.com`.
    pub base_url: String,
    pub accept_invalid_certs: bool,
    pub request_timeout_secs: u64,
    pub login_attempts: u32,
    pub login_retry_wait_ms: u64,
    /// Authenticated no-op used by `is_session_established`; `{username}` is substituted.
    pub session_probe_path: String,
    /// Same-host 401/403 also triggers a relogin when set.
    pub relogin_on_origin_auth_failure: bool,

    pub deployment: Deployment,
    pub health_status_url: Option<String>,
    pub health_status_command: Option<String>,
    /// Text a shell or URL status answer must contain; empty disables the check for URL probes.
    pub health_marker: String,
    pub health_downtime_secs: u64,
    pub health_poll_interval_secs: u64,
    pub health_max_wait_secs: u64,

    pub telemetry_sample_bytes: usize,

    pub command_endpoint: String,
    pub command_timeout_secs: u64,
    pub close_channel_after_command: bool,

    /// Directory for the token snapshot; in-memory only when unset.
    pub store_dir: Option<PathBuf>,
    pub credentials_file: Option<PathBuf>,
    pub props_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://localhost".to_string(),
            accept_invalid_certs: true,
            request_timeout_secs: 120,
            login_attempts: 3,
            login_retry_wait_ms: 5_000,
            session_probe_path: "/oss/idm/usermanagement/users/{username}".to_string(),
            relogin_on_origin_auth_failure: false,
            deployment: Deployment::Physical,
            health_status_url: None,
            health_status_command: None,
            health_marker: "ONLINE".to_string(),
            health_downtime_secs: 45,
            health_poll_interval_secs: 5,
            health_max_wait_secs: 300,
            telemetry_sample_bytes: 1024,
            command_endpoint: "/script-engine/services/command".to_string(),
            command_timeout_secs: 600,
            close_channel_after_command: false,
            store_dir: None,
            credentials_file: None,
            props_file: None,
        }
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_num<T: std::str::FromStr>(key: &str, v: &str) -> ClientResult<T> {
    v.trim().parse::<T>().map_err(|_| ClientError::Config(format!("{} has invalid value '{}'", key, v)))
}

impl ClientConfig {
    pub fn from_file(path: impl AsRef<Path>) -> ClientResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| ClientError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ClientError::Config(format!("invalid config {}: {}", path.display(), e)))
    }

    /// Defaults, then `NMS_CONFIG`, then `NMS_*` overrides from the process environment.
    pub fn load() -> ClientResult<Self> {
        let mut cfg = match std::env::var(CONFIG_ENV) {
            Ok(p) if !p.trim().is_empty() => Self::from_file(p.trim())?,
            _ => Self::default(),
        };
        cfg.apply_overrides(|k| std::env::var(k).ok())?;
        Ok(cfg)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> ClientResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("NMS_BASE_URL") { self.base_url = v; }
        if let Some(v) = lookup("NMS_ACCEPT_INVALID_CERTS") {
            self.accept_invalid_certs = parse_bool(&v)
                .ok_or_else(|| ClientError::Config(format!("NMS_ACCEPT_INVALID_CERTS has invalid value '{}'", v)))?;
        }
        if let Some(v) = lookup("NMS_REQUEST_TIMEOUT_SECS") { self.request_timeout_secs = parse_num("NMS_REQUEST_TIMEOUT_SECS", &v)?; }
        if let Some(v) = lookup("NMS_LOGIN_ATTEMPTS") { self.login_attempts = parse_num("NMS_LOGIN_ATTEMPTS", &v)?; }
        if let Some(v) = lookup("NMS_SESSION_PROBE_PATH") { self.session_probe_path = v; }
        if let Some(v) = lookup("NMS_RELOGIN_ON_ORIGIN_AUTH_FAILURE") {
            self.relogin_on_origin_auth_failure = parse_bool(&v).unwrap_or(false);
        }
        if let Some(v) = lookup("NMS_DEPLOYMENT") {
            self.deployment = v.parse().map_err(ClientError::Config)?;
        }
        if let Some(v) = lookup("NMS_HEALTH_STATUS_URL") { self.health_status_url = Some(v); }
        if let Some(v) = lookup("NMS_HEALTH_DOWNTIME_SECS") { self.health_downtime_secs = parse_num("NMS_HEALTH_DOWNTIME_SECS", &v)?; }
        if let Some(v) = lookup("NMS_COMMAND_TIMEOUT_SECS") { self.command_timeout_secs = parse_num("NMS_COMMAND_TIMEOUT_SECS", &v)?; }
        if let Some(v) = lookup("NMS_CLOSE_CHANNEL_AFTER_COMMAND") {
            self.close_channel_after_command = parse_bool(&v).unwrap_or(false);
        }
        if let Some(v) = lookup("NMS_STORE_DIR") { self.store_dir = Some(PathBuf::from(v)); }
        if let Some(v) = lookup("NMS_CREDENTIALS_FILE") { self.credentials_file = Some(PathBuf::from(v)); }
        if let Some(v) = lookup("NMS_PROPS_FILE") { self.props_file = Some(PathBuf::from(v)); }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration { Duration::from_secs(self.request_timeout_secs) }
    pub fn login_retry_wait(&self) -> Duration { Duration::from_millis(self.login_retry_wait_ms) }
    pub fn health_downtime(&self) -> Duration { Duration::from_secs(self.health_downtime_secs) }
    pub fn health_poll_interval(&self) -> Duration { Duration::from_secs(self.health_poll_interval_secs) }
    pub fn health_max_wait(&self) -> Duration { Duration::from_secs(self.health_max_wait_secs) }
    pub fn command_timeout(&self) -> Duration { Duration::from_secs(self.command_timeout_secs) }

    /// Host component of `base_url`, lowercased.
    pub fn host(&self) -> Option<String> { host_of(&self.base_url) }
}

/// Host of an absolute URL, lowercased; `None` for relative paths.
pub fn host_of(url: &str) -> Option<String> {
    reqwest::Url::parse(url).ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}
