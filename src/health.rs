//! Platform availability gate.
//!
//! Before a retry the dispatcher asks whether the platform's front tier is up. Probing is
//! serialised by a shared lock, and a negative answer is remembered (in the shared store and
//! locally) for the downtime window so that concurrent callers do not hammer a dead endpoint.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::locks::KeyedLocks;
use crate::storage::Persistence;

pub const OFFLINE_MARKER_KEY: &str = "platform-front-tier-offline";
const PROBE_LOCK_KEY: &str = "platform-health-probe";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Deployment {
    #[default]
    Physical,
    Clustered,
    CloudNative,
}

impl FromStr for Deployment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "physical" => Ok(Deployment::Physical),
            "clustered" | "cloud" => Ok(Deployment::Clustered),
            "cloud_native" | "cloudnative" => Ok(Deployment::CloudNative),
            other => Err(format!("unknown deployment '{}'", other)),
        }
    }
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn is_up(&self) -> ClientResult<bool>;
}

/// Cloud-native deployments have no separate front tier to check.
pub struct AlwaysUp;

#[async_trait]
impl HealthProbe for AlwaysUp {
    async fn is_up(&self) -> ClientResult<bool> { Ok(true) }
}

/// Runs a status command and looks for a marker in its output.
pub struct ShellHealthProbe {
    command: String,
    marker: String,
}

impl ShellHealthProbe {
    pub fn new(command: impl Into<String>, marker: impl Into<String>) -> Self {
        Self { command: command.into(), marker: marker.into() }
    }
}

#[async_trait]
impl HealthProbe for ShellHealthProbe {
    async fn is_up(&self) -> ClientResult<bool> {
        let out = tokio::process::Command::new("sh").arg("-c").arg(&self.command).output().await?;
        let stdout = String::from_utf8_lossy(&out.stdout);
        Ok(out.status.success() && stdout.contains(&self.marker))
    }
}

/// GETs a status URL; up means a 2xx answer (containing the marker, when one is set).
pub struct HttpHealthProbe {
    url: String,
    marker: Option<String>,
    client: reqwest::Client,
}

impl HttpHealthProbe {
    pub fn new(url: impl Into<String>, marker: Option<String>, config: &ClientConfig) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ClientError::Config(format!("cannot build health client: {}", e)))?;
        Ok(Self { url: url.into(), marker, client })
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn is_up(&self) -> ClientResult<bool> {
        let resp = self.client.get(&self.url).send().await.map_err(|e| ClientError::Connectivity(e.to_string()))?;
        if !resp.status().is_success() { return Ok(false); }
        let Some(marker) = &self.marker else { return Ok(true); };
        let text = resp.text().await.map_err(|e| ClientError::Connectivity(e.to_string()))?;
        Ok(text.contains(marker.as_str()))
    }
}

/// Probe matching the configured deployment.
pub fn probe_for(config: &ClientConfig) -> ClientResult<Arc<dyn HealthProbe>> {
    if config.deployment == Deployment::CloudNative {
        return Ok(Arc::new(AlwaysUp));
    }
    if let Some(url) = &config.health_status_url {
        let marker = Some(config.health_marker.clone()).filter(|m| !m.is_empty());
        return Ok(Arc::new(HttpHealthProbe::new(url.clone(), marker, config)?));
    }
    if let Some(cmd) = &config.health_status_command {
        return Ok(Arc::new(ShellHealthProbe::new(cmd.clone(), config.health_marker.clone())));
    }
    debug!(target: "netmgmt::health", "no health probe configured; treating platform as up");
    Ok(Arc::new(AlwaysUp))
}

#[derive(Debug, Clone, Copy)]
pub struct WaitPolicy {
    pub downtime: Duration,
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

impl WaitPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            downtime: config.health_downtime(),
            poll_interval: config.health_poll_interval(),
            max_wait: config.health_max_wait(),
        }
    }
}

pub struct HealthGate {
    probe: Arc<dyn HealthProbe>,
    locks: Arc<KeyedLocks>,
    persistence: Persistence,
    policy: WaitPolicy,
    offline_until: Mutex<Option<Instant>>,
}

impl HealthGate {
    pub fn new(probe: Arc<dyn HealthProbe>, locks: Arc<KeyedLocks>, persistence: Persistence, policy: WaitPolicy) -> Self {
        Self { probe, locks, persistence, policy, offline_until: Mutex::new(None) }
    }

    fn cached_offline(&self) -> bool {
        if let Some(until) = *self.offline_until.lock() {
            if Instant::now() < until { return true; }
        }
        self.persistence.get(OFFLINE_MARKER_KEY).is_some()
    }

    fn mark_offline(&self) {
        *self.offline_until.lock() = Some(Instant::now() + self.policy.downtime);
        self.persistence.set(OFFLINE_MARKER_KEY, "offline", Some(self.policy.downtime));
    }

    fn clear_offline(&self) {
        let was_offline = self.offline_until.lock().take().is_some();
        if self.persistence.remove(OFFLINE_MARKER_KEY) || was_offline {
            info!(target: "netmgmt::health", "platform front tier back online; offline marker cleared");
        }
    }

    /// Caller holds the probe lock. Down re-arms the offline marker, up clears it.
    async fn run_probe(&self) -> bool {
        match self.probe.is_up().await {
            Ok(true) => {
                self.clear_offline();
                true
            }
            Ok(false) => {
                warn!(target: "netmgmt::health", "platform front tier reported offline; caching for {:?}", self.policy.downtime);
                self.mark_offline();
                false
            }
            Err(e) => {
                warn!(target: "netmgmt::health", "health probe failed: {}; caching offline for {:?}", e, self.policy.downtime);
                self.mark_offline();
                false
            }
        }
    }

    /// Single health answer; a cached offline marker short-circuits the probe.
    pub async fn is_up(&self) -> bool {
        if self.cached_offline() { return false; }
        let _guard = self.locks.lock(PROBE_LOCK_KEY).await;
        if self.cached_offline() { return false; }
        self.run_probe().await
    }

    /// Wait until the platform is up or the policy's max wait elapses; returns the last answer.
    ///
    /// After the initial downtime the probe itself is polled every `poll_interval`; the cached
    /// marker only serves callers that are not waiting.
    pub async fn wait_until_up(&self) -> bool {
        if self.is_up().await { return true; }
        let deadline = Instant::now() + self.policy.max_wait;
        info!(target: "netmgmt::health", "platform unavailable; waiting {:?} before polling", self.policy.downtime);
        tokio::time::sleep(self.policy.downtime.min(self.policy.max_wait)).await;
        loop {
            let up = {
                let _guard = self.locks.lock(PROBE_LOCK_KEY).await;
                self.run_probe().await
            };
            if up {
                info!(target: "netmgmt::health", "platform available again");
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(target: "netmgmt::health", "platform still unavailable after {:?}", self.policy.max_wait);
                return false;
            }
            tokio::time::sleep(self.policy.poll_interval.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
#[path = "health_tests.rs"]
mod health_tests;
