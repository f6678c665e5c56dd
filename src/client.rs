//! A principal bound to the shared session manager.
//!
//! `Client` is what callers hold: request verbs live in `dispatch`, text commands in `command`.

use std::sync::Arc;

use crate::command::{CommandChannel, RestScriptingConnector, ScriptingConnector};
use crate::error::ClientResult;
use crate::health::{probe_for, HealthGate, HealthProbe, WaitPolicy};
use crate::identity::Principal;
use crate::session::{Session, SessionManager};
use crate::telemetry::Telemetry;

pub struct Client {
    pub(crate) principal: Principal,
    pub(crate) manager: Arc<SessionManager>,
    pub(crate) telemetry: Arc<Telemetry>,
    pub(crate) health: Arc<HealthGate>,
    pub(crate) channel: CommandChannel,
}

impl Client {
    /// Client with the configured health probe, a private telemetry cache and the REST
    /// command connector.
    pub fn new(manager: Arc<SessionManager>, principal: Principal) -> ClientResult<Self> {
        let probe = probe_for(manager.config())?;
        let scripting = Arc::new(RestScriptingConnector::new(manager.config().command_endpoint.clone()));
        Ok(Self::with_parts(manager, principal, probe, scripting))
    }

    pub fn with_parts(
        manager: Arc<SessionManager>,
        principal: Principal,
        probe: Arc<dyn HealthProbe>,
        scripting: Arc<dyn ScriptingConnector>,
    ) -> Self {
        let cfg = manager.config();
        let health = Arc::new(HealthGate::new(probe, manager.locks(), manager.persistence().clone(), WaitPolicy::from_config(cfg)));
        let telemetry = Arc::new(Telemetry::new(cfg.telemetry_sample_bytes));
        Self { principal, manager, telemetry, health, channel: CommandChannel::new(scripting) }
    }

    /// Share one telemetry cache between several clients.
    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self { self.telemetry = telemetry; self }

    pub fn with_health_gate(mut self, gate: Arc<HealthGate>) -> Self { self.health = gate; self }

    pub fn principal(&self) -> &Principal { &self.principal }
    pub fn manager(&self) -> &Arc<SessionManager> { &self.manager }
    pub fn telemetry(&self) -> &Arc<Telemetry> { &self.telemetry }

    pub async fn open_session(&self, force_reestablish: bool) -> ClientResult<Arc<Session>> {
        self.manager.open_session(&self.principal, force_reestablish).await
    }

    pub async fn remove_session(&self) { self.manager.remove_session(&self.principal).await }

    pub async fn is_session_established(&self) -> ClientResult<bool> {
        self.manager.is_session_established(&self.principal).await
    }
}
