//! Session lifecycle.
//!
//! One live session per principal, keyed by the principal's persistence key. A session is found
//! in memory, rebuilt from a token in the shared store, or created by logging in. Logins for one
//! principal are serialised by a keyed lock and the caches are re-checked once the lock is held,
//! so concurrent openers perform a single login.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::{host_of, ClientConfig};
use crate::dispatch::normalize_url;
use crate::error::{ClientError, ClientResult};
use crate::identity::Principal;
use crate::locks::KeyedLocks;
use crate::storage::Persistence;
use crate::transport::{Connector, Request, Transport};

pub const NOT_AUTHORISED_MESSAGE: &str =
    "User not authorised, please ensure user is created correctly and expected credentials are valid.";

pub struct Session {
    username: String,
    token: String,
    transport: Arc<dyn Transport>,
    opened_at: DateTime<Utc>,
}

impl Session {
    pub fn new(username: impl Into<String>, token: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self { username: username.into(), token: token.into(), transport, opened_at: Utc::now() }
    }

    pub fn username(&self) -> &str { &self.username }
    pub fn token(&self) -> &str { &self.token }
    pub fn transport(&self) -> &Arc<dyn Transport> { &self.transport }
    pub fn base_url(&self) -> &str { self.transport.base_url() }
    pub fn host(&self) -> Option<String> { host_of(self.transport.base_url()) }
    pub fn opened_at(&self) -> DateTime<Utc> { self.opened_at }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("base_url", &self.base_url())
            .field("opened_at", &self.opened_at)
            .finish()
    }
}

pub struct SessionManager {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    persistence: Persistence,
    locks: Arc<KeyedLocks>,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionManager {
    pub fn new(config: ClientConfig, connector: Arc<dyn Connector>, persistence: Persistence) -> Self {
        Self::with_locks(config, connector, persistence, Arc::new(KeyedLocks::new()))
    }

    pub fn with_locks(config: ClientConfig, connector: Arc<dyn Connector>, persistence: Persistence, locks: Arc<KeyedLocks>) -> Self {
        Self { config, connector, persistence, locks, sessions: RwLock::new(HashMap::new()) }
    }

    pub fn config(&self) -> &ClientConfig { &self.config }
    pub fn persistence(&self) -> &Persistence { &self.persistence }
    pub fn locks(&self) -> Arc<KeyedLocks> { self.locks.clone() }

    /// Live in-memory session for the principal, if any.
    pub fn session_for(&self, principal: &Principal) -> Option<Arc<Session>> {
        self.sessions.read().get(&principal.persistence_key()).cloned()
    }

    /// In-memory session, else one rebuilt from a persisted token (no network call).
    fn reuse(&self, principal: &Principal) -> ClientResult<Option<Arc<Session>>> {
        if let Some(s) = self.session_for(principal) {
            return Ok(Some(s));
        }
        let key = principal.persistence_key();
        let Some(token) = self.persistence.get(&key) else { return Ok(None); };
        let transport = self.connector.connect(&self.config.base_url)?;
        transport.set_auth_token(&token);
        let session = Arc::new(Session::new(principal.username.clone(), token, transport));
        debug!(target: "netmgmt::session", "reusing persisted session for {}", principal.username);
        self.sessions.write().insert(key, session.clone());
        Ok(Some(session))
    }

    pub async fn open_session(&self, principal: &Principal, force_reestablish: bool) -> ClientResult<Arc<Session>> {
        if force_reestablish {
            if !principal.can_relogin() {
                return Err(ClientError::NoStoredCredential(principal.username.clone()));
            }
        } else if let Some(s) = self.reuse(principal)? {
            return Ok(s);
        }

        let key = principal.persistence_key();
        let _guard = self.locks.lock(&principal.session_lock_key()).await;
        if force_reestablish {
            self.persistence.remove(&key);
            self.sessions.write().remove(&key);
        } else if let Some(s) = self.reuse(principal)? {
            return Ok(s);
        }

        let password = principal.password()
            .ok_or_else(|| ClientError::NoStoredCredential(principal.username.clone()))?;
        let transport = self.connector.connect(&self.config.base_url)?;
        debug!(target: "netmgmt::session", "logging in {} at {}", principal.username, transport.base_url());
        let token = match transport.login(&principal.username, password).await {
            Ok(t) => t,
            Err(e) if matches!(e, ClientError::AuthFailure { .. }) || e.is_auth_status() => {
                self.persistence.remove(&key);
                debug!(target: "netmgmt::session", "{}", NOT_AUTHORISED_MESSAGE);
                let message = match e {
                    ClientError::AuthFailure { message, .. } => message,
                    other => other.to_string(),
                };
                return Err(ClientError::AuthFailure { username: principal.username.clone(), message });
            }
            Err(e) => {
                debug!(target: "netmgmt::session", "login for {} failed: {}", principal.username, e);
                return Err(e);
            }
        };

        let session = Arc::new(Session::new(principal.username.clone(), token, transport));
        if principal.persist && self.persistence.is_available() {
            self.persistence.set(&key, session.token(), None);
        }
        self.sessions.write().insert(key, session.clone());
        info!(target: "netmgmt::session", "session established for user {}", principal.username);
        Ok(session)
    }

    /// Drop the principal's session everywhere. Safe to call repeatedly.
    pub async fn remove_session(&self, principal: &Principal) {
        let key = principal.persistence_key();
        self.persistence.remove(&key);
        let removed = self.sessions.write().remove(&key);
        if let Some(session) = removed {
            if let Err(e) = session.transport().logout().await {
                debug!(target: "netmgmt::session", "logout for {} failed: {}", principal.username, e);
            }
            info!(target: "netmgmt::session", "Successfully removed user session \"{}\"", principal.username);
        }
    }

    /// Open (without force) and issue the configured authenticated no-op.
    pub async fn is_session_established(&self, principal: &Principal) -> ClientResult<bool> {
        let not_established = |e: ClientError| {
            ClientError::SessionNotEstablished(format!(
                "Unable to establish session for user {}. Exception: {}", principal.username, e
            ))
        };
        let session = match self.open_session(principal, false).await {
            Ok(s) => s,
            Err(ClientError::NoStoredCredential(_)) => {
                self.remove_session(principal).await;
                return Ok(false);
            }
            Err(e @ (ClientError::Connectivity(_) | ClientError::Http { .. } | ClientError::AuthFailure { .. })) => {
                return Err(not_established(e));
            }
            Err(e) => return Err(e),
        };
        let path = self.config.session_probe_path.replace("{username}", &urlencoding::encode(&principal.username));
        let mut req = Request::get(normalize_url(session.base_url(), &path));
        req.timeout = Some(self.config.request_timeout());
        match session.transport().send(req).await {
            Ok(resp) => {
                debug!(target: "netmgmt::session", "Verified that user '{}' exists", principal.username);
                Ok(resp.is_ok())
            }
            Err(e @ (ClientError::Connectivity(_) | ClientError::Http { .. })) => Err(not_established(e)),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod session_tests;
