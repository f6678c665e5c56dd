use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The account requests run as.
///
/// A principal never owns its session; the session manager keys live sessions by
/// `persistence_key()`.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
    #[serde(skip)]
    password: Option<String>,
    #[serde(default)]
    pub keep_password: bool,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    /// Write the session token into the shared store after login.
    #[serde(default = "default_true")]
    pub persist: bool,
    /// Default safe mode for requests issued as this principal.
    #[serde(default)]
    pub safe_request: bool,
    #[serde(default)]
    persistence_key: Option<String>,
}

fn default_true() -> bool { true }

impl Principal {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: None,
            keep_password: false,
            roles: BTreeSet::new(),
            persist: true,
            safe_request: false,
            persistence_key: None,
        }
    }

    /// Password used for the first login. With `keep == false` it is still kept for that
    /// login but a forced re-login is refused.
    pub fn with_password(mut self, password: impl Into<String>, keep: bool) -> Self {
        self.password = Some(password.into());
        self.keep_password = keep;
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self { self.roles.insert(role.into()); self }
    pub fn with_persist(mut self, persist: bool) -> Self { self.persist = persist; self }
    pub fn with_safe_request(mut self, safe: bool) -> Self { self.safe_request = safe; self }
    pub fn with_persistence_key(mut self, key: impl Into<String>) -> Self { self.persistence_key = Some(key.into()); self }

    pub fn password(&self) -> Option<&str> { self.password.as_deref() }

    /// True when a forced re-login is possible.
    pub fn can_relogin(&self) -> bool { self.keep_password && self.password.is_some() }

    pub fn persistence_key(&self) -> String {
        self.persistence_key.clone().unwrap_or_else(|| format!("{}_session", self.username))
    }

    pub fn session_lock_key(&self) -> String { format!("{}-session-key", self.persistence_key()) }

    pub fn has_role(&self, role: &str) -> bool { self.roles.contains(role) }
}

impl fmt::Debug for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Principal")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .field("keep_password", &self.keep_password)
            .field("roles", &self.roles)
            .field("persist", &self.persist)
            .field("safe_request", &self.safe_request)
            .field("persistence_key", &self.persistence_key())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_key_defaults_to_username() {
        let p = Principal::new("alice");
        assert_eq!(p.persistence_key(), "alice_session");
        assert_eq!(p.session_lock_key(), "alice_session-session-key");
        let admin = Principal::new("administrator").with_persistence_key("administrator_session_admin");
        assert_eq!(admin.persistence_key(), "administrator_session_admin");
    }

    #[test]
    fn relogin_requires_kept_password() {
        assert!(!Principal::new("a").can_relogin());
        assert!(!Principal::new("a").with_password("pw", false).can_relogin());
        assert!(Principal::new("a").with_password("pw", true).can_relogin());
    }

    #[test]
    fn debug_never_prints_password() {
        let p = Principal::new("a").with_password("hunter2", true);
        let s = format!("{:?}", p);
        assert!(!s.contains("hunter2"));
        assert!(s.contains("********"));
    }

    #[test]
    fn password_is_not_serialized() {
        let p = Principal::new("a").with_password("hunter2", true).with_role("ADMINISTRATOR");
        let s = serde_json::to_string(&p).unwrap();
        assert!(!s.contains("hunter2"));
        let back: Principal = serde_json::from_str(&s).unwrap();
        assert!(back.has_role("ADMINISTRATOR"));
        assert!(back.password().is_none());
    }
}
