//! Failure classification: the one place that decides whether a failed request is retried.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::error::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryDecision {
    RetryAfterHealthCheck,
    RetryAfterRelogin,
    Fatal,
}

/// Where the failed request went, relative to the session that issued it.
#[derive(Debug, Clone, Default)]
pub struct FailureContext {
    pub target_host: Option<String>,
    pub session_host: Option<String>,
    pub is_login: bool,
    /// Treat 401/403 from the session's own host as a lost session too.
    pub relogin_on_origin: bool,
}

impl FailureContext {
    fn foreign_host(&self) -> bool {
        match (&self.target_host, &self.session_host) {
            (Some(t), Some(s)) => !t.eq_ignore_ascii_case(s),
            _ => false,
        }
    }
}

static UNAVAILABLE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)service unavailable|network (is )?unreachable").ok());

fn is_unavailable(message: &str) -> bool {
    UNAVAILABLE.as_ref().map(|re| re.is_match(message)).unwrap_or(false)
}

/// Pure: the same failure and context always give the same decision.
pub fn classify(error: &ClientError, ctx: &FailureContext) -> RetryDecision {
    if error.is_auth_status() && (ctx.foreign_host() || ctx.relogin_on_origin) && !ctx.is_login {
        return RetryDecision::RetryAfterRelogin;
    }
    if let ClientError::Connectivity(msg) = error {
        if is_unavailable(msg) {
            return RetryDecision::RetryAfterHealthCheck;
        }
    }
    RetryDecision::Fatal
}
