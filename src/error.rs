//! Unified client error model.
//! One enum is shared by the session manager, the dispatcher and the command channel so that
//! callers can match on a single taxonomy, plus a flat `ErrorKind` discriminant for logging
//! and telemetry.

use serde::{Deserialize, Serialize};

use crate::response::Response;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Login rejected by the platform. Never retried; the persisted token is evicted.
    #[error("authentication failed for user '{username}': {message}")]
    AuthFailure { username: String, message: String },

    #[error("session not established: {0}")]
    SessionNotEstablished(String),

    #[error("session timeout: {0}")]
    SessionTimeout(String),

    #[error("cannot re-establish session because no password is stored for user '{0}'")]
    NoStoredCredential(String),

    /// Transport-level failure with no HTTP response (refused, reset, DNS, proxy down).
    #[error("connection error: {0}")]
    Connectivity(String),

    /// The platform answered with a failing status; the response travels with the error.
    #[error("{method} request to [{url}] failed, status code:: [{status}] Message: [{message}]")]
    Http {
        method: String,
        url: String,
        status: u16,
        message: String,
        response: Box<Response>,
    },

    /// Unexpected or malformed answer (non-JSON where JSON was expected, channel failure).
    #[error("application error: {0}")]
    Application(String),

    #[error("no output to parse from command: {0}")]
    NoCommandOutput(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("credentials error: {0}")]
    Credentials(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthFailure,
    SessionNotEstablished,
    SessionTimeout,
    NoStoredCredential,
    Connectivity,
    Http,
    Application,
    NoCommandOutput,
    Io,
    Config,
    Credentials,
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::AuthFailure { .. } => ErrorKind::AuthFailure,
            ClientError::SessionNotEstablished(_) => ErrorKind::SessionNotEstablished,
            ClientError::SessionTimeout(_) => ErrorKind::SessionTimeout,
            ClientError::NoStoredCredential(_) => ErrorKind::NoStoredCredential,
            ClientError::Connectivity(_) => ErrorKind::Connectivity,
            ClientError::Http { .. } => ErrorKind::Http,
            ClientError::Application(_) => ErrorKind::Application,
            ClientError::NoCommandOutput(_) => ErrorKind::NoCommandOutput,
            ClientError::Io(_) => ErrorKind::Io,
            ClientError::Config(_) => ErrorKind::Config,
            ClientError::Credentials(_) => ErrorKind::Credentials,
        }
    }

    /// HTTP status carried by the failure, if the platform answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn response(&self) -> Option<&Response> {
        match self {
            ClientError::Http { response, .. } => Some(response),
            _ => None,
        }
    }

    pub fn into_response(self) -> Option<Response> {
        match self {
            ClientError::Http { response, .. } => Some(*response),
            _ => None,
        }
    }

    /// Build an `Http` failure from a response, taking the message from its body.
    pub fn from_response(response: Response) -> Self {
        Self::from_response_with_prefix(response, "")
    }

    pub fn from_response_with_prefix(response: Response, prefix: &str) -> Self {
        let message = format!("{}{}", prefix, response.user_message());
        ClientError::Http {
            method: response.method.clone(),
            url: response.url.clone(),
            status: response.status,
            message,
            response: Box::new(response),
        }
    }

    pub fn is_auth_status(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
