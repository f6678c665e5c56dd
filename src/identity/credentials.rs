//! Credential sources for the administrator account.
//!
//! Lookup order: a two-line credentials file (username, password), then a `key=value` props
//! file, then `NMS_USERNAME` / `NMS_PASSWORD`, then an interactive prompt. Passwords read from
//! a prompt are not kept, so a session opened with them cannot be forcibly re-established.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::session::SessionManager;

use super::Principal;

pub const ADMINISTRATOR_ROLE: &str = "ADMINISTRATOR";
pub const ADMINISTRATOR_SESSION_KEY: &str = "administrator_session";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    File,
    Props,
    Env,
    Prompt,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub keep_password: bool,
    pub source: CredentialSource,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("keep_password", &self.keep_password)
            .field("source", &self.source)
            .finish()
    }
}

pub trait CredentialPrompt: Send + Sync {
    /// `reprompt` is true when earlier credentials were rejected.
    fn ask(&self, reprompt: bool) -> ClientResult<(String, String)>;
}

/// Reads username and password from the controlling terminal.
pub struct TerminalPrompt;

impl CredentialPrompt for TerminalPrompt {
    fn ask(&self, reprompt: bool) -> ClientResult<(String, String)> {
        if reprompt {
            info!("Login failed with the supplied credentials.");
        }
        info!("Please enter the credentials of the platform account to use");
        let mut rl = rustyline::DefaultEditor::new().map_err(|e| ClientError::Credentials(e.to_string()))?;
        let local_user = whoami::username();
        let username = rl.readline(&format!("Username [{}]: ", local_user)).map_err(|e| ClientError::Credentials(e.to_string()))?;
        let username = if username.trim().is_empty() { local_user } else { username };
        let password = rl.readline("Password: ").map_err(|e| ClientError::Credentials(e.to_string()))?;
        Ok((username.trim().to_string(), password.trim_end_matches(['\r', '\n']).to_string()))
    }
}

pub fn read_credentials_file(path: &Path) -> ClientResult<(String, String)> {
    let text = std::fs::read_to_string(path)?;
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    match lines.as_slice() {
        [user, pass] => Ok((user.to_string(), pass.to_string())),
        _ => Err(ClientError::Credentials(format!(
            "{} must contain exactly two lines (username, password)", path.display()
        ))),
    }
}

/// `username=` / `password=` entries of a props file; `None` unless both are present.
pub fn read_props_file(path: &Path) -> ClientResult<Option<(String, String)>> {
    let text = std::fs::read_to_string(path)?;
    let mut user = None;
    let mut pass = None;
    for line in text.lines() {
        let line = line.trim();
        if line.starts_with('#') { continue; }
        let Some((k, v)) = line.split_once('=') else { continue; };
        match k.trim() {
            "username" => user = Some(v.trim().to_string()),
            "password" => pass = Some(v.trim().to_string()),
            _ => {}
        }
    }
    Ok(user.zip(pass).filter(|(u, p)| !u.is_empty() && !p.is_empty()))
}

pub fn resolve_credentials<F>(cfg: &ClientConfig, env: F, prompt: &dyn CredentialPrompt) -> ClientResult<Credentials>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = cfg.credentials_file.as_deref().filter(|p| p.is_file()) {
        let (username, password) = read_credentials_file(path)?;
        return Ok(Credentials { username, password, keep_password: true, source: CredentialSource::File });
    }
    if let Some(path) = cfg.props_file.as_deref().filter(|p| p.is_file()) {
        if let Some((username, password)) = read_props_file(path)? {
            return Ok(Credentials { username, password, keep_password: true, source: CredentialSource::Props });
        }
    }
    if let (Some(username), Some(password)) = (env("NMS_USERNAME"), env("NMS_PASSWORD")) {
        return Ok(Credentials { username, password, keep_password: true, source: CredentialSource::Env });
    }
    debug!("No credentials were found. Continuing to prompt the user for credentials.");
    let (username, password) = prompt.ask(false)?;
    if username.is_empty() || password.is_empty() {
        return Err(ClientError::Credentials("Unable to obtain administrator credentials".into()));
    }
    Ok(Credentials { username, password, keep_password: false, source: CredentialSource::Prompt })
}

fn admin_principal(creds: &Credentials) -> Principal {
    Principal::new(creds.username.clone())
        .with_password(creds.password.clone(), creds.keep_password)
        .with_role(ADMINISTRATOR_ROLE)
        .with_persistence_key(ADMINISTRATOR_SESSION_KEY)
}

/// Resolve administrator credentials and open a session with them.
///
/// Rejected credentials lead to exactly one re-prompt; a second rejection is returned.
pub async fn bootstrap_admin(manager: &Arc<SessionManager>, prompt: &dyn CredentialPrompt) -> ClientResult<Principal> {
    let creds = resolve_credentials(manager.config(), |k| std::env::var(k).ok(), prompt)?;
    debug!("Creating the {} principal.", creds.username);
    let principal = admin_principal(&creds);
    match manager.open_session(&principal, false).await {
        Ok(_) => Ok(principal),
        Err(ClientError::AuthFailure { message, .. }) => {
            debug!("Failed to login. Error was {}", message);
            let (username, password) = prompt.ask(true)?;
            let retry = admin_principal(&Credentials {
                username,
                password,
                keep_password: false,
                source: CredentialSource::Prompt,
            });
            match manager.open_session(&retry, false).await {
                Ok(_) => Ok(retry),
                Err(e) => {
                    info!("Login failed. Please check username/password and retry. Repeated failures may lock the account.");
                    Err(e)
                }
            }
        }
        Err(e) => Err(e),
    }
}
