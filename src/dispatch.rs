//! Request dispatch with a single conditional retry.
//!
//! A request is issued once. If it fails, `classify` decides whether one more attempt is worth
//! making (after a forced re-login, or after the health gate reports the platform up). A failed
//! retry surfaces the first failure. Safe mode turns raised failures into a synthesized 599
//! response and tallies every outcome in the client's telemetry cache.

use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

use crate::classify::{classify, FailureContext, RetryDecision};
use crate::client::Client;
use crate::config::host_of;
use crate::error::{ClientError, ClientResult};
use crate::response::Response;
use crate::session::Session;
use crate::transport::{Body, Request};

pub const SESSION_LOST_WARNING: &str = "WARNING: Session lost on application side. Removing current session from \
persistence and trying to re-establish the session.";

/// Resolve `path` against `base`, inserting exactly one `/`. Absolute URLs pass through.
pub fn normalize_url(base: &str, path: &str) -> String {
    if let Ok(u) = reqwest::Url::parse(path) {
        if u.host_str().is_some() {
            return path.to_string();
        }
    }
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() { return format!("{}/", base); }
    format!("{}/{}", base, path)
}

fn is_login_url(url: &str) -> bool {
    let path = reqwest::Url::parse(url).map(|u| u.path().to_string()).unwrap_or_else(|_| url.to_string());
    path.trim_end_matches('/').ends_with("/login")
}

#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub body: Option<Body>,
    pub headers: Vec<(String, String)>,
    pub timeout: Option<Duration>,
    /// `None` falls back to the principal's default.
    pub safe_mode: Option<bool>,
    /// Failing statuses returned as responses instead of errors.
    pub ignore_statuses: Vec<u16>,
}

impl RequestOptions {
    pub fn json(mut self, v: Value) -> Self { self.body = Some(Body::Json(v)); self }
    pub fn form(mut self, f: Vec<(String, String)>) -> Self { self.body = Some(Body::Form(f)); self }
    pub fn header(mut self, k: impl Into<String>, v: impl Into<String>) -> Self { self.headers.push((k.into(), v.into())); self }
    pub fn timeout(mut self, t: Duration) -> Self { self.timeout = Some(t); self }
    pub fn safe(mut self, safe: bool) -> Self { self.safe_mode = Some(safe); self }
    pub fn ignore(mut self, status: u16) -> Self { self.ignore_statuses.push(status); self }
}

/// Rebuild an HTTP failure so its message is the body's user message.
fn finalize(err: ClientError) -> ClientError {
    match err {
        ClientError::Http { status, response, .. } if status >= 500 => ClientError::from_response(*response),
        other => other,
    }
}

impl Client {
    fn failure_context(&self, session: &Session, url: &str) -> FailureContext {
        FailureContext {
            target_host: host_of(url),
            session_host: session.host(),
            is_login: is_login_url(url),
            relogin_on_origin: self.manager.config().relogin_on_origin_auth_failure,
        }
    }

    async fn send_once(&self, session: &Session, method: &Method, url: &str, opts: &RequestOptions) -> ClientResult<Response> {
        let req = Request {
            method: method.clone(),
            url: url.to_string(),
            headers: opts.headers.clone(),
            body: opts.body.clone(),
            timeout: Some(opts.timeout.unwrap_or_else(|| self.manager.config().request_timeout())),
        };
        let resp = session.transport().send(req).await?;
        debug!(target: "netmgmt::dispatch", "{} {} -> {}", method, url, resp.status);
        Ok(resp)
    }

    async fn request_with_recovery(&self, method: &Method, path: &str, opts: &RequestOptions) -> ClientResult<Response> {
        let session = self.open_session(false).await?;
        let url = normalize_url(session.base_url(), path);
        let err = match self.send_once(&session, method, &url, opts).await {
            Ok(r) => return Ok(r),
            Err(e) => e,
        };
        let decision = classify(&err, &self.failure_context(&session, &url));
        debug!(target: "netmgmt::dispatch", "{} {} failed ({}); decision {:?}", method, url, err, decision);
        let session = match decision {
            RetryDecision::Fatal => return Err(finalize(err)),
            RetryDecision::RetryAfterRelogin => {
                warn!(target: "netmgmt::dispatch", "{}", SESSION_LOST_WARNING);
                self.health.wait_until_up().await;
                match self.open_session(true).await {
                    Ok(s) => s,
                    Err(e) => {
                        debug!(target: "netmgmt::dispatch", "re-establishing session failed: {}", e);
                        return Err(finalize(err));
                    }
                }
            }
            RetryDecision::RetryAfterHealthCheck => {
                if !self.health.wait_until_up().await {
                    debug!(target: "netmgmt::dispatch", "retrying {} {} although the platform still reports down", method, url);
                }
                session
            }
        };
        let url = normalize_url(session.base_url(), path);
        match self.send_once(&session, method, &url, opts).await {
            Ok(r) => Ok(r),
            Err(retry_err) => {
                debug!(target: "netmgmt::dispatch", "retry of {} {} failed: {}", method, url, retry_err);
                Err(finalize(err))
            }
        }
    }

    /// Issue `method path` with recovery; see the module docs for the failure policy.
    pub async fn request(&self, method: Method, path: &str, opts: RequestOptions) -> ClientResult<Response> {
        let safe = opts.safe_mode.unwrap_or(self.principal.safe_request);
        let outcome = self.request_with_recovery(&method, path, &opts).await;
        let resp = match outcome {
            Ok(resp) => resp,
            Err(err) => match err.status() {
                Some(status) if opts.ignore_statuses.contains(&status) => match err.into_response() {
                    Some(resp) => resp,
                    None => return Err(ClientError::Application(format!("{} {} failed without a response", method, path))),
                },
                _ if safe => {
                    let url = err.response().map(|r| r.url.clone()).unwrap_or_else(|| path.to_string());
                    let synthesized = Response::synthesized_failure(method.as_str(), &url, &err);
                    let tallied = err.response().unwrap_or(&synthesized);
                    self.telemetry.record(method.as_str(), path, tallied.status, tallied.body());
                    warn!(target: "netmgmt::dispatch", "safe request {} {} failed: {}", method, url, err);
                    return Ok(synthesized);
                }
                _ => return Err(err),
            },
        };
        if safe {
            self.telemetry.record(method.as_str(), path, resp.status, resp.body());
        }
        Ok(resp)
    }

    pub async fn get(&self, path: &str, opts: RequestOptions) -> ClientResult<Response> { self.request(Method::GET, path, opts).await }
    pub async fn head(&self, path: &str, opts: RequestOptions) -> ClientResult<Response> { self.request(Method::HEAD, path, opts).await }
    pub async fn post(&self, path: &str, opts: RequestOptions) -> ClientResult<Response> { self.request(Method::POST, path, opts).await }
    pub async fn put(&self, path: &str, opts: RequestOptions) -> ClientResult<Response> { self.request(Method::PUT, path, opts).await }
    pub async fn patch(&self, path: &str, opts: RequestOptions) -> ClientResult<Response> { self.request(Method::PATCH, path, opts).await }
    pub async fn delete(&self, path: &str, opts: RequestOptions) -> ClientResult<Response> { self.request(Method::DELETE, path, opts).await }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod dispatch_tests;
