//! HTTP boundary to the platform.
//!
//! `Transport` is the seam the session manager and dispatcher talk to; `HttpTransport` is the
//! reqwest-backed implementation. Cookies are captured by hand from `Set-Cookie` and replayed on
//! every request, and redirects are never followed, so a login redirect can be told apart from
//! a successful login.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::response::Response;

/// Name of the cookie carrying the session token.
pub const AUTH_COOKIE: &str = "iPlanetDirectoryPro";

const PASSWORD_CHANGE_CODES: [&str; 2] = ["PASSWORD_RESET", "PASSWORD_EXPIRE"];

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(Value),
    Form(Vec<(String, String)>),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Body>,
    pub timeout: Option<Duration>,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self { method, url: url.into(), headers: Vec::new(), body: None, timeout: None }
    }

    pub fn get(url: impl Into<String>) -> Self { Self::new(Method::GET, url) }
}

#[async_trait]
pub trait Transport: Send + Sync {
    fn base_url(&self) -> &str;

    /// Issue one request. Statuses >= 400 and redirects to the login page come back as
    /// `ClientError::Http`; failures without an answer as `ClientError::Connectivity`.
    async fn send(&self, request: Request) -> ClientResult<Response>;

    /// Authenticate and return the auth token. Rejected credentials yield `AuthFailure`.
    async fn login(&self, username: &str, password: &str) -> ClientResult<String>;

    async fn logout(&self) -> ClientResult<()>;

    fn set_auth_token(&self, token: &str);
    fn auth_token(&self) -> Option<String>;
}

/// Builds a fresh transport for a base URL; each session owns its own cookie jar.
pub trait Connector: Send + Sync {
    fn connect(&self, base_url: &str) -> ClientResult<Arc<dyn Transport>>;
}

pub struct HttpConnector {
    config: ClientConfig,
}

impl HttpConnector {
    pub fn new(config: ClientConfig) -> Self { Self { config } }
}

impl Connector for HttpConnector {
    fn connect(&self, base_url: &str) -> ClientResult<Arc<dyn Transport>> {
        Ok(Arc::new(HttpTransport::new(base_url, &self.config)?))
    }
}

pub struct HttpTransport {
    base: String,
    client: reqwest::Client,
    cookies: RwLock<BTreeMap<String, String>>,
    login_attempts: u32,
    login_retry_wait: Duration,
}

/// `name=value` part of a `Set-Cookie` header value.
fn cookie_pair(set_cookie: &str) -> Option<(String, String)> {
    let nv = set_cookie.split(';').next()?.trim();
    let (name, value) = nv.split_once('=')?;
    let name = name.trim();
    if name.is_empty() { return None; }
    Some((name.to_string(), value.trim().to_string()))
}

fn is_login_redirect(response: &Response) -> bool {
    response.is_redirect()
        && response.header("location").map(|l| l.contains("login/?goto") || l.contains("login?goto")).unwrap_or(false)
}

impl HttpTransport {
    pub fn new(base_url: &str, config: &ClientConfig) -> ClientResult<Self> {
        reqwest::Url::parse(base_url)
            .map_err(|e| ClientError::Config(format!("invalid base URL '{}': {}", base_url, e)))?;
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ClientError::Config(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            base: base_url.trim_end_matches('/').to_string(),
            client,
            cookies: RwLock::new(BTreeMap::new()),
            login_attempts: config.login_attempts.max(1),
            login_retry_wait: config.login_retry_wait(),
        })
    }

    fn cookie_header(&self) -> Option<String> {
        let jar = self.cookies.read();
        if jar.is_empty() { return None; }
        Some(jar.iter().map(|(k, v)| format!("{}={}", k, v)).collect::<Vec<_>>().join("; "))
    }

    fn capture_cookies(&self, response: &Response) {
        let pairs: Vec<(String, String)> = response.header_all("set-cookie").filter_map(cookie_pair).collect();
        if pairs.is_empty() { return; }
        let mut jar = self.cookies.write();
        for (k, v) in pairs { jar.insert(k, v); }
    }

    /// Send without status interpretation; only transport failures are errors here.
    async fn exchange(&self, request: Request) -> ClientResult<Response> {
        let method_name = request.method.as_str().to_string();
        let mut rb = self.client.request(request.method, &request.url);
        for (k, v) in &request.headers { rb = rb.header(k.as_str(), v.as_str()); }
        if let Some(cookie) = self.cookie_header() { rb = rb.header(reqwest::header::COOKIE, cookie); }
        if let Some(t) = request.timeout { rb = rb.timeout(t); }
        rb = match request.body {
            Some(Body::Json(v)) => rb.json(&v),
            Some(Body::Form(f)) => rb.form(&f),
            Some(Body::Bytes(b)) => rb.body(b),
            None => rb,
        };
        let resp = rb.send().await.map_err(|e| ClientError::Connectivity(describe(&e)))?;
        let mut out = Response::new(method_name, request.url, resp.status().as_u16());
        for (name, value) in resp.headers().iter() {
            if let Ok(v) = value.to_str() { out = out.with_header(name.as_str(), v); }
        }
        let bytes = resp.bytes().await.map_err(|e| ClientError::Connectivity(describe(&e)))?;
        let out = out.with_body(bytes.to_vec());
        self.capture_cookies(&out);
        Ok(out)
    }

    async fn login_once(&self, username: &str, password: &str) -> ClientResult<String> {
        let mut req = Request::new(Method::POST, format!("{}/login", self.base));
        req.body = Some(Body::Form(vec![
            ("IDToken1".to_string(), username.to_string()),
            ("IDToken2".to_string(), password.to_string()),
        ]));
        let resp = self.exchange(req).await?;
        if resp.status >= 400 {
            return Err(ClientError::from_response(resp));
        }
        if resp.status == 200 {
            if let Ok(v) = resp.json_value() {
                if let Some(code) = v.get("code").and_then(|c| c.as_str()).filter(|c| PASSWORD_CHANGE_CODES.contains(c)) {
                    return Err(ClientError::from_response_with_prefix(
                        resp.clone(),
                        &format!("Password change required for user {} ({}): ", username, code),
                    ));
                }
            }
        }
        match self.auth_token() {
            Some(token) => Ok(token),
            None => Err(ClientError::AuthFailure {
                username: username.to_string(),
                message: format!("Invalid login, credentials are invalid for user {}", username),
            }),
        }
    }
}

/// reqwest hides the root cause behind "error sending request"; walk the chain so proxy and
/// routing failures stay recognisable.
fn describe(err: &reqwest::Error) -> String {
    let mut msg = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(s) = source {
        msg.push_str(": ");
        msg.push_str(&s.to_string());
        source = s.source();
    }
    msg
}

#[async_trait]
impl Transport for HttpTransport {
    fn base_url(&self) -> &str { &self.base }

    async fn send(&self, request: Request) -> ClientResult<Response> {
        let resp = self.exchange(request).await?;
        if resp.status >= 400 || is_login_redirect(&resp) {
            return Err(ClientError::from_response(resp));
        }
        Ok(resp)
    }

    async fn login(&self, username: &str, password: &str) -> ClientResult<String> {
        let mut attempt = 1;
        loop {
            match self.login_once(username, password).await {
                Err(ClientError::Connectivity(msg)) if attempt < self.login_attempts => {
                    warn!(target: "netmgmt::session", "login attempt {} for {} failed: {}; retrying", attempt, username, msg);
                    tokio::time::sleep(self.login_retry_wait).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn logout(&self) -> ClientResult<()> {
        let result = self.exchange(Request::get(format!("{}/logout", self.base))).await;
        self.cookies.write().clear();
        if let Err(e) = &result {
            debug!(target: "netmgmt::session", "logout request failed: {}", e);
        }
        result.map(|_| ())
    }

    fn set_auth_token(&self, token: &str) {
        self.cookies.write().insert(AUTH_COOKIE.to_string(), token.to_string());
    }

    fn auth_token(&self) -> Option<String> {
        self.cookies.read().get(AUTH_COOKIE).cloned().filter(|t| !t.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_pair_takes_name_value_before_attributes() {
        assert_eq!(cookie_pair("iPlanetDirectoryPro=abc123; Path=/; Secure"), Some((AUTH_COOKIE.into(), "abc123".into())));
        assert_eq!(cookie_pair("flag"), None);
        assert_eq!(cookie_pair("=x"), None);
    }

    #[test]
    fn login_redirect_detection() {
        let r = Response::new("GET", "https://h/x", 302).with_header("Location", "https://h/login/?goto=https://h/x");
        assert!(is_login_redirect(&r));
        let r = Response::new("GET", "https://h/x", 302).with_header("Location", "https://h/other");
        assert!(!is_login_redirect(&r));
    }

    #[test]
    fn auth_token_set_and_read_back() {
        let t = HttpTransport::new("https://nms.example.com/", &ClientConfig::default()).unwrap();
        assert_eq!(t.base_url(), "https://nms.example.com");
        assert_eq!(t.auth_token(), None);
        t.set_auth_token("abc123");
        assert_eq!(t.auth_token().as_deref(), Some("abc123"));
        assert_eq!(t.cookie_header().as_deref(), Some("iPlanetDirectoryPro=abc123"));
    }

    #[test]
    fn invalid_base_url_is_config_error() {
        assert!(matches!(HttpTransport::new("not a url", &ClientConfig::default()), Err(ClientError::Config(_))));
    }
}
