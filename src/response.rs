//! Response model shared by every transport.
//!
//! The content kind is decided once from the `Content-Type` header when headers are attached,
//! so message extraction never has to probe the body shape.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{ClientError, ClientResult};

/// Status used for responses synthesized from failures that never produced an HTTP answer.
pub const SYNTHETIC_FAILURE_STATUS: u16 = 599;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Json,
    Text,
    Unknown,
}

impl ContentKind {
    pub fn from_content_type(value: Option<&str>) -> Self {
        let Some(ct) = value else { return ContentKind::Unknown; };
        let ct = ct.trim().to_ascii_lowercase();
        let mime = ct.split(';').next().unwrap_or("").trim();
        if mime == "application/json" || mime.ends_with("+json") {
            ContentKind::Json
        } else if mime.starts_with("text/") || mime == "application/xml" || mime.ends_with("+xml") {
            ContentKind::Text
        } else {
            ContentKind::Unknown
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub method: String,
    pub url: String,
    pub status: u16,
    headers: Vec<(String, String)>,
    #[serde(serialize_with = "serialize_lossy")]
    body: Vec<u8>,
    content_kind: ContentKind,
}

fn serialize_lossy<S: serde::Serializer>(body: &[u8], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&String::from_utf8_lossy(body))
}

impl Response {
    pub fn new(method: impl Into<String>, url: impl Into<String>, status: u16) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            status,
            headers: Vec::new(),
            body: Vec::new(),
            content_kind: ContentKind::Unknown,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        if name.eq_ignore_ascii_case("content-type") {
            self.content_kind = ContentKind::from_content_type(Some(&value));
        }
        self.headers.push((name, value));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Convenience for tests and synthesized answers: JSON body plus matching content type.
    pub fn with_json(self, value: &Value) -> Self {
        let bytes = serde_json::to_vec(value).unwrap_or_default();
        self.with_header("Content-Type", "application/json").with_body(bytes)
    }

    /// Response returned in safe mode instead of raising.
    pub fn synthesized_failure(method: &str, url: &str, err: &ClientError) -> Self {
        let text = format!(
            "ERROR: {}\n{} request to {} raised this exception.",
            err, method, url
        );
        Response::new(method, url, SYNTHETIC_FAILURE_STATUS)
            .with_header("Content-Type", "text/plain")
            .with_body(text.into_bytes())
    }

    pub fn content_kind(&self) -> ContentKind { self.content_kind }
    pub fn headers(&self) -> &[(String, String)] { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Case-insensitive header lookup; the first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values of a repeated header (e.g. `Set-Cookie`).
    pub fn header_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_ok(&self) -> bool { self.status < 400 }
    pub fn is_redirect(&self) -> bool { (300..400).contains(&self.status) }

    pub fn text(&self) -> String { String::from_utf8_lossy(&self.body).into_owned() }

    pub fn json_value(&self) -> ClientResult<Value> {
        serde_json::from_slice(&self.body)
            .map_err(|_| ClientError::Application(format!("Unexpected response received {}", self.text())))
    }

    pub fn json<T: DeserializeOwned>(&self) -> ClientResult<T> {
        serde_json::from_slice(&self.body)
            .map_err(|_| ClientError::Application(format!("Unexpected response received {}", self.text())))
    }

    /// Human-readable message for a failing response.
    ///
    /// JSON bodies yield `userMessage`, then `message`, then the whole document re-serialized;
    /// text bodies yield the text; anything else yields the raw body or a dump of the response.
    pub fn user_message(&self) -> String {
        match self.content_kind {
            ContentKind::Json => match serde_json::from_slice::<Value>(&self.body) {
                Ok(v) => {
                    if let Some(m) = v.get("userMessage").and_then(|m| m.as_str()) {
                        m.to_string()
                    } else if let Some(m) = v.get("message").and_then(|m| m.as_str()) {
                        m.to_string()
                    } else {
                        v.to_string()
                    }
                }
                Err(e) => e.to_string(),
            },
            ContentKind::Text => self.text(),
            ContentKind::Unknown => {
                if !self.body.is_empty() {
                    self.text()
                } else {
                    serde_json::to_string(self).unwrap_or_else(|_| format!("{} {} -> {}", self.method, self.url, self.status))
                }
            }
        }
    }
}

/// Fail with an `Http` error (message prefixed) when the status is in 400..600.
pub fn raise_for_status(response: &Response, message_prefix: &str) -> ClientResult<()> {
    if (400..600).contains(&response.status) {
        return Err(ClientError::from_response_with_prefix(response.clone(), message_prefix));
    }
    Ok(())
}

/// Fail with an application error when the body is not JSON.
pub fn verify_json_response(response: &Response) -> ClientResult<()> {
    response.json_value().map(|_| ())
}

#[cfg(test)]
#[path = "response_tests.rs"]
mod response_tests;
