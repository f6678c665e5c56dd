//! Per-endpoint pass/fail tallies for safe-mode requests.
//!
//! Keys are `(verb, masked path)` so that `/nodes/17` and `/nodes/18` land in one record.
//! Records are created lazily, only ever incremented, and live as long as the process.

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;

static UUID_SEGMENT: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$").ok()
});
static HEX_ID_SEGMENT: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{16,}$").ok());
static DIGITS: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\d+").ok());

fn matches(re: &Lazy<Option<Regex>>, s: &str) -> bool {
    re.as_ref().map(|r| r.is_match(s)).unwrap_or(false)
}

fn mask_segment(seg: &str) -> String {
    if !seg.is_empty() && seg.bytes().all(|b| b.is_ascii_digit()) {
        return "<id>".to_string();
    }
    if matches(&UUID_SEGMENT, seg) || matches(&HEX_ID_SEGMENT, seg) {
        return "<id>".to_string();
    }
    match DIGITS.as_ref() {
        Some(re) => re.replace_all(seg, "[NUM]").into_owned(),
        None => seg.to_string(),
    }
}

/// Path component of a URL (or a bare path) with identifiers masked; the query is dropped.
pub fn mask_path(url_or_path: &str) -> String {
    let path = match reqwest::Url::parse(url_or_path) {
        Ok(u) => u.path().to_string(),
        Err(_) => url_or_path.split(['?', '#']).next().unwrap_or("").to_string(),
    };
    path.split('/').map(mask_segment).collect::<Vec<_>>().join("/")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EndpointRecord {
    pub passed: u64,
    pub failed: u64,
    /// Most recent failing body per status, truncated.
    pub last_failures: BTreeMap<u16, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EndpointKey {
    pub verb: String,
    pub path: String,
}

pub struct Telemetry {
    records: Mutex<HashMap<EndpointKey, EndpointRecord>>,
    sample_bytes: usize,
}

impl Telemetry {
    pub fn new(sample_bytes: usize) -> Self {
        Self { records: Mutex::new(HashMap::new()), sample_bytes }
    }

    fn key(verb: &str, url: &str) -> EndpointKey {
        EndpointKey { verb: verb.to_ascii_uppercase(), path: mask_path(url) }
    }

    fn truncate(&self, body: &[u8]) -> String {
        let text = String::from_utf8_lossy(body);
        if text.len() <= self.sample_bytes { return text.into_owned(); }
        let mut end = self.sample_bytes;
        while !text.is_char_boundary(end) { end -= 1; }
        text[..end].to_string()
    }

    /// Tally one outcome; statuses >= 400 count as failures and keep a body sample.
    pub fn record(&self, verb: &str, url: &str, status: u16, body: &[u8]) {
        let key = Self::key(verb, url);
        let sample = (status >= 400).then(|| self.truncate(body));
        let mut m = self.records.lock();
        let rec = m.entry(key).or_default();
        match sample {
            None => rec.passed += 1,
            Some(s) => {
                rec.failed += 1;
                rec.last_failures.insert(status, s);
            }
        }
    }

    pub fn get(&self, verb: &str, url: &str) -> Option<EndpointRecord> {
        self.records.lock().get(&Self::key(verb, url)).cloned()
    }

    /// All records, ordered by key.
    pub fn snapshot(&self) -> Vec<(EndpointKey, EndpointRecord)> {
        let mut v: Vec<_> = self.records.lock().iter().map(|(k, r)| (k.clone(), r.clone())).collect();
        v.sort_by(|a, b| a.0.cmp(&b.0));
        v
    }

    pub fn total_failed(&self) -> u64 { self.records.lock().values().map(|r| r.failed).sum() }
}
