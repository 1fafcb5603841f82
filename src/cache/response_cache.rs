//! Response cache with path-based TTLs and eligibility rules.
//!
//! Cache key is `METHOD:path[:sha256(sorted query)][:role]`. Entries live in
//! an injected `KeyValueStore` and expire only by TTL; writes to the upstream
//! never invalidate them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::security::identity::Caller;
use crate::store::KeyValueStore;

/// Headers never replayed from the cache.
const UNCACHED_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "transfer-encoding",
    "content-length",
    "set-cookie",
    "x-request-id",
    "x-cache",
    "x-cache-key",
];

/// A stored response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub status: u16,
    pub headers: Vec<(String, Vec<u8>)>,
    pub body: Vec<u8>,
}

impl CacheEntry {
    pub fn new(status: StatusCode, headers: &HeaderMap, body: Vec<u8>) -> Self {
        let headers = headers
            .iter()
            .filter(|(name, _)| !UNCACHED_HEADERS.contains(&name.as_str()))
            .map(|(name, value)| (name.as_str().to_string(), value.as_bytes().to_vec()))
            .collect();
        Self {
            status: status.as_u16(),
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK)
    }

    /// Rebuild the header map, skipping anything that no longer parses.
    pub fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_bytes(value),
            ) {
                map.append(name, value);
            }
        }
        map
    }
}

/// How a request was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
    Bypass,
}

impl CacheOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheOutcome::Hit => "HIT",
            CacheOutcome::Miss => "MISS",
            CacheOutcome::Bypass => "BYPASS",
        }
    }
}

/// Cache front-end over a key-value store.
#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn KeyValueStore>,
    max_payload_bytes: usize,
    default_ttl: Duration,
    ttl_rules: Arc<Vec<(String, Duration)>>,
    sensitive_paths: Arc<Vec<String>>,
    bypass_params: Arc<Vec<String>>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn KeyValueStore>, config: &CacheConfig) -> Self {
        Self {
            store,
            max_payload_bytes: config.max_payload_bytes,
            default_ttl: Duration::from_secs(config.default_ttl_secs),
            ttl_rules: Arc::new(
                config
                    .ttl_rules
                    .iter()
                    .map(|r| (r.contains.clone(), Duration::from_secs(r.ttl_secs)))
                    .collect(),
            ),
            sensitive_paths: Arc::new(config.sensitive_paths.clone()),
            bypass_params: Arc::new(config.bypass_params.clone()),
        }
    }

    pub fn max_payload_bytes(&self) -> usize {
        self.max_payload_bytes
    }

    /// Number of live entries in the backing store.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All gates must pass for a request to be served from or written to the cache.
    pub fn is_eligible(&self, method: &Method, uri: &Uri, caller: &Caller) -> bool {
        if method != Method::GET && method != Method::HEAD {
            return false;
        }

        let path = uri.path();
        if caller.is_authenticated() && self.sensitive_paths.iter().any(|p| path.contains(p.as_str())) {
            return false;
        }

        let params = query_params(uri.query());
        !params.keys().any(|k| self.bypass_params.contains(k))
    }

    /// First TTL rule contained in `path`, else the default.
    pub fn ttl_for(&self, path: &str) -> Duration {
        self.ttl_rules
            .iter()
            .find(|(needle, _)| path.contains(needle.as_str()))
            .map(|(_, ttl)| *ttl)
            .unwrap_or(self.default_ttl)
    }

    /// Fetch an entry. Store or decode failures count as a miss.
    pub fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let bytes = match self.store.get(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "Cache store unavailable, treating as miss");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, key = %key, "Discarding undecodable cache entry");
                None
            }
        }
    }

    /// Store an entry for `ttl`. Returns whether it was written.
    pub fn store(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> bool {
        if entry.body.len() > self.max_payload_bytes {
            debug!(key = %key, size = entry.body.len(), "Response too large to cache");
            return false;
        }
        let bytes = match serde_json::to_vec(entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "Failed to encode cache entry");
                return false;
            }
        };
        match self.store.put(key, bytes, ttl) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Cache store unavailable, response not cached");
                false
            }
        }
    }
}

/// `METHOD:path[:hash(query)][:role]`.
pub fn cache_key(method: &Method, uri: &Uri, caller: &Caller) -> String {
    let mut key = format!("{}:{}", method.as_str(), uri.path());

    let params = query_params(uri.query());
    if !params.is_empty() {
        key.push(':');
        key.push_str(&query_digest(&params));
    }

    if caller.is_authenticated() {
        key.push(':');
        key.push_str(caller.role.as_deref().unwrap_or("authenticated"));
    }
    key
}

/// Decoded query parameters, sorted by name; repeated names keep their order.
fn query_params(query: Option<&str>) -> BTreeMap<String, Vec<String>> {
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    if let Some(q) = query {
        for (k, v) in url::form_urlencoded::parse(q.as_bytes()) {
            params.entry(k.into_owned()).or_default().push(v.into_owned());
        }
    }
    params
}

/// SHA-256 of the canonical JSON form of the sorted parameter map.
fn query_digest(params: &BTreeMap<String, Vec<String>>) -> String {
    // BTreeMap serializes in key order, so the encoding is canonical.
    let canonical = serde_json::to_vec(params).unwrap_or_default();
    format!("{:x}", Sha256::digest(&canonical))
}
