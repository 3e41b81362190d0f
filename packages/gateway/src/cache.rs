//! TTL response cache for idempotent upstream reads.
//!
//! Entries are keyed by lower-cased method, exact path, and the query string
//! re-serialised as a JSON object in received order. `?a=1&b=2` and
//! `?b=2&a=1` are different keys on purpose.
//!
//! Bodies are stored as [`Bytes`], so a hit hands out a reference-counted
//! view of the stored body rather than a copy. Concurrent writers for the
//! same key simply overwrite each other; the last one wins.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::{debug, info};

/// Request header that skips the cache for one request.
pub const BYPASS_HEADER: &str = "x-cache-bypass";

/// Response header reporting `HIT`, `MISS`, or `BYPASS`.
pub const STATUS_HEADER: &str = "x-cache";

// ---------------------------------------------------------------------------
// CacheKey
// ---------------------------------------------------------------------------

/// Derived cache key plus the path it was derived from (for prefix clears).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    key: String,
    path: String,
}

impl CacheKey {
    pub fn new(method: &Method, path: &str, query: Option<&str>) -> Self {
        let query_json = Value::Object(query_to_map(query.unwrap_or(""))).to_string();
        Self {
            key: format!("{}:{path}:{query_json}", method.as_str().to_ascii_lowercase()),
            path: path.to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Parse `a=1&b=2&a=3` into `{"a":["1","3"],"b":"2"}`, keeping first-seen order.
fn query_to_map(query: &str) -> Map<String, Value> {
    let mut map = Map::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (raw_key, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_component(raw_key);
        let value = Value::String(decode_component(raw_value));
        match map.get_mut(&key) {
            None => {
                map.insert(key, value);
            }
            Some(Value::Array(values)) => values.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
        }
    }
    map
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

/// Whether the request asked to skip the cache.
pub fn bypass_requested(headers: &HeaderMap) -> bool {
    let flag = headers
        .get(BYPASS_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);
    let no_cache = headers
        .get("cache-control")
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            let v = v.to_ascii_lowercase();
            v.contains("no-cache") || v.contains("no-store")
        })
        .unwrap_or(false);
    flag || no_cache
}

// ---------------------------------------------------------------------------
// ResponseCache
// ---------------------------------------------------------------------------

/// A cached upstream response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub path: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
    pub expires_at: Instant,
}

/// In-memory TTL cache of upstream GET responses.
pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The live entry for `key`, if any.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        entries
            .get(key.as_str())
            .filter(|e| e.expires_at > Instant::now())
            .cloned()
    }

    /// Store a response under `key` for one TTL.
    pub fn set(&self, key: &CacheKey, status: u16, content_type: Option<String>, body: Bytes) {
        let entry = CacheEntry {
            key: key.as_str().to_string(),
            path: key.path().to_string(),
            status,
            content_type,
            body,
            expires_at: Instant::now() + self.ttl,
        };
        debug!(key = %entry.key, "cache store");
        self.entries
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(entry.key.clone(), entry);
    }

    /// Remove entries whose path is `prefix` or lies beneath it; `None` (or
    /// `/`) flushes everything. Returns how many entries were removed.
    pub fn clear(&self, prefix: Option<&str>) -> usize {
        let prefix = prefix.map(|p| p.trim_end_matches('/')).filter(|p| !p.is_empty());
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        let before = entries.len();
        match prefix {
            None => entries.clear(),
            Some(prefix) => entries.retain(|_, e| !path_under(&e.path, prefix)),
        }
        let removed = before - entries.len();
        if removed > 0 {
            info!(removed, prefix = prefix.unwrap_or("*"), "cache cleared");
        }
        removed
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn path_under(path: &str, prefix: &str) -> bool {
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
