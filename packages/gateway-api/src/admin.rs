//! Admin and health response bodies.

use serde::{Deserialize, Serialize};

/// `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthResponse {
    pub success: bool,
    /// `"development"` or `"production"`.
    pub mode: String,
    pub blocked_count: usize,
    pub cached_entries: usize,
}

/// `GET /admin/blocklist`: the current blocked address set, sorted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlocklistResponse {
    pub success: bool,
    pub blocked_ips: Vec<String>,
    pub count: usize,
}

/// `POST /admin/blocklist` request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockRequest {
    pub address: String,
}

/// Outcome of an explicit block or unblock.
///
/// `changed` is `false` when the address was already blocked (add) or was
/// not blocked (remove).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockResult {
    pub success: bool,
    pub address: String,
    pub changed: bool,
}

/// `GET /admin/violations/{address}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ViolationView {
    pub address: String,
    pub count: u32,
    /// RFC 3339 timestamp of the most recent violation.
    pub last_violation_at: String,
    pub blocked: bool,
}

/// Query string for `DELETE /admin/cache`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheClearQuery {
    /// Path prefix to invalidate. Absent flushes the whole cache.
    pub prefix: Option<String>,
}

/// `DELETE /admin/cache`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheClearResponse {
    pub success: bool,
    pub removed: usize,
}
