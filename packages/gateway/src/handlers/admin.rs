//! Admin handlers (API-key gated in production).
//!
//! - `GET    /admin/blocklist`
//! - `POST   /admin/blocklist`
//! - `DELETE /admin/blocklist/{address}`
//! - `GET    /admin/violations/{address}`
//! - `DELETE /admin/cache?prefix=`

use std::net::IpAddr;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{SecondsFormat, Utc};
use edgeward_gateway_api::{
    BlockRequest, BlockResult, BlocklistResponse, CacheClearQuery, CacheClearResponse,
    ViolationView,
};
use tracing::info;

use super::AppState;
use crate::error::GatewayError;

/// `GET /admin/blocklist`
pub async fn list_blocked(State(state): State<AppState>) -> Json<BlocklistResponse> {
    let blocked_ips = state.blocklist.blocked_ips();
    Json(BlocklistResponse {
        success: true,
        count: blocked_ips.len(),
        blocked_ips,
    })
}

/// `POST /admin/blocklist`
///
/// Explicit block. The address also gets a violation record at the
/// threshold so the daily cleanup keeps it for the full block duration.
/// Returns 201 when newly blocked, 200 when it already was.
pub async fn block(
    State(state): State<AppState>,
    Json(req): Json<BlockRequest>,
) -> Result<(StatusCode, Json<BlockResult>), GatewayError> {
    let address = parse_address(&req.address)?;
    let changed = state.blocklist.add(&address).await;
    state.tracker.mark_blocked_at(&address, Utc::now());
    info!(client = %address, changed, "address blocked by admin");

    let status = if changed { StatusCode::CREATED } else { StatusCode::OK };
    Ok((
        status,
        Json(BlockResult {
            success: true,
            address,
            changed,
        }),
    ))
}

/// `DELETE /admin/blocklist/{address}`
///
/// Unblocks and forgets the violation record, so the address starts from a
/// clean slate.
pub async fn unblock(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<BlockResult>, GatewayError> {
    let address = normalise(&address);
    let removed = state.blocklist.remove(&address).await;
    state.tracker.forget(&address);
    if !removed {
        return Err(GatewayError::NotFound(format!("{address} is not blocked")));
    }
    Ok(Json(BlockResult {
        success: true,
        address,
        changed: true,
    }))
}

/// `GET /admin/violations/{address}`
pub async fn violations(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Json<ViolationView>, GatewayError> {
    let address = normalise(&address);
    let record = state
        .tracker
        .get(&address)
        .ok_or_else(|| GatewayError::NotFound(format!("no violations recorded for {address}")))?;
    Ok(Json(ViolationView {
        blocked: state.blocklist.is_blocked(&address),
        count: record.count,
        last_violation_at: record
            .last_violation_at
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        address: record.address,
    }))
}

/// `DELETE /admin/cache?prefix=/products`
pub async fn clear_cache(
    State(state): State<AppState>,
    Query(query): Query<CacheClearQuery>,
) -> Json<CacheClearResponse> {
    let removed = state.cache.clear(query.prefix.as_deref());
    info!(removed, prefix = query.prefix.as_deref().unwrap_or("*"), "cache cleared by admin");
    Json(CacheClearResponse {
        success: true,
        removed,
    })
}

fn parse_address(raw: &str) -> Result<String, GatewayError> {
    raw.trim()
        .parse::<IpAddr>()
        .map(|ip| ip.to_canonical().to_string())
        .map_err(|_| GatewayError::BadRequest(format!("not an IP address: {raw}")))
}

/// Canonical form for lookups; non-IP keys (such as `unknown`) pass through.
fn normalise(raw: &str) -> String {
    parse_address(raw).unwrap_or_else(|_| raw.trim().to_string())
}
