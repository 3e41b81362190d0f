//! HTTP request handlers for every gateway endpoint.
//!
//! | Module | Endpoints |
//! |--------|-----------|
//! | [`health`] | `GET /health` |
//! | [`forward`] | `ANY /api/{*path}`: cache lookup, upstream call, cache store / invalidate |
//! | [`admin`] | `/admin/blocklist`, `/admin/violations/{address}`, `/admin/cache` |
//!
//! Handlers receive Axum extractors and return `Result<_, GatewayError>`.
//! Security checks (blocklist, limits, origin, API key) have already run as
//! middleware by the time a handler is called.

pub mod admin;
pub mod forward;
pub mod health;

use std::sync::Arc;

use crate::{
    blocklist::Blocklist, cache::ResponseCache, config::GatewayConfig,
    middleware::rate_limit::RateLimiter, proxy::Forwarder, violations::ViolationTracker,
};

/// Shared application state threaded through all Axum handlers via
/// [`axum::extract::State`]. Every field is an `Arc`, so cloning per request
/// is cheap.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub blocklist: Arc<Blocklist>,
    pub tracker: Arc<ViolationTracker>,
    pub limiter: Arc<RateLimiter>,
    pub cache: Arc<ResponseCache>,
    pub forwarder: Arc<Forwarder>,
}
