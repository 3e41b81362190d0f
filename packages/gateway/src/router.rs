//! Assembles the Axum [`Router`] from all handler modules.

use std::sync::Arc;

use axum::{
    middleware::from_fn_with_state,
    routing::{any, delete, get},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::{
    error::GatewayError,
    handlers::{admin, forward, health, AppState},
    middleware::{
        blocklist::blocklist_middleware,
        client::client_addr_middleware,
        gate::{api_key_middleware, origin_middleware},
        rate_limit::rate_limit_middleware,
    },
};

/// Build the complete application router over shared state.
///
/// Layers run outermost first: trace, client address, origin gate,
/// blocklist guard, route-class rate limiter. Admin routes add the API-key
/// gate after the limiter, so failed key attempts still count.
pub fn build_router(state: AppState) -> Router {
    let admin = Router::new()
        .route(
            "/admin/blocklist",
            get(admin::list_blocked).post(admin::block),
        )
        .route("/admin/blocklist/{address}", delete(admin::unblock))
        .route("/admin/violations/{address}", get(admin::violations))
        .route("/admin/cache", delete(admin::clear_cache))
        .route_layer(from_fn_with_state(
            Arc::clone(&state.config),
            api_key_middleware,
        ));

    Router::new()
        .route("/health", get(health::health))
        // One wildcard for every class; the handler classifies by path.
        .route("/api/{*path}", any(forward::forward))
        .merge(admin)
        .fallback(not_found)
        .with_state(state.clone())
        .layer(from_fn_with_state(
            Arc::clone(&state.limiter),
            rate_limit_middleware,
        ))
        .layer(from_fn_with_state(
            Arc::clone(&state.blocklist),
            blocklist_middleware,
        ))
        .layer(from_fn_with_state(
            Arc::clone(&state.config),
            origin_middleware,
        ))
        .layer(from_fn_with_state(
            state.config.trust_proxy,
            client_addr_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

async fn not_found() -> GatewayError {
    GatewayError::NotFound("no such route".into())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
