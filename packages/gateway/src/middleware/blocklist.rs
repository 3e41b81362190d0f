//! Blocklist guard: short-circuits blocked clients before any accounting.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use super::client::ClientAddr;
use crate::{blocklist::Blocklist, error::GatewayError};

/// Reject requests from blocked addresses with 403.
///
/// Runs before the rate limiter, so blocked clients never add to their
/// violation count.
pub async fn blocklist_middleware(
    State(blocklist): State<Arc<Blocklist>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let client = ClientAddr::of(&req);
    if blocklist.is_blocked(&client) {
        warn!(
            client = %client,
            method = %req.method(),
            path = %req.uri().path(),
            "blocked client rejected"
        );
        return GatewayError::ClientBlocked.into_response();
    }
    next.run(req).await
}
