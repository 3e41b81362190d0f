//! Liveness handler: `GET /health`.

use axum::{extract::State, Json};
use edgeward_gateway_api::HealthResponse;

use super::AppState;

/// `GET /health`
///
/// Never rate limited, but still sits behind the blocklist check.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        success: true,
        mode: state.config.mode.as_str().to_string(),
        blocked_count: state.blocklist.len(),
        cached_entries: state.cache.len(),
    })
}
