//! Request-facing error type.
//!
//! Every rejection the gateway produces serialises to an [`Envelope`] and maps
//! to the matching HTTP status code. Upstream HTTP errors keep the upstream
//! status and nest the upstream body under `data`.

use std::time::Duration;

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use edgeward_gateway_api::{error::codes, Envelope};

use crate::middleware::rate_limit::RouteClass;

/// An error that a middleware or handler can return; converts directly to an
/// HTTP response.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The client address is on the blocklist.
    #[error("client blocked")]
    ClientBlocked,

    /// The route-class window is exhausted.
    #[error("rate limited ({class})")]
    RateLimited {
        class: RouteClass,
        retry_after: Duration,
    },

    /// Missing or wrong API key on a gated route.
    #[error("invalid credential")]
    CredentialInvalid,

    /// Origin/Referer not on the allow-list under the `enforce` policy.
    #[error("origin rejected")]
    OriginRejected,

    /// The upstream answered with a non-success status.
    #[error("upstream returned {status}")]
    Upstream {
        status: StatusCode,
        body: serde_json::Value,
    },

    /// The upstream could not be reached or did not answer in time.
    /// `detail` is `None` in production.
    #[error("upstream unreachable")]
    UpstreamUnreachable { detail: Option<String> },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    /// The request body exceeds the forwarding limit.
    #[error("request body larger than {limit} bytes")]
    PayloadTooLarge { limit: usize },
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::ClientBlocked | GatewayError::OriginRejected => StatusCode::FORBIDDEN,
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::CredentialInvalid => StatusCode::UNAUTHORIZED,
            GatewayError::Upstream { status, .. } => *status,
            GatewayError::UpstreamUnreachable { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let mut retry_after = None;
        let body = match self {
            GatewayError::ClientBlocked => Envelope::failure(
                codes::CLIENT_BLOCKED,
                "Access denied. Your IP address has been blocked due to repeated violations.",
            ),
            GatewayError::RateLimited { class, retry_after: wait } => {
                retry_after = Some(wait.as_secs().max(1));
                Envelope::failure(codes::RATE_LIMITED, class.rejection_message())
            }
            GatewayError::CredentialInvalid => {
                Envelope::failure(codes::CREDENTIAL_INVALID, "Invalid or missing API key")
            }
            GatewayError::OriginRejected => {
                Envelope::failure(codes::ORIGIN_REJECTED, "Origin not allowed")
            }
            GatewayError::Upstream { status, body } => Envelope::failure(
                codes::UPSTREAM_ERROR,
                format!(
                    "External API request failed: {}",
                    status.canonical_reason().unwrap_or("error")
                ),
            )
            .with_data(body),
            GatewayError::UpstreamUnreachable { detail } => {
                let envelope =
                    Envelope::failure(codes::UPSTREAM_UNREACHABLE, "Failed to reach external API");
                match detail {
                    Some(detail) => envelope.with_error(detail),
                    None => envelope,
                }
            }
            GatewayError::NotFound(msg) => Envelope::failure(codes::NOT_FOUND, msg),
            GatewayError::BadRequest(msg) => Envelope::failure(codes::INVALID_PARAMETER, msg),
            GatewayError::PayloadTooLarge { limit } => Envelope::failure(
                codes::PAYLOAD_TOO_LARGE,
                format!("Request body exceeds {limit} bytes"),
            ),
        };

        let mut resp = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            if let Ok(v) = HeaderValue::from_str(&secs.to_string()) {
                resp.headers_mut().insert("retry-after", v);
            }
        }
        resp
    }
}
