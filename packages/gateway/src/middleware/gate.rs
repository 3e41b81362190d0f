//! Origin and credential gate.
//!
//! Two independent checks, both inactive in development mode:
//!
//! - [`origin_middleware`] compares the `Origin` (or `Referer`) of mutation
//!   requests against the configured allow-list. Under
//!   [`OriginPolicy::Audit`] a mismatch is only logged; under
//!   [`OriginPolicy::Enforce`] it is rejected with 403. A mutation with no
//!   `Origin`/`Referer` at all is logged and let through unless
//!   `require_origin` is set together with `Enforce`.
//! - [`api_key_middleware`] guards admin routes with the static shared
//!   secret, accepted as `X-API-Key` or `Authorization: Bearer`.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use super::client::ClientAddr;
use crate::{
    config::{GatewayConfig, OriginPolicy},
    error::GatewayError,
};

// ---------------------------------------------------------------------------
// Origin
// ---------------------------------------------------------------------------

/// Check `Origin`/`Referer` on mutation requests in production.
pub async fn origin_middleware(
    State(config): State<Arc<GatewayConfig>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !config.mode.is_production() || is_safe(req.method()) {
        return next.run(req).await;
    }

    let client = ClientAddr::of(&req);
    let enforce = config.origin_policy == OriginPolicy::Enforce;

    match request_origin(req.headers()) {
        None => {
            info!(
                client = %client,
                method = %req.method(),
                path = %req.uri().path(),
                "mutation without Origin or Referer"
            );
            if enforce && config.require_origin {
                return GatewayError::OriginRejected.into_response();
            }
        }
        Some(origin) if !origin_allowed(origin, &config.allowed_origins) => {
            warn!(
                client = %client,
                method = %req.method(),
                path = %req.uri().path(),
                origin = %origin,
                policy = if enforce { "enforce" } else { "audit" },
                "origin not in allow-list"
            );
            if enforce {
                return GatewayError::OriginRejected.into_response();
            }
        }
        Some(_) => {}
    }

    next.run(req).await
}

fn is_safe(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

fn request_origin(headers: &HeaderMap) -> Option<&str> {
    ["origin", "referer"].into_iter().find_map(|name| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty() && *v != "null")
    })
}

/// Exact match first; otherwise the value may extend an allowed origin with
/// a path (how `Referer` looks), but not with more host characters.
pub fn origin_allowed(value: &str, allowed: &[String]) -> bool {
    let value = value.trim_end_matches('/');
    allowed.iter().any(|a| {
        value == a
            || value
                .strip_prefix(a.as_str())
                .is_some_and(|rest| rest.starts_with('/') || rest.starts_with('?'))
    })
}

// ---------------------------------------------------------------------------
// API key
// ---------------------------------------------------------------------------

/// Require the shared API key on admin routes in production.
pub async fn api_key_middleware(
    State(config): State<Arc<GatewayConfig>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !config.mode.is_production() {
        return next.run(req).await;
    }

    let presented = presented_key(req.headers());
    let valid = match (config.api_key.as_deref(), presented) {
        (Some(expected), Some(given)) => bool::from(given.as_bytes().ct_eq(expected.as_bytes())),
        _ => false,
    };

    if !valid {
        warn!(
            client = %ClientAddr::of(&req),
            method = %req.method(),
            path = %req.uri().path(),
            key_present = presented.is_some(),
            "invalid API key"
        );
        return GatewayError::CredentialInvalid.into_response();
    }
    next.run(req).await
}

fn presented_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(key.trim());
    }
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::any, Router};
    use tower::ServiceExt;

    use crate::config::Mode;

    fn config(policy: OriginPolicy, require_origin: bool) -> Arc<GatewayConfig> {
        let mut config = GatewayConfig::new("http://upstream.test", "token");
        config.mode = Mode::Production;
        config.origin_policy = policy;
        config.require_origin = require_origin;
        config.allowed_origins = vec!["https://shop.example.com".into()];
        config.api_key = Some("admin-secret".into());
        Arc::new(config)
    }

    fn origin_app(config: Arc<GatewayConfig>) -> Router {
        Router::new()
            .route("/{*path}", any(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(config, origin_middleware))
    }

    fn key_app(config: Arc<GatewayConfig>) -> Router {
        Router::new()
            .route("/{*path}", any(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(config, api_key_middleware))
    }

    async fn send(app: Router, method: &str, headers: &[(&str, &str)]) -> StatusCode {
        let mut builder = axum::http::Request::builder().method(method).uri("/api/orders");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        app.oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[test]
    fn exact_and_path_prefix_matches() {
        let allowed = vec!["https://shop.example.com".to_string()];
        assert!(origin_allowed("https://shop.example.com", &allowed));
        assert!(origin_allowed("https://shop.example.com/", &allowed));
        assert!(origin_allowed("https://shop.example.com/cart?step=2", &allowed));
        assert!(!origin_allowed("https://shop.example.com.evil.io", &allowed));
        assert!(!origin_allowed("https://evil.io", &allowed));
    }

    #[tokio::test]
    async fn audit_logs_but_allows() {
        let app = origin_app(config(OriginPolicy::Audit, false));
        let status = send(app, "POST", &[("origin", "https://evil.io")]).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn enforce_rejects_foreign_origin_but_not_reads() {
        let cfg = config(OriginPolicy::Enforce, false);
        assert_eq!(
            send(origin_app(Arc::clone(&cfg)), "POST", &[("origin", "https://evil.io")]).await,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            send(origin_app(Arc::clone(&cfg)), "GET", &[("origin", "https://evil.io")]).await,
            StatusCode::OK
        );
        assert_eq!(
            send(origin_app(cfg), "PUT", &[("referer", "https://shop.example.com/checkout")]).await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn missing_origin_passes_unless_required() {
        assert_eq!(
            send(origin_app(config(OriginPolicy::Enforce, false)), "DELETE", &[]).await,
            StatusCode::OK
        );
        assert_eq!(
            send(origin_app(config(OriginPolicy::Enforce, true)), "DELETE", &[]).await,
            StatusCode::FORBIDDEN
        );
    }

    #[tokio::test]
    async fn development_skips_both_checks() {
        let mut cfg = GatewayConfig::new("http://upstream.test", "token");
        cfg.origin_policy = OriginPolicy::Enforce;
        let cfg = Arc::new(cfg);
        assert_eq!(
            send(origin_app(Arc::clone(&cfg)), "POST", &[("origin", "https://evil.io")]).await,
            StatusCode::OK
        );
        assert_eq!(send(key_app(cfg), "GET", &[]).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn api_key_accepted_in_either_header() {
        let cfg = config(OriginPolicy::Audit, false);
        assert_eq!(
            send(key_app(Arc::clone(&cfg)), "GET", &[("x-api-key", "admin-secret")]).await,
            StatusCode::OK
        );
        assert_eq!(
            send(
                key_app(Arc::clone(&cfg)),
                "GET",
                &[("authorization", "Bearer admin-secret")]
            )
            .await,
            StatusCode::OK
        );
        assert_eq!(
            send(key_app(Arc::clone(&cfg)), "GET", &[("x-api-key", "admin-secreT")]).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(send(key_app(cfg), "GET", &[]).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn api_key_prefix_or_extension_is_rejected() {
        let cfg = config(OriginPolicy::Audit, false);
        for given in ["admin-secre", "admin-secret2", "admin-secretadmin-secret"] {
            assert_eq!(
                send(key_app(Arc::clone(&cfg)), "GET", &[("x-api-key", given)]).await,
                StatusCode::UNAUTHORIZED,
                "{given} must not match"
            );
        }
    }

    #[tokio::test]
    async fn no_configured_key_rejects_everything_in_production() {
        let mut cfg = GatewayConfig::new("http://upstream.test", "token");
        cfg.mode = Mode::Production;
        assert_eq!(
            send(key_app(Arc::new(cfg)), "GET", &[("x-api-key", "")]).await,
            StatusCode::UNAUTHORIZED
        );
    }
}
