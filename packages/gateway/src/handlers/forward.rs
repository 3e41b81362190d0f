//! Upstream forwarding handler: `ANY /api/{*path}`.
//!
//! The inbound path is normalised and resolved once by [`ApiRoute::resolve`];
//! the rate limiter classifies with the same resolution. The route class
//! decides whether the response cache is involved:
//!
//! | Inbound | Upstream | Cache |
//! |---------|----------|-------|
//! | `/api/auth/login` | `/auth/login` | never |
//! | `/api/proxy/auth/login` | `/auth/login` | never |
//! | `/api/proxy/products` | `/products` | GET |
//! | `/api/products` | `/products` | GET |
//!
//! Cache keys use the upstream path, so `/api/products` and
//! `/api/proxy/products` share entries and invalidation.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::Response,
};
use bytes::Bytes;
use http_body_util::{BodyExt, LengthLimitError, Limited};
use tracing::debug;

use super::AppState;
use crate::{
    cache::{bypass_requested, CacheEntry, CacheKey, STATUS_HEADER},
    error::GatewayError,
    middleware::rate_limit::ApiRoute,
    proxy::ProxyRequest,
};

/// Largest request body forwarded upstream.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// `ANY /api/{*path}`
pub async fn forward(
    State(state): State<AppState>,
    req: Request<Body>,
) -> Result<Response, GatewayError> {
    let (parts, body) = req.into_parts();
    let ApiRoute {
        class,
        upstream_path: path,
    } = ApiRoute::resolve(parts.uri.path())
        .ok_or_else(|| GatewayError::NotFound("no such route".into()))?;
    let query = parts.uri.query();

    let reads = parts.method == Method::GET || parts.method == Method::HEAD;
    let body = if reads {
        Bytes::new()
    } else {
        read_body(body).await?
    };
    let proxy_req = ProxyRequest::new(
        parts.method.clone(),
        path.clone(),
        query,
        &parts.headers,
        body,
    );

    if parts.method == Method::GET && class.cacheable() {
        if bypass_requested(&parts.headers) {
            let upstream = state.forwarder.forward(proxy_req).await?;
            return Ok(with_cache_status(upstream.into_result()?, "BYPASS"));
        }

        let key = CacheKey::new(&parts.method, &path, query);
        if let Some(entry) = state.cache.get(&key) {
            debug!(key = %key.as_str(), "cache hit");
            return Ok(with_cache_status(cached_response(entry), "HIT"));
        }

        let upstream = state.forwarder.forward(proxy_req).await?;
        state.cache.set(
            &key,
            upstream.status.as_u16(),
            upstream.content_type(),
            upstream.body.clone(),
        );
        return Ok(with_cache_status(upstream.into_result()?, "MISS"));
    }

    let upstream = state.forwarder.forward(proxy_req).await?;
    if !reads && parts.method != Method::OPTIONS && class.cacheable() {
        state.cache.clear(Some(collection_prefix(&path)));
    }
    upstream.into_result()
}

async fn read_body(body: Body) -> Result<Bytes, GatewayError> {
    match Limited::new(body, MAX_BODY_BYTES).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => Err(GatewayError::PayloadTooLarge {
            limit: MAX_BODY_BYTES,
        }),
        Err(e) => Err(GatewayError::BadRequest(format!("unreadable request body: {e}"))),
    }
}

/// The collection a resource path belongs to: `/products/7` → `/products`.
/// A single-segment path is its own collection.
pub fn collection_prefix(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) | None => trimmed,
        Some(i) => &trimmed[..i],
    }
}

fn cached_response(entry: CacheEntry) -> Response {
    let mut resp = Response::new(Body::from(entry.body));
    *resp.status_mut() = StatusCode::from_u16(entry.status).unwrap_or(StatusCode::OK);
    if let Some(v) = entry
        .content_type
        .as_deref()
        .and_then(|ct| HeaderValue::from_str(ct).ok())
    {
        resp.headers_mut().insert(header::CONTENT_TYPE, v);
    }
    resp
}

fn with_cache_status(mut resp: Response, status: &'static str) -> Response {
    resp.headers_mut()
        .insert(STATUS_HEADER, HeaderValue::from_static(status));
    resp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn oversized_body_is_payload_too_large() {
        let err = read_body(Body::from(vec![b'x'; MAX_BODY_BYTES + 1]))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::PayloadTooLarge { .. }));
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let ok = read_body(Body::from(vec![b'x'; MAX_BODY_BYTES])).await.unwrap();
        assert_eq!(ok.len(), MAX_BODY_BYTES);
    }

    #[test]
    fn collection_of_resource_and_collection() {
        assert_eq!(collection_prefix("/products/7"), "/products");
        assert_eq!(collection_prefix("/products"), "/products");
        assert_eq!(collection_prefix("/shops/3/orders/9/"), "/shops/3/orders");
    }
}
