//! Client address resolution.
//!
//! The address is resolved once per request and stored as a [`ClientAddr`]
//! request extension, so every later layer agrees on the key.
//!
//! Order: `X-Forwarded-For` (leftmost) → `X-Real-IP` when the gateway is
//! configured to trust a reverse proxy, then the TCP peer address, then the
//! shared `"unknown"` bucket.

use std::net::{IpAddr, SocketAddr};

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};

/// The resolved client address of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientAddr(pub String);

impl ClientAddr {
    /// The address stored on `req`, or `"unknown"` if the client layer did
    /// not run.
    pub fn of<B>(req: &axum::http::Request<B>) -> String {
        req.extensions()
            .get::<ClientAddr>()
            .map(|c| c.0.clone())
            .unwrap_or_else(|| UNKNOWN.to_string())
    }
}

const UNKNOWN: &str = "unknown";

/// Middleware that resolves and attaches [`ClientAddr`].
pub async fn client_addr_middleware(
    State(trust_proxy): State<bool>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let addr = resolve(&req, trust_proxy);
    req.extensions_mut().insert(ClientAddr(addr));
    next.run(req).await
}

fn resolve(req: &Request<Body>, trust_proxy: bool) -> String {
    if trust_proxy {
        // X-Forwarded-For: client, proxy1, proxy2; leftmost is the real client.
        if let Some(ip) = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.split(',').next())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            return canonical(ip);
        }

        // X-Real-IP: set by nginx/Caddy.
        if let Some(ip) = req
            .headers()
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            return canonical(ip);
        }
    }

    if let Some(ConnectInfo(peer)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        return peer.ip().to_canonical().to_string();
    }

    UNKNOWN.to_string()
}

/// Collapse IPv4-mapped IPv6 (`::ffff:1.2.3.4`) to plain IPv4; leave
/// anything unparseable as given.
fn canonical(raw: &str) -> String {
    match raw.parse::<IpAddr>() {
        Ok(ip) => ip.to_canonical().to_string(),
        Err(_) => raw.to_string(),
    }
}
