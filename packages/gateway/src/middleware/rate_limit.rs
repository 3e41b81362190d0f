//! Per-address fixed-window rate limiting, one window per route class.
//!
//! Requests are sorted into a [`RouteClass`] by path. Each class has its own
//! [`FixedWindow`] with its own length and cap, so a client's auth attempts
//! and its general browsing are counted separately.
//!
//! When a window is exhausted the middleware returns HTTP 429 with a
//! `Retry-After` header and reports the breach to the configured
//! [`ViolationSink`]: once per rejection, twice for the auth class.
//! Every limited response carries `RateLimit-Limit`, `RateLimit-Remaining`
//! and `RateLimit-Reset`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::client::ClientAddr;
use crate::{
    config::{Mode, RateLimitConfig, WindowLimit},
    error::GatewayError,
    violations::ViolationSink,
};

// ---------------------------------------------------------------------------
// RouteClass
// ---------------------------------------------------------------------------

/// Coarse route category with its own rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    General,
    Proxy,
    Auth,
}

impl RouteClass {
    /// Classify a request path. `None` means the path is never limited.
    ///
    /// `/api` paths are classified by the upstream target they resolve to
    /// (see [`ApiRoute::resolve`]), so every alias of an upstream auth
    /// endpoint lands in [`RouteClass::Auth`].
    pub fn for_path(path: &str) -> Option<Self> {
        if path == "/health" {
            return None;
        }
        Some(ApiRoute::resolve(path).map_or(RouteClass::General, |route| route.class))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RouteClass::General => "general",
            RouteClass::Proxy => "proxy",
            RouteClass::Auth => "auth",
        }
    }

    /// Violations registered per rejected request.
    pub fn violation_weight(self) -> u32 {
        match self {
            RouteClass::Auth => 2,
            RouteClass::General | RouteClass::Proxy => 1,
        }
    }

    /// Whether developer tooling may skip this class outside production.
    pub fn dev_tools_may_skip(self) -> bool {
        self == RouteClass::General
    }

    /// Whether GET responses on this class go through the response cache.
    pub fn cacheable(self) -> bool {
        self != RouteClass::Auth
    }

    pub fn rejection_message(self) -> &'static str {
        match self {
            RouteClass::General => "Too many requests from this IP, please try again later.",
            RouteClass::Proxy => "Too many API requests from this IP, please try again later.",
            RouteClass::Auth => "Too many authentication attempts, please try again later.",
        }
    }
}

impl fmt::Display for RouteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ApiRoute
// ---------------------------------------------------------------------------

/// An `/api` request path resolved to the upstream path it will reach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRoute {
    pub class: RouteClass,
    pub upstream_path: String,
}

impl ApiRoute {
    /// Resolve an inbound path. Returns `None` when the normalised path is
    /// not under `/api`.
    ///
    /// Empty and dot segments (including their percent-encoded forms) are
    /// collapsed the way the upstream URL would resolve them. `/api/proxy`
    /// is stripped as the proxy root, the rest as `/api`. Anything whose
    /// upstream path is under `/auth` is the auth class.
    pub fn resolve(path: &str) -> Option<Self> {
        let segments = normalise_segments(path);
        let (first, rest) = segments.split_first()?;
        if *first != "api" {
            return None;
        }

        let (class, rest) = match rest.split_first() {
            Some((&"proxy", tail)) => (RouteClass::Proxy, tail),
            _ => (RouteClass::General, rest),
        };
        let class = if rest.first() == Some(&"auth") {
            RouteClass::Auth
        } else {
            class
        };

        let mut upstream_path = format!("/{}", rest.join("/"));
        if !rest.is_empty() && path.ends_with('/') {
            upstream_path.push('/');
        }
        Some(Self {
            class,
            upstream_path,
        })
    }
}

fn normalise_segments(path: &str) -> Vec<&str> {
    let mut out = Vec::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        match dot_segment(segment) {
            Some(1) => {}
            Some(_) => {
                out.pop();
            }
            None => out.push(segment),
        }
    }
    out
}

/// `Some(1)` for `.`, `Some(2)` for `..`, `%2e` counting as a dot.
fn dot_segment(segment: &str) -> Option<u8> {
    let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
    match decoded.as_str() {
        "." => Some(1),
        ".." => Some(2),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// FixedWindow
// ---------------------------------------------------------------------------

/// Remaining allowance after an accepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allowance {
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

/// Fixed-window per-key counter.
///
/// Each key gets an independent counter that resets `window` after its
/// first request. Thread-safe; share via `Arc`.
pub struct FixedWindow {
    state: RwLock<HashMap<String, Bucket>>,
    max_per_window: u32,
    window: Duration,
}

struct Bucket {
    count: u32,
    window_start: Instant,
}

impl FixedWindow {
    /// `max` of `0` disables this limiter.
    pub fn new(limit: WindowLimit) -> Self {
        Self {
            state: RwLock::new(HashMap::new()),
            max_per_window: limit.max,
            window: limit.window,
        }
    }

    /// Count one request from `key`.
    ///
    /// Returns the remaining allowance, or `Err(retry_after)` if the window is
    /// already full.
    pub fn check(&self, key: &str) -> Result<Allowance, Duration> {
        if self.max_per_window == 0 {
            return Ok(Allowance {
                limit: 0,
                remaining: 0,
                reset_after: Duration::ZERO,
            });
        }

        let now = Instant::now();
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());

        let bucket = state.entry(key.to_string()).or_insert_with(|| Bucket {
            count: 0,
            window_start: now,
        });

        let mut elapsed = now.duration_since(bucket.window_start);
        if elapsed >= self.window {
            bucket.count = 0;
            bucket.window_start = now;
            elapsed = Duration::ZERO;
        }

        let reset_after = self.window.saturating_sub(elapsed);
        if bucket.count >= self.max_per_window {
            return Err(reset_after.max(Duration::from_secs(1)));
        }

        bucket.count += 1;
        Ok(Allowance {
            limit: self.max_per_window,
            remaining: self.max_per_window - bucket.count,
            reset_after,
        })
    }

    pub fn limit(&self) -> u32 {
        self.max_per_window
    }

    /// Drop buckets whose window has ended. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
        let before = state.len();
        state.retain(|_, b| now.duration_since(b.window_start) < self.window);
        before - state.len()
    }
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// The three route-class windows plus the sink that hears about breaches.
pub struct RateLimiter {
    general: FixedWindow,
    proxy: FixedWindow,
    auth: FixedWindow,
    sink: Arc<dyn ViolationSink>,
    mode: Mode,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, sink: Arc<dyn ViolationSink>, mode: Mode) -> Self {
        Self {
            general: FixedWindow::new(config.general),
            proxy: FixedWindow::new(config.proxy),
            auth: FixedWindow::new(config.auth),
            sink,
            mode,
        }
    }

    pub fn window(&self, class: RouteClass) -> &FixedWindow {
        match class {
            RouteClass::General => &self.general,
            RouteClass::Proxy => &self.proxy,
            RouteClass::Auth => &self.auth,
        }
    }

    /// Whether this request skips `class` entirely.
    fn skips(&self, class: RouteClass, headers: &HeaderMap) -> bool {
        !self.mode.is_production() && class.dev_tools_may_skip() && is_dev_tool(headers)
    }

    /// Report a rejection from `client` in `class` to the sink.
    pub async fn report(&self, class: RouteClass, client: &str) {
        for _ in 0..class.violation_weight() {
            self.sink.register_violation(client).await;
        }
    }

    /// Purge ended windows in every class.
    pub fn purge_expired(&self) -> usize {
        self.general.purge_expired() + self.proxy.purge_expired() + self.auth.purge_expired()
    }
}

/// User agents of API tooling used during development.
const DEV_TOOL_AGENTS: [&str; 5] = ["postman", "insomnia", "httpie", "thunder client", "curl/"];

fn is_dev_tool(headers: &HeaderMap) -> bool {
    headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(|ua| {
            let ua = ua.to_ascii_lowercase();
            DEV_TOOL_AGENTS.iter().any(|tool| ua.contains(tool))
        })
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Middleware function
// ---------------------------------------------------------------------------

/// Axum `from_fn_with_state` middleware that enforces the route-class limits.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(class) = RouteClass::for_path(req.uri().path()) else {
        return next.run(req).await;
    };

    if limiter.skips(class, req.headers()) {
        debug!(class = %class, "rate limit skipped for developer tooling");
        return next.run(req).await;
    }

    let client = ClientAddr::of(&req);
    let window = limiter.window(class);

    match window.check(&client) {
        Ok(allowance) => {
            let mut resp = next.run(req).await;
            if allowance.limit > 0 {
                set_headers(
                    resp.headers_mut(),
                    allowance.limit,
                    allowance.remaining,
                    allowance.reset_after,
                );
            }
            resp
        }
        Err(retry_after) => {
            warn!(
                client = %client,
                method = %req.method(),
                path = %req.uri().path(),
                class = %class,
                "rate limit exceeded"
            );
            limiter.report(class, &client).await;
            let mut resp = GatewayError::RateLimited { class, retry_after }.into_response();
            set_headers(resp.headers_mut(), window.limit(), 0, retry_after);
            resp
        }
    }
}

fn set_headers(headers: &mut HeaderMap, limit: u32, remaining: u32, reset_after: Duration) {
    for (name, value) in [
        ("ratelimit-limit", limit.to_string()),
        ("ratelimit-remaining", remaining.to_string()),
        ("ratelimit-reset", reset_after.as_secs().to_string()),
    ] {
        if let Ok(v) = HeaderValue::from_str(&value) {
            headers.insert(name, v);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use axum::{http::StatusCode, routing::any, Router};
    use tower::ServiceExt;

    use crate::middleware::client::client_addr_middleware;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<String>>);

    #[async_trait]
    impl ViolationSink for RecordingSink {
        async fn register_violation(&self, address: &str) {
            self.0.lock().unwrap().push(address.to_string());
        }
    }

    fn app(limiter: Arc<RateLimiter>) -> Router {
        Router::new()
            .route("/{*path}", any(|| async { "ok" }))
            .layer(axum::middleware::from_fn_with_state(limiter, rate_limit_middleware))
            .layer(axum::middleware::from_fn_with_state(true, client_addr_middleware))
    }

    fn limits(max: u32) -> RateLimitConfig {
        RateLimitConfig {
            general: WindowLimit::new(900, max),
            proxy: WindowLimit::new(300, max),
            auth: WindowLimit::new(3600, max),
        }
    }

    async fn hit(app: &Router, path: &str, ip: &str, ua: Option<&str>) -> Response {
        let mut builder = axum::http::Request::builder()
            .uri(path)
            .header("x-forwarded-for", ip);
        if let Some(ua) = ua {
            builder = builder.header("user-agent", ua);
        }
        app.clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[test]
    fn zero_limit_always_passes() {
        let w = FixedWindow::new(WindowLimit::new(60, 0));
        for _ in 0..1000 {
            assert!(w.check("1.2.3.4").is_ok());
        }
    }

    #[tokio::test]
    async fn exceeding_limit_returns_retry_after() {
        let w = FixedWindow::new(WindowLimit::new(60, 3));
        for remaining in [2, 1, 0] {
            assert_eq!(w.check("1.2.3.4").unwrap().remaining, remaining);
        }
        let err = w.check("1.2.3.4").unwrap_err();
        assert!(
            err.as_secs() > 0 && err.as_secs() <= 60,
            "retry-after should be 1-60s, got {err:?}"
        );
    }

    #[tokio::test]
    async fn different_ips_have_independent_buckets() {
        let w = FixedWindow::new(WindowLimit::new(60, 1));
        assert!(w.check("1.1.1.1").is_ok());
        assert!(w.check("2.2.2.2").is_ok());
        assert!(w.check("1.1.1.1").is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn window_resets_after_its_length() {
        let w = FixedWindow::new(WindowLimit::new(60, 1));
        assert!(w.check("1.1.1.1").is_ok());
        assert!(w.check("1.1.1.1").is_err());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(w.purge_expired(), 1);
        assert!(w.check("1.1.1.1").is_ok());
    }

    #[test]
    fn classification_by_path() {
        assert_eq!(RouteClass::for_path("/api/auth/login"), Some(RouteClass::Auth));
        assert_eq!(RouteClass::for_path("/api/proxy/products"), Some(RouteClass::Proxy));
        assert_eq!(RouteClass::for_path("/api/proxyish"), Some(RouteClass::General));
        assert_eq!(RouteClass::for_path("/admin/blocklist"), Some(RouteClass::General));
        assert_eq!(RouteClass::for_path("/health"), None);
    }

    #[test]
    fn auth_aliases_resolve_to_auth_class() {
        for path in [
            "/api/auth/login",
            "/api/proxy/auth/login",
            "/api//auth/login",
            "/api/proxy//auth/login",
            "/api/./auth/login",
            "/api/products/../auth/login",
            "/api/proxy/x/%2E%2e/auth/login",
        ] {
            let route = ApiRoute::resolve(path).unwrap();
            assert_eq!(route.class, RouteClass::Auth, "{path}");
            assert_eq!(route.upstream_path, "/auth/login", "{path}");
            assert_eq!(RouteClass::for_path(path), Some(RouteClass::Auth), "{path}");
        }
    }

    #[test]
    fn resolve_strips_class_roots() {
        let route = ApiRoute::resolve("/api/proxy/products").unwrap();
        assert_eq!((route.class, route.upstream_path.as_str()), (RouteClass::Proxy, "/products"));
        let route = ApiRoute::resolve("/api/products/7/").unwrap();
        assert_eq!(
            (route.class, route.upstream_path.as_str()),
            (RouteClass::General, "/products/7/")
        );
        assert_eq!(ApiRoute::resolve("/api/proxy").unwrap().upstream_path, "/");
        assert_eq!(ApiRoute::resolve("/api/proxyish").unwrap().class, RouteClass::General);
        assert_eq!(ApiRoute::resolve("/api/../admin/blocklist"), None);
        assert_eq!(ApiRoute::resolve("/admin/blocklist"), None);
    }

    #[tokio::test]
    async fn hundred_and_first_general_request_is_rejected_once() {
        let sink = Arc::new(RecordingSink::default());
        let limiter = Arc::new(RateLimiter::new(
            RateLimitConfig::default(),
            Arc::clone(&sink) as Arc<dyn ViolationSink>,
            Mode::Production,
        ));
        let app = app(limiter);

        for i in 1..=100 {
            let resp = hit(&app, "/api/products", "203.0.113.1", None).await;
            assert_eq!(resp.status(), StatusCode::OK, "request {i} should pass");
        }
        let resp = hit(&app, "/api/products", "203.0.113.1", None).await;
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(resp.headers()["ratelimit-remaining"], "0");
        assert!(resp.headers().contains_key("retry-after"));
        assert_eq!(sink.0.lock().unwrap().as_slice(), ["203.0.113.1"]);
    }

    #[tokio::test]
    async fn auth_rejection_counts_double() {
        let sink = Arc::new(RecordingSink::default());
        let limiter = Arc::new(RateLimiter::new(
            RateLimitConfig::default(),
            Arc::clone(&sink) as Arc<dyn ViolationSink>,
            Mode::Production,
        ));
        let app = app(limiter);

        for _ in 0..5 {
            assert_eq!(
                hit(&app, "/api/auth/login", "198.51.100.2", None).await.status(),
                StatusCode::OK
            );
        }
        let resp = hit(&app, "/api/auth/login", "198.51.100.2", None).await;
        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(sink.0.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn auth_aliases_share_the_auth_window() {
        let sink = Arc::new(RecordingSink::default());
        let limiter = Arc::new(RateLimiter::new(
            RateLimitConfig::default(),
            Arc::clone(&sink) as Arc<dyn ViolationSink>,
            Mode::Development,
        ));
        let app = app(limiter);
        let postman = Some("PostmanRuntime/7.36.0");

        for path in ["/api/proxy/auth/login", "/api//auth/login"] {
            let ip = if path.contains("proxy") { "198.51.100.3" } else { "198.51.100.4" };
            for _ in 0..5 {
                assert_eq!(hit(&app, path, ip, postman).await.status(), StatusCode::OK);
            }
            assert_eq!(
                hit(&app, path, ip, postman).await.status(),
                StatusCode::TOO_MANY_REQUESTS,
                "{path}"
            );
        }
        assert_eq!(sink.0.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn classes_do_not_share_windows() {
        let limiter = Arc::new(RateLimiter::new(
            limits(1),
            Arc::new(RecordingSink::default()),
            Mode::Production,
        ));
        let app = app(limiter);

        assert_eq!(hit(&app, "/api/products", "10.0.0.5", None).await.status(), StatusCode::OK);
        assert_eq!(hit(&app, "/api/proxy/items", "10.0.0.5", None).await.status(), StatusCode::OK);
        assert_eq!(hit(&app, "/api/auth/login", "10.0.0.5", None).await.status(), StatusCode::OK);
        assert_eq!(
            hit(&app, "/api/products", "10.0.0.5", None).await.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[tokio::test]
    async fn dev_tools_skip_only_general_outside_production() {
        let limiter = Arc::new(RateLimiter::new(
            limits(1),
            Arc::new(RecordingSink::default()),
            Mode::Development,
        ));
        let app = app(limiter);
        let postman = Some("PostmanRuntime/7.36.0");

        for _ in 0..3 {
            assert_eq!(
                hit(&app, "/api/products", "10.0.0.6", postman).await.status(),
                StatusCode::OK
            );
        }
        assert_eq!(hit(&app, "/api/proxy/x", "10.0.0.6", postman).await.status(), StatusCode::OK);
        assert_eq!(
            hit(&app, "/api/proxy/x", "10.0.0.6", postman).await.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[tokio::test]
    async fn dev_tools_do_not_skip_in_production() {
        let limiter = Arc::new(RateLimiter::new(
            limits(1),
            Arc::new(RecordingSink::default()),
            Mode::Production,
        ));
        let app = app(limiter);
        let curl = Some("curl/8.5.0");

        assert_eq!(hit(&app, "/api/products", "10.0.0.7", curl).await.status(), StatusCode::OK);
        assert_eq!(
            hit(&app, "/api/products", "10.0.0.7", curl).await.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }
}
