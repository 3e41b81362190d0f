//! Shared helpers for the Edgeward conformance test suite.
//!
//! Provides [`spawn_upstream`], a loopback stand-in for the external API
//! that counts hits and echoes what it received, and [`spawn_gateway`],
//! which binds a gateway on an ephemeral port in front of it. Both run in
//! background `tokio` tasks, so each test gets its own isolated pair.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use edgeward_gateway::{
    maintenance::SweepIntervals, BlocklistStore, Gateway, GatewayConfig, MemoryStore,
};
use serde_json::{json, Map, Value};

// ---------------------------------------------------------------------------
// Mock upstream
// ---------------------------------------------------------------------------

/// Handle to a running mock upstream.
#[derive(Clone)]
pub struct MockUpstream {
    /// Base URL, e.g. `http://127.0.0.1:51234`.
    pub base_url: String,
    hits: Arc<AtomicUsize>,
}

impl MockUpstream {
    /// Requests the upstream has answered so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

/// Start the mock upstream.
///
/// | Route | Response |
/// |-------|----------|
/// | `GET /products` | `{"query": <raw query>, "served": n}` |
/// | `GET /products/{id}` | `{"id": id}` |
/// | `POST /products`, `PUT`/`DELETE /products/{id}` | echoes the JSON body under `received` |
/// | `POST /auth/login` | `{"token": "session"}` |
/// | `GET /headers` | the request headers as a JSON object |
/// | `GET /flaky` | 503 `{"error": "maintenance"}` |
/// | `GET /slow` | 200 after two seconds |
/// | anything else | 404 `{"error": "no such resource"}` |
///
/// # Panics
///
/// Panics if the TCP listener cannot be bound.
pub async fn spawn_upstream() -> MockUpstream {
    let hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route("/products", get(list_products).post(echo))
        .route(
            "/products/{id}",
            get(get_product).put(echo).delete(echo),
        )
        .route("/auth/login", post(login))
        .route("/headers", get(headers))
        .route("/flaky", get(flaky))
        .route("/slow", get(slow))
        .fallback(missing)
        .with_state(Arc::clone(&hits));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("get local addr");
    tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("mock upstream error");
    });

    MockUpstream {
        base_url: format!("http://{addr}"),
        hits,
    }
}

type Hits = State<Arc<AtomicUsize>>;

fn count(hits: &AtomicUsize) -> usize {
    hits.fetch_add(1, Ordering::SeqCst) + 1
}

async fn list_products(State(hits): Hits, RawQuery(query): RawQuery) -> Json<Value> {
    let served = count(&hits);
    Json(json!({ "query": query, "served": served }))
}

async fn get_product(State(hits): Hits, Path(id): Path<String>) -> Json<Value> {
    count(&hits);
    Json(json!({ "id": id }))
}

async fn echo(State(hits): Hits, body: Bytes) -> Json<Value> {
    count(&hits);
    let received: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    Json(json!({ "received": received }))
}

async fn login(State(hits): Hits) -> Json<Value> {
    count(&hits);
    Json(json!({ "token": "session" }))
}

async fn headers(State(hits): Hits, headers: HeaderMap) -> Json<Value> {
    count(&hits);
    let map: Map<String, Value> = headers
        .iter()
        .map(|(k, v)| {
            (
                k.as_str().to_string(),
                Value::String(v.to_str().unwrap_or("").to_string()),
            )
        })
        .collect();
    Json(Value::Object(map))
}

async fn flaky(State(hits): Hits) -> (StatusCode, Json<Value>) {
    count(&hits);
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": "maintenance" })),
    )
}

async fn slow(State(hits): Hits) -> Json<Value> {
    count(&hits);
    tokio::time::sleep(Duration::from_secs(2)).await;
    Json(json!({ "slow": true }))
}

async fn missing(State(hits): Hits) -> (StatusCode, Json<Value>) {
    count(&hits);
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "no such resource" })),
    )
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Development-mode config in front of `upstream`, trusting
/// `X-Forwarded-For` so tests can pick their client address per request.
pub fn test_config(upstream: &MockUpstream) -> GatewayConfig {
    let mut config = GatewayConfig::new(upstream.base_url.clone(), "upstream-secret");
    config.trust_proxy = true;
    config.upstream_timeout = Duration::from_secs(1);
    config
}

/// Start a gateway with an in-memory blocklist and return `(base_url, gateway)`.
///
/// The returned [`Gateway`] shares its services with the server task, so
/// tests can inspect the blocklist, tracker, and cache directly.
pub async fn spawn_gateway(config: GatewayConfig) -> (String, Gateway) {
    spawn_gateway_with_store(config, Arc::new(MemoryStore::new())).await
}

/// Start a gateway over an explicit blocklist store.
///
/// # Panics
///
/// Panics if the listener cannot be bound or the gateway fails to start.
pub async fn spawn_gateway_with_store(
    config: GatewayConfig,
    store: Arc<dyn BlocklistStore>,
) -> (String, Gateway) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("get local addr");

    let gateway = Gateway::init_with_store(config, store, SweepIntervals::default())
        .await
        .expect("gateway init");
    let app = gateway.router();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("conformance gateway error");
    });

    (format!("http://{addr}"), gateway)
}
