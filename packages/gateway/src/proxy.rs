//! Upstream forwarding.
//!
//! [`Forwarder`] owns a pooled [`reqwest::Client`] with an explicit timeout,
//! the upstream base URL, and the service credential. It turns an inbound
//! request into a [`ProxyRequest`] (method kept, body only for non-GET/HEAD,
//! query only for GET, headers sanitised) and issues it.
//!
//! Upstream failures are never retried here; retry policy belongs to the
//! caller.

use std::time::{Duration, Instant};

use axum::{
    body::Body,
    http::{header, header::InvalidHeaderValue, HeaderMap, HeaderValue, Method, StatusCode},
    response::Response,
};
use bytes::Bytes;
use reqwest::Client;
use tracing::{debug, error};

use crate::{config::GatewayConfig, error::GatewayError};

/// Inbound headers never forwarded upstream.
const STRIPPED_REQUEST_HEADERS: [&str; 12] = [
    "host",
    "authorization",
    "connection",
    "keep-alive",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
    "x-api-key",
    crate::cache::BYPASS_HEADER,
];

/// Upstream response headers not relayed to the client.
const STRIPPED_RESPONSE_HEADERS: [&str; 7] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

// ---------------------------------------------------------------------------
// ForwardError
// ---------------------------------------------------------------------------

/// Errors that can occur while calling the upstream.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    /// Connect failure, timeout, or broken response stream.
    #[error("upstream request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The service token cannot be sent as a header value.
    #[error("service credential is not a valid header value")]
    Credential(#[from] InvalidHeaderValue),
}

impl ForwardError {
    pub fn is_timeout(&self) -> bool {
        match self {
            ForwardError::Transport(e) => e.is_timeout(),
            ForwardError::Credential(_) => false,
        }
    }
}

// ---------------------------------------------------------------------------
// ProxyRequest / UpstreamResponse
// ---------------------------------------------------------------------------

/// One upstream call, built from an inbound request.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    /// Upstream path, starting with `/`.
    pub path: String,
    /// Raw query string, forwarded only for GET.
    pub query: Option<String>,
    pub headers: HeaderMap,
    /// Forwarded only for non-GET/HEAD.
    pub body: Option<Bytes>,
}

impl ProxyRequest {
    pub fn new(
        method: Method,
        path: impl Into<String>,
        query: Option<&str>,
        inbound_headers: &HeaderMap,
        body: Bytes,
    ) -> Self {
        let reads = method == Method::GET || method == Method::HEAD;
        let get = method == Method::GET;
        Self {
            path: path.into(),
            query: query
                .filter(|q| get && !q.is_empty())
                .map(str::to_string),
            headers: sanitize_headers(inbound_headers),
            body: (!reads).then_some(body),
            method,
        }
    }
}

/// Copy of `inbound` without hop-by-hop, host, or credential headers.
pub fn sanitize_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        if !STRIPPED_REQUEST_HEADERS.contains(&name.as_str()) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// A fully read upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl UpstreamResponse {
    pub fn content_type(&self) -> Option<String> {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    /// Body as JSON, falling back to a JSON string (or `null` when empty).
    pub fn body_json(&self) -> serde_json::Value {
        if self.body.is_empty() {
            return serde_json::Value::Null;
        }
        serde_json::from_slice(&self.body).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&self.body).into_owned())
        })
    }

    /// Success responses pass through verbatim; anything else becomes a
    /// [`GatewayError::Upstream`] carrying the upstream status and body.
    pub fn into_result(self) -> Result<Response, GatewayError> {
        if !self.status.is_success() {
            return Err(GatewayError::Upstream {
                status: self.status,
                body: self.body_json(),
            });
        }

        let mut resp = Response::new(Body::from(self.body));
        *resp.status_mut() = self.status;
        for (name, value) in &self.headers {
            if !STRIPPED_RESPONSE_HEADERS.contains(&name.as_str()) {
                resp.headers_mut().append(name.clone(), value.clone());
            }
        }
        Ok(resp)
    }
}

// ---------------------------------------------------------------------------
// Forwarder
// ---------------------------------------------------------------------------

/// Issues requests against the upstream API.
///
/// `reqwest::Client` pools connections internally, so one `Forwarder` is
/// shared by every request.
pub struct Forwarder {
    client: Client,
    base_url: String,
    credential: HeaderValue,
    expose_errors: bool,
}

impl Forwarder {
    /// Build from configuration with a client honouring the upstream timeout.
    pub fn new(config: &GatewayConfig) -> Result<Self, ForwardError> {
        let client = Client::builder()
            .timeout(config.upstream_timeout)
            .connect_timeout(config.upstream_timeout.min(Duration::from_secs(3)))
            .build()?;
        Self::with_client(
            client,
            &config.upstream_url,
            &config.upstream_token,
            !config.mode.is_production(),
        )
    }

    /// # Arguments
    ///
    /// * `client`: pre-configured `reqwest::Client` (e.g. with a timeout).
    /// * `base_url`: upstream base URL; a trailing `/` is ignored.
    /// * `token`: service credential, sent as `Authorization: ApiKey <token>`.
    /// * `expose_errors`: include transport error text in 500 responses.
    pub fn with_client(
        client: Client,
        base_url: &str,
        token: &str,
        expose_errors: bool,
    ) -> Result<Self, ForwardError> {
        let mut credential = HeaderValue::from_str(&format!("ApiKey {token}"))?;
        credential.set_sensitive(true);
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credential,
            expose_errors,
        })
    }

    /// `<base>/<path>` with exactly one slash between the two.
    pub fn target_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send `req` upstream and read the whole response.
    pub async fn send(&self, req: ProxyRequest) -> Result<UpstreamResponse, ForwardError> {
        let mut url = self.target_url(&req.path);
        if let Some(query) = &req.query {
            url.push('?');
            url.push_str(query);
        }

        let mut headers = req.headers;
        headers.insert(header::AUTHORIZATION, self.credential.clone());

        let mut builder = self
            .client
            .request(req.method.clone(), &url)
            .headers(headers);
        if let Some(body) = req.body {
            builder = builder.body(body);
        }

        let started = Instant::now();
        let response = builder.send().await?;
        let status = response.status();
        let resp_headers = response.headers().clone();
        let body = response.bytes().await?;

        debug!(
            method = %req.method,
            path = %req.path,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "upstream call"
        );

        Ok(UpstreamResponse {
            status,
            headers: resp_headers,
            body,
        })
    }

    /// Send `req` and map the outcome to what the client should see.
    ///
    /// Returns the successful [`UpstreamResponse`] (so the caller can cache
    /// it) or the client-facing error.
    pub async fn forward(&self, req: ProxyRequest) -> Result<UpstreamResponse, GatewayError> {
        let method = req.method.clone();
        let path = req.path.clone();
        match self.send(req).await {
            Ok(resp) if resp.status.is_success() => Ok(resp),
            Ok(resp) => {
                debug!(
                    method = %method,
                    path = %path,
                    status = resp.status.as_u16(),
                    "upstream error relayed"
                );
                Err(GatewayError::Upstream {
                    status: resp.status,
                    body: resp.body_json(),
                })
            }
            Err(e) => {
                error!(
                    method = %method,
                    path = %path,
                    timeout = e.is_timeout(),
                    "external API unreachable: {e}"
                );
                Err(GatewayError::UpstreamUnreachable {
                    detail: self.expose_errors.then(|| e.to_string()),
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
