//! `edgeward`: edge API gateway in front of a single upstream API.
//!
//! # Quick start
//!
//! ```sh
//! # Development mode, flat-file blocklist under ./data:
//! EDGEWARD_UPSTREAM_URL=https://api.example.com \
//! EDGEWARD_UPSTREAM_TOKEN=... edgeward
//!
//! # Production behind a reverse proxy, SQLite blocklist:
//! EDGEWARD_MODE=production EDGEWARD_TRUST_PROXY=true \
//! EDGEWARD_BLOCKLIST_DB=./data/gateway.db EDGEWARD_API_KEY=... edgeward
//! ```
//!
//! # Environment variables
//!
//! See [`GatewayConfig::from_env`] for the full list.

use std::net::SocketAddr;

use edgeward_gateway::{Gateway, GatewayConfig};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "edgeward_gateway=info,tower_http=info".into()),
        )
        .init();

    let config = match GatewayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("configuration error: {e}");
            std::process::exit(2);
        }
    };
    tracing::debug!(?config, "configuration loaded");
    let bind_addr = config.bind_addr;

    let gateway = match Gateway::init(config).await {
        Ok(gateway) => gateway,
        Err(e) => {
            tracing::error!("failed to start gateway: {e}");
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("failed to bind {bind_addr}: {e}");
            std::process::exit(1);
        }
    };
    tracing::info!("listening on {bind_addr}");

    let app = gateway.router();
    if let Err(e) = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    {
        tracing::error!("server error: {e}");
    }

    gateway.shutdown().await;
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
