//! Gateway lifecycle.
//!
//! [`Gateway::init`] constructs every service once, wires them together,
//! and starts the maintenance sweeps. [`Gateway::shutdown`] stops the
//! sweeps and waits for them. Nothing here is process-global: two gateways
//! in one process (as in the conformance suite) share no state.

use std::sync::Arc;

use axum::Router;
use chrono::Utc;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{error, info};

use crate::{
    blocklist::Blocklist,
    cache::ResponseCache,
    config::GatewayConfig,
    handlers::AppState,
    maintenance::{Maintenance, SweepIntervals},
    middleware::rate_limit::RateLimiter,
    proxy::{ForwardError, Forwarder},
    router::build_router,
    storage::{self, BlocklistStore, StoreError},
    violations::{NoopViolationSink, ViolationPolicy, ViolationSink, ViolationTracker},
};

/// Errors that prevent the gateway from starting.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("failed to open blocklist store: {0}")]
    Store(#[from] StoreError),

    #[error("failed to set up upstream forwarding: {0}")]
    Forwarder(#[from] ForwardError),
}

/// A running gateway: shared services plus the maintenance tasks.
pub struct Gateway {
    state: AppState,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Gateway {
    /// Build the gateway with the store selected by `config.blocklist`.
    pub async fn init(config: GatewayConfig) -> Result<Self, InitError> {
        let store = storage::open(&config.blocklist)?;
        Self::init_with_store(config, store, SweepIntervals::default()).await
    }

    /// Build the gateway around an explicit store and sweep periods.
    pub async fn init_with_store(
        config: GatewayConfig,
        store: Arc<dyn BlocklistStore>,
        intervals: SweepIntervals,
    ) -> Result<Self, InitError> {
        let config = Arc::new(config);
        let forwarder = Arc::new(Forwarder::new(&config)?);

        let blocklist = Arc::new(Blocklist::load(store).await);
        let tracker = Arc::new(ViolationTracker::new(
            Arc::clone(&blocklist),
            ViolationPolicy::default(),
            !config.mode.is_production(),
        ));

        // Persisted blocks get a fresh record so they last a full block
        // duration from this start-up. The store keeps no timestamps, so a
        // gateway restarted more often than the block duration never lets
        // a persisted block expire; unblock those through the admin API.
        let now = Utc::now();
        for address in blocklist.blocked_ips() {
            tracker.mark_blocked_at(&address, now);
        }

        let sink: Arc<dyn ViolationSink> = if config.blocking_enabled {
            Arc::clone(&tracker) as Arc<dyn ViolationSink>
        } else {
            info!("blocking disabled: rate-limit violations are not tracked");
            Arc::new(NoopViolationSink)
        };
        let limiter = Arc::new(RateLimiter::new(config.rate_limits, sink, config.mode));
        let cache = Arc::new(ResponseCache::new(config.cache_ttl));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tasks = Arc::new(Maintenance::new(
            Arc::clone(&blocklist),
            Arc::clone(&tracker),
            Arc::clone(&cache),
            Arc::clone(&limiter),
        ))
        .spawn(intervals, shutdown_rx);

        info!(
            mode = config.mode.as_str(),
            upstream = %config.upstream_url,
            blocked = blocklist.len(),
            "gateway initialised"
        );

        Ok(Self {
            state: AppState {
                config,
                blocklist,
                tracker,
                limiter,
                cache,
                forwarder,
            },
            shutdown_tx,
            tasks,
        })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The full application router over this gateway's services.
    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }

    /// Stop the maintenance tasks and wait for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                error!("maintenance task ended abnormally: {e}");
            }
        }
        info!("gateway shut down");
    }
}
