//! Background sweeps.
//!
//! Three independent periodic tasks, owned by the [`crate::Gateway`]
//! lifecycle and stopped through a shared `watch` channel:
//!
//! | Task | Default period | Work |
//! |------|----------------|------|
//! | blocklist | 24 h | purge expired violation records, then unblock stale addresses |
//! | cache | 60 s | drop expired cache entries |
//! | windows | 60 s | drop ended rate-limit buckets |
//!
//! Each sweep is also callable directly so tests can drive it without
//! waiting on a timer. Failures inside a sweep are logged by the component
//! that hit them and never stop the loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info};

use crate::{
    blocklist::Blocklist, cache::ResponseCache, middleware::rate_limit::RateLimiter,
    violations::ViolationTracker,
};

/// Sweep periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepIntervals {
    pub blocklist: Duration,
    pub cache: Duration,
    pub windows: Duration,
}

impl Default for SweepIntervals {
    fn default() -> Self {
        Self {
            blocklist: Duration::from_secs(24 * 60 * 60),
            cache: Duration::from_secs(60),
            windows: Duration::from_secs(60),
        }
    }
}

/// Handles to the services the sweeps operate on.
pub struct Maintenance {
    blocklist: Arc<Blocklist>,
    tracker: Arc<ViolationTracker>,
    cache: Arc<ResponseCache>,
    limiter: Arc<RateLimiter>,
}

impl Maintenance {
    pub fn new(
        blocklist: Arc<Blocklist>,
        tracker: Arc<ViolationTracker>,
        cache: Arc<ResponseCache>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            blocklist,
            tracker,
            cache,
            limiter,
        }
    }

    /// Purge expired violation records, then unblock every address whose
    /// record is gone or older than the block duration. Returns the
    /// unblocked addresses.
    pub async fn run_blocklist_sweep(&self) -> Vec<String> {
        self.tracker.purge_expired();
        let removed = self.blocklist.cleanup(&self.tracker).await;
        if !removed.is_empty() {
            info!(
                removed = removed.len(),
                remaining = self.blocklist.len(),
                "blocklist sweep complete"
            );
        }
        removed
    }

    pub fn run_cache_sweep(&self) -> usize {
        let removed = self.cache.purge_expired();
        if removed > 0 {
            debug!(removed, "expired cache entries purged");
        }
        removed
    }

    pub fn run_window_sweep(&self) -> usize {
        let removed = self.limiter.purge_expired();
        if removed > 0 {
            debug!(removed, "ended rate-limit windows purged");
        }
        removed
    }

    /// Spawn all three loops. Each stops when `shutdown` turns `true` or its
    /// sender is dropped.
    pub fn spawn(
        self: Arc<Self>,
        intervals: SweepIntervals,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        let blocklist = {
            let m = Arc::clone(&self);
            spawn_loop("blocklist", intervals.blocklist, shutdown.clone(), move || {
                let m = Arc::clone(&m);
                async move {
                    m.run_blocklist_sweep().await;
                }
            })
        };
        let cache = {
            let m = Arc::clone(&self);
            spawn_loop("cache", intervals.cache, shutdown.clone(), move || {
                let m = Arc::clone(&m);
                async move {
                    m.run_cache_sweep();
                }
            })
        };
        let windows = {
            let m = Arc::clone(&self);
            spawn_loop("windows", intervals.windows, shutdown, move || {
                let m = Arc::clone(&m);
                async move {
                    m.run_window_sweep();
                }
            })
        };
        vec![blocklist, cache, windows]
    }
}

/// Run `job` every `period` (first run one period from now) until shutdown.
fn spawn_loop<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut job: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(task = name, period_secs = period.as_secs(), "maintenance task started");

        loop {
            tokio::select! {
                _ = ticker.tick() => job().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!(task = name, "maintenance task stopped");
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
