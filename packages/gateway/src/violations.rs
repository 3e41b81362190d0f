//! Per-address violation tracking and escalation to the blocklist.
//!
//! The rate limiter reports every rejected request to a [`ViolationSink`].
//! The production sink is [`ViolationTracker`], which keeps a rolling counter
//! per client address and blocks the address once the counter reaches the
//! threshold. Gateways running without blocking wire [`NoopViolationSink`]
//! instead, so the limiter never has to ask whether blocking exists.
//!
//! Counters only go up. A record that has not been touched for its retention
//! period is dropped whole by [`ViolationTracker::purge_expired`], or reset on
//! the next violation if the sweep has not reached it yet.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::blocklist::Blocklist;

/// Violations within the TTL that trigger a block.
pub const VIOLATION_THRESHOLD: u32 = 5;

// ---------------------------------------------------------------------------
// ViolationSink
// ---------------------------------------------------------------------------

/// Receiver of rate-limit breaches.
#[async_trait]
pub trait ViolationSink: Send + Sync + 'static {
    /// Record one breach by `address`.
    async fn register_violation(&self, address: &str);
}

/// Sink for gateways that rate limit without escalating to blocks.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopViolationSink;

#[async_trait]
impl ViolationSink for NoopViolationSink {
    async fn register_violation(&self, address: &str) {
        debug!(client = %address, "violation ignored: blocking disabled");
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Thresholds and retention periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViolationPolicy {
    pub threshold: u32,
    /// How long an untouched record below the threshold is kept.
    pub ttl: Duration,
    /// How long an untouched record at or above the threshold is kept, and
    /// therefore how long a block lasts without new violations.
    pub block_duration: Duration,
}

impl Default for ViolationPolicy {
    fn default() -> Self {
        Self {
            threshold: VIOLATION_THRESHOLD,
            ttl: Duration::hours(24),
            block_duration: Duration::days(7),
        }
    }
}

impl ViolationPolicy {
    fn retention(&self, record: &ViolationRecord) -> Duration {
        if record.count >= self.threshold {
            self.block_duration
        } else {
            self.ttl
        }
    }

    fn is_expired(&self, record: &ViolationRecord, now: DateTime<Utc>) -> bool {
        now - record.last_violation_at > self.retention(record)
    }
}

// ---------------------------------------------------------------------------
// ViolationRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViolationRecord {
    pub address: String,
    pub count: u32,
    pub last_violation_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ViolationTracker
// ---------------------------------------------------------------------------

/// In-memory violation counters, escalating to a [`Blocklist`].
pub struct ViolationTracker {
    records: RwLock<HashMap<String, ViolationRecord>>,
    blocklist: Arc<Blocklist>,
    policy: ViolationPolicy,
    /// Loopback addresses never accrue violations (development mode).
    exempt_loopback: bool,
}

impl ViolationTracker {
    pub fn new(blocklist: Arc<Blocklist>, policy: ViolationPolicy, exempt_loopback: bool) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            blocklist,
            policy,
            exempt_loopback,
        }
    }

    pub fn policy(&self) -> &ViolationPolicy {
        &self.policy
    }

    /// Record a violation at `now`, blocking the address if it crosses the
    /// threshold.
    pub async fn register_violation_at(&self, address: &str, now: DateTime<Utc>) {
        if self.exempt_loopback && is_loopback(address) {
            debug!(client = %address, "loopback address exempt from violations");
            return;
        }

        let count = {
            let mut records = self.records.write().unwrap_or_else(|p| p.into_inner());
            let record = records
                .entry(address.to_string())
                .or_insert_with(|| ViolationRecord {
                    address: address.to_string(),
                    count: 0,
                    last_violation_at: now,
                });
            if self.policy.is_expired(record, now) {
                record.count = 0;
            }
            record.count = record.count.saturating_add(1);
            record.last_violation_at = now;
            record.count
        };

        warn!(client = %address, count, "rate limit violation recorded");

        if count >= self.policy.threshold && self.blocklist.add(address).await {
            warn!(client = %address, count, "address blocked after repeated violations");
        }
    }

    /// The live record for `address`, if any.
    pub fn get(&self, address: &str) -> Option<ViolationRecord> {
        self.get_at(address, Utc::now())
    }

    pub fn get_at(&self, address: &str, now: DateTime<Utc>) -> Option<ViolationRecord> {
        let records = self.records.read().unwrap_or_else(|p| p.into_inner());
        records
            .get(address)
            .filter(|r| !self.policy.is_expired(r, now))
            .cloned()
    }

    /// Time of the last recorded violation, whether or not the record has
    /// been swept yet.
    pub fn last_violation_at(&self, address: &str) -> Option<DateTime<Utc>> {
        let records = self.records.read().unwrap_or_else(|p| p.into_inner());
        records.get(address).map(|r| r.last_violation_at)
    }

    /// Ensure `address` has a record at the block threshold stamped `now`.
    ///
    /// Used for explicit blocks and for addresses loaded from the durable
    /// blocklist, so the daily cleanup keeps them for the full block
    /// duration.
    pub fn mark_blocked_at(&self, address: &str, now: DateTime<Utc>) {
        let mut records = self.records.write().unwrap_or_else(|p| p.into_inner());
        let record = records
            .entry(address.to_string())
            .or_insert_with(|| ViolationRecord {
                address: address.to_string(),
                count: 0,
                last_violation_at: now,
            });
        record.count = record.count.max(self.policy.threshold);
        record.last_violation_at = now;
    }

    /// Drop the record for `address`. Returns whether one existed.
    pub fn forget(&self, address: &str) -> bool {
        let mut records = self.records.write().unwrap_or_else(|p| p.into_inner());
        records.remove(address).is_some()
    }

    /// Delete every record past its retention. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now())
    }

    pub fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut records = self.records.write().unwrap_or_else(|p| p.into_inner());
        let before = records.len();
        records.retain(|_, r| !self.policy.is_expired(r, now));
        let removed = before - records.len();
        if removed > 0 {
            info!(removed, "expired violation records purged");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ViolationSink for ViolationTracker {
    async fn register_violation(&self, address: &str) {
        self.register_violation_at(address, Utc::now()).await;
    }
}

fn is_loopback(address: &str) -> bool {
    address
        .parse::<IpAddr>()
        .map(|ip| ip.to_canonical().is_loopback())
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;

    async fn tracker(exempt_loopback: bool) -> (ViolationTracker, Arc<Blocklist>) {
        let blocklist = Arc::new(Blocklist::load(Arc::new(MemoryStore::new())).await);
        let tracker = ViolationTracker::new(
            Arc::clone(&blocklist),
            ViolationPolicy::default(),
            exempt_loopback,
        );
        (tracker, blocklist)
    }

    #[tokio::test]
    async fn five_violations_block_the_address() {
        let (tracker, blocklist) = tracker(false).await;
        let now = Utc::now();
        for i in 0..4 {
            tracker
                .register_violation_at("203.0.113.9", now + Duration::minutes(i))
                .await;
        }
        assert!(!blocklist.is_blocked("203.0.113.9"));

        tracker
            .register_violation_at("203.0.113.9", now + Duration::minutes(5))
            .await;
        assert!(blocklist.is_blocked("203.0.113.9"));
        assert_eq!(tracker.get_at("203.0.113.9", now).unwrap().count, 5);
    }

    #[tokio::test]
    async fn count_restarts_after_ttl() {
        let (tracker, blocklist) = tracker(false).await;
        let start = Utc::now();
        for _ in 0..4 {
            tracker.register_violation_at("198.51.100.1", start).await;
        }
        let later = start + Duration::hours(25);
        assert!(tracker.get_at("198.51.100.1", later).is_none());

        tracker.register_violation_at("198.51.100.1", later).await;
        assert_eq!(tracker.get_at("198.51.100.1", later).unwrap().count, 1);
        assert!(!blocklist.is_blocked("198.51.100.1"));
    }

    #[tokio::test]
    async fn loopback_exempt_only_when_configured() {
        let (dev, dev_blocklist) = tracker(true).await;
        for _ in 0..10 {
            dev.register_violation("127.0.0.1").await;
            dev.register_violation("::1").await;
        }
        assert!(dev.is_empty());
        assert!(dev_blocklist.blocked_ips().is_empty());

        let (prod, _) = tracker(false).await;
        prod.register_violation("127.0.0.1").await;
        assert_eq!(prod.get("127.0.0.1").unwrap().count, 1);
    }

    #[tokio::test]
    async fn purge_keeps_blocked_records_for_block_duration() {
        let (tracker, _) = tracker(false).await;
        let start = Utc::now();
        tracker.register_violation_at("10.1.1.1", start).await;
        tracker.mark_blocked_at("10.2.2.2", start);

        assert_eq!(tracker.purge_expired_at(start + Duration::days(2)), 1);
        assert!(tracker.last_violation_at("10.2.2.2").is_some());

        assert_eq!(tracker.purge_expired_at(start + Duration::days(8)), 1);
        assert!(tracker.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_violations_block_once_with_one_save() {
        let store = Arc::new(MemoryStore::new());
        let blocklist = Arc::new(
            Blocklist::load(Arc::clone(&store) as Arc<dyn crate::storage::BlocklistStore>).await,
        );
        let tracker = Arc::new(ViolationTracker::new(
            Arc::clone(&blocklist),
            ViolationPolicy::default(),
            false,
        ));
        let saves_after_init = store.save_count();

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                tokio::spawn(async move { tracker.register_violation("203.0.113.50").await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert!(blocklist.is_blocked("203.0.113.50"));
        assert_eq!(tracker.get("203.0.113.50").unwrap().count, 50);
        assert_eq!(store.save_count(), saves_after_init + 1);
        assert_eq!(store.snapshot(), Some(vec!["203.0.113.50".to_string()]));
    }

    #[tokio::test]
    async fn noop_sink_does_nothing() {
        NoopViolationSink.register_violation("10.0.0.1").await;
    }

    #[test]
    fn mapped_ipv4_loopback_is_loopback() {
        assert!(is_loopback("::ffff:127.0.0.1"));
        assert!(!is_loopback("unknown"));
        assert!(!is_loopback("192.0.2.1"));
    }
}
