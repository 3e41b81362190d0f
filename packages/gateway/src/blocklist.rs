//! Persistent IP blocklist.
//!
//! The hot path only ever reads the in-memory set ([`Blocklist::is_blocked`]).
//! Every mutation rewrites the durable store with the full set before
//! returning. A failed write is logged and the in-memory decision stands:
//! an address we know is bad stays blocked even if the disk is not
//! cooperating.
//!
//! Start-up is the opposite: unreadable or corrupt storage is logged and
//! treated as an empty blocklist, so a damaged file cannot lock every
//! client out.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::storage::BlocklistStore;
use crate::violations::ViolationTracker;

/// The set of blocked client addresses, mirrored to a [`BlocklistStore`].
pub struct Blocklist {
    entries: RwLock<HashSet<String>>,
    store: Arc<dyn BlocklistStore>,
    /// Serialises snapshot-and-save so saves land in mutation order.
    persist_lock: tokio::sync::Mutex<()>,
}

impl Blocklist {
    /// Load the blocklist from `store`.
    ///
    /// A store with nothing persisted is initialised with an empty set.
    /// Errors are logged and yield an empty blocklist.
    pub async fn load(store: Arc<dyn BlocklistStore>) -> Self {
        let entries = match store.load().await {
            Ok(Some(addresses)) => {
                info!(
                    count = addresses.len(),
                    "blocklist: loaded from {}",
                    store.describe()
                );
                addresses.into_iter().collect()
            }
            Ok(None) => {
                info!("blocklist: no saved state, creating {}", store.describe());
                if let Err(e) = store.save(&[]).await {
                    error!("blocklist: failed to create {}: {e}", store.describe());
                }
                HashSet::new()
            }
            Err(e) => {
                error!(
                    "blocklist: failed to read {}: {e}; starting with an empty blocklist",
                    store.describe()
                );
                HashSet::new()
            }
        };

        Self {
            entries: RwLock::new(entries),
            store,
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Whether `address` is blocked.
    pub fn is_blocked(&self, address: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .contains(address)
    }

    /// Block `address` and persist. Returns `false` (and writes nothing) if
    /// it was already blocked.
    pub async fn add(&self, address: &str) -> bool {
        let inserted = self
            .entries
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(address.to_string());
        if inserted {
            self.persist().await;
        }
        inserted
    }

    /// Unblock `address` and persist. Returns whether it was blocked.
    pub async fn remove(&self, address: &str) -> bool {
        let removed = self
            .entries
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(address);
        if removed {
            info!(client = %address, "address removed from blocklist");
            self.persist().await;
        }
        removed
    }

    /// All blocked addresses, sorted.
    pub fn blocked_ips(&self) -> Vec<String> {
        let mut ips: Vec<String> = self
            .entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .cloned()
            .collect();
        ips.sort();
        ips
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unblock every address whose violation record is gone or older than
    /// the block duration, then persist once. Returns the removed addresses.
    pub async fn cleanup(&self, tracker: &ViolationTracker) -> Vec<String> {
        self.cleanup_at(tracker, Utc::now()).await
    }

    pub async fn cleanup_at(&self, tracker: &ViolationTracker, now: DateTime<Utc>) -> Vec<String> {
        let block_duration = tracker.policy().block_duration;
        let stale: Vec<String> = self
            .blocked_ips()
            .into_iter()
            .filter(|address| match tracker.last_violation_at(address) {
                None => true,
                Some(last) => now - last > block_duration,
            })
            .collect();

        let mut removed = Vec::with_capacity(stale.len());
        for address in stale {
            let gone = self
                .entries
                .write()
                .unwrap_or_else(|p| p.into_inner())
                .remove(&address);
            if gone {
                removed.push(address);
            }
        }

        if !removed.is_empty() {
            self.persist().await;
            info!(removed = removed.len(), "blocklist cleanup unblocked stale addresses");
        }
        removed
    }

    /// Write the current set to the store. Failures are logged only.
    async fn persist(&self) {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.blocked_ips();
        if let Err(e) = self.store.save(&snapshot).await {
            warn!(
                "blocklist: failed to persist {} entries to {}: {e}; keeping in-memory state",
                snapshot.len(),
                self.store.describe()
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
