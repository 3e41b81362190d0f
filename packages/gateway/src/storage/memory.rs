//! In-memory blocklist store.
//!
//! Nothing survives the process. Keeps a count of saves so tests can assert
//! how often the gateway persisted.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use super::{BlocklistStore, StoreError};

/// Thread-safe, in-memory implementation of [`BlocklistStore`].
pub struct MemoryStore {
    saved: RwLock<Option<Vec<String>>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            saved: RwLock::new(None),
            saves: AtomicUsize::new(0),
        }
    }

    /// A store that already holds `addresses`, as if persisted by an earlier run.
    pub fn with_addresses(addresses: Vec<String>) -> Self {
        Self {
            saved: RwLock::new(Some(addresses)),
            saves: AtomicUsize::new(0),
        }
    }

    /// The last persisted set, if any.
    pub fn snapshot(&self) -> Option<Vec<String>> {
        self.saved.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// How many times [`BlocklistStore::save`] has been called.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlocklistStore for MemoryStore {
    async fn load(&self) -> Result<Option<Vec<String>>, StoreError> {
        Ok(self.snapshot())
    }

    async fn save(&self, addresses: &[String]) -> Result<(), StoreError> {
        *self.saved.write().unwrap_or_else(|p| p.into_inner()) = Some(addresses.to_vec());
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn describe(&self) -> String {
        "in-memory (blocks will not survive restart)".into()
    }
}
