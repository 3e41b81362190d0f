//! Durable storage for the IP blocklist.
//!
//! The [`BlocklistStore`] trait is the contract between the in-memory
//! [`Blocklist`](crate::blocklist::Blocklist) and persistence. A store only
//! ever holds the full set: it is loaded wholesale on start-up and rewritten
//! wholesale on every mutation, never appended to.
//!
//! # Implementations
//!
//! | Type | When to use |
//! |------|-------------|
//! | [`FileStore`] | Default; JSON array of addresses in a flat file |
//! | [`SqliteStore`] | Deployments that already keep state in SQLite |
//! | [`MemoryStore`] | Tests and ephemeral gateways |
//!
//! [`FileStore`]: file::FileStore
//! [`SqliteStore`]: sqlite::SqliteStore
//! [`MemoryStore`]: memory::MemoryStore

pub mod file;
pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::BlocklistBackend;

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Errors that blocklist stores can return.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored data is not a JSON array of strings.
    #[error("corrupt blocklist data: {0}")]
    Corrupt(String),

    /// An unexpected error in the database backend.
    #[error("database error: {0}")]
    Database(String),
}

// ---------------------------------------------------------------------------
// BlocklistStore trait
// ---------------------------------------------------------------------------

/// Durable home of the blocked address set.
#[async_trait]
pub trait BlocklistStore: Send + Sync + 'static {
    /// Load the persisted set.
    ///
    /// Returns `Ok(None)` when nothing has been persisted yet (missing file or
    /// table), so the caller can create the store.
    async fn load(&self) -> Result<Option<Vec<String>>, StoreError>;

    /// Replace the persisted set with `addresses`.
    ///
    /// Implementations must never leave a half-written set behind.
    async fn save(&self, addresses: &[String]) -> Result<(), StoreError>;

    /// Short description for start-up logs.
    fn describe(&self) -> String;
}

/// Open the store selected by configuration.
pub fn open(backend: &BlocklistBackend) -> Result<Arc<dyn BlocklistStore>, StoreError> {
    Ok(match backend {
        BlocklistBackend::File(path) => Arc::new(file::FileStore::new(path.clone())),
        BlocklistBackend::Sqlite(path) => Arc::new(sqlite::SqliteStore::open(path)?),
        BlocklistBackend::Memory => Arc::new(memory::MemoryStore::new()),
    })
}
