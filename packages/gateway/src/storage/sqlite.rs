//! SQLite-backed blocklist store.
//!
//! Uses `rusqlite` (with bundled SQLite) wrapped in an `Arc<Mutex<Connection>>`
//! to satisfy the `Send + Sync` requirements. All blocking calls are offloaded
//! to a thread-pool via `tokio::task::spawn_blocking`.
//!
//! # Schema
//!
//! - `blocked_ips`: one row per blocked address.
//! - `blocklist_meta`: marks that the set has been written at least once, so
//!   an empty table can be told apart from a never-initialised one.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection};

use super::{BlocklistStore, StoreError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS blocked_ips (
    address TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS blocklist_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// SQLite-backed implementation of [`BlocklistStore`].
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    label: String,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path).map_err(map_err)?;
        conn.execute_batch(SCHEMA).map_err(map_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            label: format!("sqlite {}", path.display()),
        })
    }

    /// Open an in-memory database (data is lost when dropped).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(map_err)?;
        conn.execute_batch(SCHEMA).map_err(map_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            label: "sqlite :memory:".into(),
        })
    }
}

fn map_err(e: rusqlite::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn join_err(e: tokio::task::JoinError) -> StoreError {
    StoreError::Database(format!("blocking task failed: {e}"))
}

#[async_trait]
impl BlocklistStore for SqliteStore {
    async fn load(&self) -> Result<Option<Vec<String>>, StoreError> {
        let conn = Arc::clone(&self.conn);

        tokio::task::spawn_blocking(move || -> Result<Option<Vec<String>>, StoreError> {
            let conn = conn.lock().unwrap_or_else(|p| p.into_inner());

            let initialised: bool = conn
                .query_row(
                    "SELECT COUNT(*) FROM blocklist_meta WHERE key = 'initialised'",
                    [],
                    |row| row.get::<_, i64>(0),
                )
                .map_err(map_err)?
                > 0;
            if !initialised {
                return Ok(None);
            }

            let mut stmt = conn
                .prepare("SELECT address FROM blocked_ips ORDER BY address")
                .map_err(map_err)?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(map_err)?;
            let addresses = rows.collect::<Result<Vec<_>, _>>().map_err(map_err)?;
            Ok(Some(addresses))
        })
        .await
        .map_err(join_err)?
    }

    async fn save(&self, addresses: &[String]) -> Result<(), StoreError> {
        let conn = Arc::clone(&self.conn);
        let addresses = addresses.to_vec();

        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let mut conn = conn.lock().unwrap_or_else(|p| p.into_inner());
            let tx = conn.transaction().map_err(map_err)?;
            tx.execute("DELETE FROM blocked_ips", []).map_err(map_err)?;
            for address in &addresses {
                tx.execute(
                    "INSERT OR IGNORE INTO blocked_ips (address) VALUES (?1)",
                    params![address],
                )
                .map_err(map_err)?;
            }
            tx.execute(
                "INSERT OR REPLACE INTO blocklist_meta (key, value) VALUES ('initialised', '1')",
                [],
            )
            .map_err(map_err)?;
            tx.commit().map_err(map_err)
        })
        .await
        .map_err(join_err)?
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_database_loads_as_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_replaces_the_whole_set() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save(&["10.0.0.2".into(), "10.0.0.1".into()]).await.unwrap();
        store.save(&["10.0.0.9".into()]).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(vec!["10.0.0.9".to_string()]));
    }

    #[tokio::test]
    async fn empty_save_still_counts_as_initialised() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.save(&[]).await.unwrap();
        assert_eq!(store.load().await.unwrap(), Some(vec![]));
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocklist.db");
        SqliteStore::open(&path)
            .unwrap()
            .save(&["198.51.100.4".into()])
            .await
            .unwrap();
        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(
            reopened.load().await.unwrap(),
            Some(vec!["198.51.100.4".to_string()])
        );
    }
}
