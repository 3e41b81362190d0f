//! JSON flat-file blocklist store.
//!
//! The file holds a single JSON array of address strings:
//!
//! ```json
//! ["203.0.113.7", "2001:db8::1"]
//! ```
//!
//! Saves write the whole array to a sibling temp file and rename it over the
//! target, so a crash mid-write leaves the previous set intact.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{BlocklistStore, StoreError};

/// Blocklist persisted as a JSON array in a single file.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "blocklist".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl BlocklistStore for FileStore {
    async fn load(&self) -> Result<Option<Vec<String>>, StoreError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice::<Vec<String>>(&raw)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    async fn save(&self, addresses: &[String]) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let json = serde_json::to_vec_pretty(addresses)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}
