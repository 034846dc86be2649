//! [`TokenStorage`] implementations

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

use super::traits::TokenStorage;
use super::types::TokenPair;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("token storage I/O failed: {0}")]
    Io(String),

    #[error("token storage is corrupted: {0}")]
    Corrupted(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// In-memory storage, lost when the process exits
#[derive(Debug, Default)]
pub struct MemoryTokenStorage {
    tokens: RwLock<Option<TokenPair>>,
}

impl MemoryTokenStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage pre-populated with `pair`
    pub fn with_tokens(pair: TokenPair) -> Self {
        Self { tokens: RwLock::new(Some(pair)) }
    }

    /// Snapshot of the stored pair
    pub fn snapshot(&self) -> Option<TokenPair> {
        self.tokens.read().clone()
    }
}

#[async_trait]
impl TokenStorage for MemoryTokenStorage {
    async fn set_tokens(&self, pair: &TokenPair) -> Result<(), StorageError> {
        *self.tokens.write() = Some(pair.clone());
        Ok(())
    }

    async fn access_token(&self) -> Result<Option<String>, StorageError> {
        Ok(self.tokens.read().as_ref().map(|t| t.access.clone()))
    }

    async fn refresh_token(&self) -> Result<Option<String>, StorageError> {
        Ok(self.tokens.read().as_ref().and_then(|t| t.refresh.clone()))
    }

    async fn clear_tokens(&self) -> Result<(), StorageError> {
        *self.tokens.write() = None;
        Ok(())
    }
}

/// JSON file storage that survives restarts
///
/// Writes go to a sibling temp file and are renamed into place. A corrupted
/// file is reported once and then treated as empty.
#[derive(Debug)]
pub struct FileTokenStorage {
    path: PathBuf,
    cache: RwLock<Option<Option<TokenPair>>>,
}

impl FileTokenStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), cache: RwLock::new(None) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Option<TokenPair>, StorageError> {
        if let Some(cached) = self.cache.read().clone() {
            return Ok(cached);
        }

        let loaded = match tokio::fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice::<TokenPair>(&bytes) {
                Ok(pair) => Some(pair),
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "discarding corrupted token file");
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        *self.cache.write() = Some(loaded.clone());
        Ok(loaded)
    }
}

#[async_trait]
impl TokenStorage for FileTokenStorage {
    async fn set_tokens(&self, pair: &TokenPair) -> Result<(), StorageError> {
        let json =
            serde_json::to_vec_pretty(pair).map_err(|e| StorageError::Corrupted(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        *self.cache.write() = Some(Some(pair.clone()));
        debug!(path = %self.path.display(), "tokens persisted");
        Ok(())
    }

    async fn access_token(&self) -> Result<Option<String>, StorageError> {
        Ok(self.load().await?.map(|t| t.access))
    }

    async fn refresh_token(&self) -> Result<Option<String>, StorageError> {
        Ok(self.load().await?.and_then(|t| t.refresh))
    }

    async fn clear_tokens(&self) -> Result<(), StorageError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        *self.cache.write() = Some(None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> TokenPair {
        TokenPair::new("access-1", Some("refresh-1".to_string()))
    }

    #[tokio::test]
    async fn test_memory_storage_roundtrip() {
        let storage = MemoryTokenStorage::new();
        assert_eq!(storage.access_token().await.unwrap(), None);

        storage.set_tokens(&pair()).await.unwrap();
        assert_eq!(storage.access_token().await.unwrap().as_deref(), Some("access-1"));
        assert_eq!(storage.refresh_token().await.unwrap().as_deref(), Some("refresh-1"));

        storage.clear_tokens().await.unwrap();
        assert!(storage.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_file_storage_survives_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session").join("tokens.json");

        FileTokenStorage::new(&path).set_tokens(&pair()).await.unwrap();

        let reopened = FileTokenStorage::new(&path);
        assert_eq!(reopened.refresh_token().await.unwrap().as_deref(), Some("refresh-1"));
    }

    #[tokio::test]
    async fn test_file_storage_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileTokenStorage::new(dir.path().join("tokens.json"));

        storage.clear_tokens().await.unwrap();
        storage.set_tokens(&pair()).await.unwrap();
        storage.clear_tokens().await.unwrap();

        assert_eq!(storage.access_token().await.unwrap(), None);
        assert!(!storage.path().exists());
    }

    #[tokio::test]
    async fn test_file_storage_corrupted_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, "{not json").unwrap();

        let storage = FileTokenStorage::new(&path);
        assert_eq!(storage.access_token().await.unwrap(), None);
    }
}
