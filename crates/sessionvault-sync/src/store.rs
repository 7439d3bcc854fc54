//! Remote store contract and a filesystem-backed implementation.
//!
//! The engine only ever talks to a store through [`RemoteStore`]. Calls are
//! never retried by the engine; errors propagate to the caller unchanged.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use sessionvault_core::session::ARCHIVE_EXTENSION;

/// Errors that can occur during remote store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Invalid session name: {0}")]
    InvalidName(String),

    /// Failure reported by a third-party backend.
    #[error("Store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Wrap an arbitrary backend error.
    pub fn backend(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        StoreError::Backend(error.into())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistence backend holding the latest archive of each session.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Whether a record exists for `session`.
    async fn exists(&self, session: &str) -> Result<bool>;

    /// Upload the archive at `archive_path`, replacing any previous record.
    async fn save(&self, session: &str, archive_path: &Path) -> Result<()>;

    /// Write the saved archive bytes for `session` to `dest_path`.
    async fn fetch(&self, session: &str, dest_path: &Path) -> Result<()>;

    /// Remove the record for `session`.
    async fn delete(&self, session: &str) -> Result<()>;
}

/// Sidecar describing a stored record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub session: String,
    pub size_bytes: u64,
    pub saved_at: DateTime<Utc>,
}

/// Stores each record as `{root}/{session}.tar.gz` with a JSON sidecar.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read the sidecar for a stored record.
    pub async fn metadata(&self, session: &str) -> Result<RecordMetadata> {
        let path = self.metadata_path(session)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(session.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn record_path(&self, session: &str) -> Result<PathBuf> {
        check_name(session)?;
        Ok(self.root.join(format!("{}.{}", session, ARCHIVE_EXTENSION)))
    }

    fn metadata_path(&self, session: &str) -> Result<PathBuf> {
        check_name(session)?;
        Ok(self.root.join(format!("{}.json", session)))
    }

    /// Write `bytes` to `target` through a temp file and rename.
    async fn write_atomic(&self, target: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = self.root.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, target).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

/// Session names become file names, so keep them to a single path component.
fn check_name(session: &str) -> Result<()> {
    let valid = !session.is_empty()
        && session
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(session.to_string()))
    }
}

#[async_trait]
impl RemoteStore for FsStore {
    async fn exists(&self, session: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.record_path(session)?).await?)
    }

    async fn save(&self, session: &str, archive_path: &Path) -> Result<()> {
        let record = self.record_path(session)?;
        let bytes = tokio::fs::read(archive_path).await?;
        self.write_atomic(&record, &bytes).await?;

        let metadata = RecordMetadata {
            session: session.to_string(),
            size_bytes: bytes.len() as u64,
            saved_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&metadata)?;
        self.write_atomic(&self.metadata_path(session)?, &json).await?;

        tracing::debug!(session, size_bytes = metadata.size_bytes, "Record saved");
        Ok(())
    }

    async fn fetch(&self, session: &str, dest_path: &Path) -> Result<()> {
        let record = self.record_path(session)?;
        if !tokio::fs::try_exists(&record).await? {
            return Err(StoreError::NotFound(session.to_string()));
        }
        if let Some(parent) = dest_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&record, dest_path).await?;
        Ok(())
    }

    async fn delete(&self, session: &str) -> Result<()> {
        let record = self.record_path(session)?;
        match tokio::fs::remove_file(&record).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(session.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        match tokio::fs::remove_file(self.metadata_path(session)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_store() -> (FsStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FsStore::new(temp_dir.path().join("store")).await.unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_save_and_fetch() {
        let (store, tmp) = create_test_store().await;
        let archive = tmp.path().join("upload.tar.gz");
        std::fs::write(&archive, b"archive-bytes").unwrap();

        assert!(!store.exists("RemoteSession").await.unwrap());
        store.save("RemoteSession", &archive).await.unwrap();
        assert!(store.exists("RemoteSession").await.unwrap());

        let dest = tmp.path().join("download/out.tar.gz");
        store.fetch("RemoteSession", &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"archive-bytes");

        let meta = store.metadata("RemoteSession").await.unwrap();
        assert_eq!(meta.session, "RemoteSession");
        assert_eq!(meta.size_bytes, 13);
    }

    #[tokio::test]
    async fn test_save_overwrites() {
        let (store, tmp) = create_test_store().await;
        let archive = tmp.path().join("upload.tar.gz");

        std::fs::write(&archive, b"first").unwrap();
        store.save("s", &archive).await.unwrap();
        std::fs::write(&archive, b"second").unwrap();
        store.save("s", &archive).await.unwrap();

        let dest = tmp.path().join("out");
        store.fetch("s", &dest).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"second");

        // Only the record, its sidecar, and no leftover temp files.
        assert_eq!(std::fs::read_dir(store.root()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_delete() {
        let (store, tmp) = create_test_store().await;
        let archive = tmp.path().join("upload.tar.gz");
        std::fs::write(&archive, b"x").unwrap();
        store.save("s", &archive).await.unwrap();

        store.delete("s").await.unwrap();
        assert!(!store.exists("s").await.unwrap());
        assert!(matches!(store.metadata("s").await, Err(StoreError::NotFound(_))));
        assert!(matches!(store.delete("s").await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_fetch_missing() {
        let (store, tmp) = create_test_store().await;
        let result = store.fetch("nothing", &tmp.path().join("out")).await;
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rejects_path_like_names() {
        let (store, _tmp) = create_test_store().await;
        assert!(matches!(store.exists("../escape").await, Err(StoreError::InvalidName(_))));
        assert!(matches!(store.exists("").await, Err(StoreError::InvalidName(_))));
    }
}
