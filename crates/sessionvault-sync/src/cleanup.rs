//! Best-effort, retrying removal of session directories and archives.
//!
//! Cleanup never returns an error. Failures are retried, then logged and
//! reported through [`BackupEventHandler::on_cleanup_failed`], and finally
//! absorbed so they cannot block teardown or the next backup cycle.

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::events::{BackupEventHandler, NoOpEventHandler};

/// Base delay between removal attempts; attempt `n` waits `n` times this.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Filesystem operations used by [`Cleanup`].
#[async_trait]
pub trait DirRemover: Send + Sync {
    /// Recursively remove a directory.
    async fn remove_dir_all(&self, path: &Path) -> std::io::Result<()>;

    /// Remove a single file.
    async fn remove_file(&self, path: &Path) -> std::io::Result<()>;
}

/// [`DirRemover`] backed by `tokio::fs`.
pub struct FsRemover;

#[async_trait]
impl DirRemover for FsRemover {
    async fn remove_dir_all(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::remove_dir_all(path).await
    }

    async fn remove_file(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::remove_file(path).await
    }
}

/// What a cleanup call ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// The path was removed after `attempts` tries.
    Removed { attempts: u32 },
    /// Nothing existed at the path.
    Absent,
    /// Every attempt failed; the path may still exist.
    Failed { attempts: u32, error: String },
}

impl CleanupOutcome {
    /// Whether the path is known to be gone.
    pub fn is_clean(&self) -> bool {
        !matches!(self, CleanupOutcome::Failed { .. })
    }
}

/// Retrying remover for directories and files.
pub struct Cleanup {
    remover: Arc<dyn DirRemover>,
    events: Arc<dyn BackupEventHandler>,
    max_retries: u32,
    retry_delay: Duration,
}

impl Cleanup {
    /// Create a filesystem-backed cleanup that retries up to `max_retries` times.
    pub fn new(max_retries: u32) -> Self {
        Self {
            remover: Arc::new(FsRemover),
            events: Arc::new(NoOpEventHandler),
            max_retries,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_remover(mut self, remover: Arc<dyn DirRemover>) -> Self {
        self.remover = remover;
        self
    }

    pub fn with_events(mut self, events: Arc<dyn BackupEventHandler>) -> Self {
        self.events = events;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Forcefully remove a directory tree, retrying transient failures.
    pub async fn remove_directory(&self, path: &Path) -> CleanupOutcome {
        if !exists(path).await {
            return CleanupOutcome::Absent;
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.remover.remove_dir_all(path).await {
                Ok(()) => {
                    debug!(path = %path.display(), attempts, "Directory removed");
                    return CleanupOutcome::Removed { attempts };
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    return CleanupOutcome::Removed { attempts };
                }
                Err(e) if attempts > self.max_retries => {
                    return self.give_up(path, attempts, e);
                }
                Err(e) => {
                    debug!(path = %path.display(), attempts, error = %e, "Removal failed, retrying");
                    tokio::time::sleep(self.retry_delay * attempts).await;
                }
            }
        }
    }

    /// Remove a single file without retrying.
    pub async fn remove_file(&self, path: &Path) -> CleanupOutcome {
        match self.remover.remove_file(path).await {
            Ok(()) => CleanupOutcome::Removed { attempts: 1 },
            Err(e) if e.kind() == ErrorKind::NotFound => CleanupOutcome::Absent,
            Err(e) => self.give_up(path, 1, e),
        }
    }

    fn give_up(&self, path: &Path, attempts: u32, error: std::io::Error) -> CleanupOutcome {
        let error = error.to_string();
        warn!(path = %path.display(), attempts, error = %error, "Cleanup failed, leaving path in place");
        self.events.on_cleanup_failed(path, &error);
        CleanupOutcome::Failed { attempts, error }
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{BackupEvent, ChannelEventHandler};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    /// Fails the first `failures` directory removals, then delegates to the filesystem.
    struct FlakyRemover {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyRemover {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl DirRemover for FlakyRemover {
        async fn remove_dir_all(&self, path: &Path) -> std::io::Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.failures {
                return Err(std::io::Error::new(ErrorKind::Other, "resource busy"));
            }
            FsRemover.remove_dir_all(path).await
        }

        async fn remove_file(&self, path: &Path) -> std::io::Result<()> {
            FsRemover.remove_file(path).await
        }
    }

    fn populated_dir(tmp: &TempDir) -> std::path::PathBuf {
        let dir = tmp.path().join("session");
        std::fs::create_dir_all(dir.join("Default/nested")).unwrap();
        std::fs::write(dir.join("Default/nested/file"), "x").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_remove_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = populated_dir(&tmp);

        let outcome = Cleanup::new(4).remove_directory(&dir).await;
        assert_eq!(outcome, CleanupOutcome::Removed { attempts: 1 });
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_remove_missing_directory_is_absent() {
        let tmp = TempDir::new().unwrap();
        let outcome = Cleanup::new(4).remove_directory(&tmp.path().join("missing")).await;
        assert_eq!(outcome, CleanupOutcome::Absent);
        assert!(outcome.is_clean());
    }

    #[tokio::test]
    async fn test_cleanup_twice_never_fails() {
        let tmp = TempDir::new().unwrap();
        let dir = populated_dir(&tmp);
        let archive = tmp.path().join("session.tar.gz");
        std::fs::write(&archive, "zz").unwrap();

        let cleanup = Cleanup::new(4);
        for _ in 0..2 {
            assert!(cleanup.remove_directory(&dir).await.is_clean());
            assert!(cleanup.remove_file(&archive).await.is_clean());
        }
        assert!(!dir.exists());
        assert!(!archive.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failures() {
        let tmp = TempDir::new().unwrap();
        let dir = populated_dir(&tmp);
        let remover = Arc::new(FlakyRemover::new(2));

        let outcome = Cleanup::new(4)
            .with_remover(remover.clone())
            .remove_directory(&dir)
            .await;

        assert_eq!(outcome, CleanupOutcome::Removed { attempts: 3 });
        assert_eq!(remover.calls.load(Ordering::SeqCst), 3);
        assert!(!dir.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_and_reports() {
        let tmp = TempDir::new().unwrap();
        let dir = populated_dir(&tmp);
        let (events, mut rx) = ChannelEventHandler::new();

        let outcome = Cleanup::new(2)
            .with_remover(Arc::new(FlakyRemover::new(u32::MAX)))
            .with_events(Arc::new(events))
            .remove_directory(&dir)
            .await;

        assert!(matches!(outcome, CleanupOutcome::Failed { attempts: 3, .. }));
        assert!(dir.exists());
        match rx.try_recv().unwrap() {
            BackupEvent::CleanupFailed { path, error } => {
                assert_eq!(path, dir);
                assert!(error.contains("busy"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_tries_once() {
        let tmp = TempDir::new().unwrap();
        let dir = populated_dir(&tmp);
        let remover = Arc::new(FlakyRemover::new(1));

        let outcome = Cleanup::new(0)
            .with_remover(remover.clone())
            .remove_directory(&dir)
            .await;

        assert!(matches!(outcome, CleanupOutcome::Failed { attempts: 1, .. }));
        assert_eq!(remover.calls.load(Ordering::SeqCst), 1);
    }
}
