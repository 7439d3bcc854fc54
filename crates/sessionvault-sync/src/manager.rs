//! Session lifecycle manager.
//!
//! [`SessionBackup`] glues the packager, codec, store, cleanup and scheduler
//! into the hooks a hosted client calls:
//!
//! ```text
//! Uninitialized ──recover()──► Recovering ──► Ready ◄──► Syncing
//!                                              │
//!                      teardown() ─────────────┼──► Terminated
//!                      disconnect() ──► Disconnecting ──┘
//! ```
//!
//! Recovery, backup cycles and disconnect share a single-slot guard, so at
//! most one of them touches the session, staging and archive paths at a time.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sessionvault_core::{
    Error as CoreError, SessionLayout, SyncConfig, DEFAULT_CLEANUP_RETRIES, DEFAULT_DATA_PATH,
    MIN_BACKUP_INTERVAL_MS,
};

use crate::cleanup::{Cleanup, DirRemover};
use crate::codec::ArchiveCodec;
use crate::error::{Result, SyncError};
use crate::events::{BackupEventHandler, NoOpEventHandler};
use crate::packager;
use crate::scheduler::{BackupScheduler, TickCallback};
use crate::store::RemoteStore;

/// Wait between readiness and the first backup of a session with no remote
/// record, so the client's initial state can settle.
pub const FIRST_BACKUP_SETTLE_DELAY: Duration = Duration::from_millis(60_000);

/// Lifecycle of a managed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Constructed, nothing on disk touched yet
    Uninitialized,
    /// Restoring or creating the local session directory
    Recovering,
    /// Session directory prepared, idle between cycles
    Ready,
    /// A backup cycle is running
    Syncing,
    /// Logging out: remote record and local directory are being removed
    Disconnecting,
    /// Final state, no further backups
    Terminated,
}

impl LifecycleState {
    fn is_shutting_down(self) -> bool {
        matches!(self, LifecycleState::Disconnecting | LifecycleState::Terminated)
    }
}

/// Why a backup cycle did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The live session directory does not exist
    SessionMissing,
    /// Disconnect or teardown has started
    ShuttingDown,
}

/// Result of a single backup cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupOutcome {
    Saved,
    Skipped(SkipReason),
}

/// State shared with the scheduler task.
struct Inner {
    layout: SessionLayout,
    store: Arc<dyn RemoteStore>,
    codec: ArchiveCodec,
    cleanup: Cleanup,
    events: Arc<dyn BackupEventHandler>,
    state: Mutex<LifecycleState>,
    /// Single-slot guard for recovery, backup cycles and disconnect.
    cycle: tokio::sync::Mutex<()>,
    shutdown: CancellationToken,
}

impl Inner {
    fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    fn transition(&self, to: LifecycleState) {
        let from = std::mem::replace(&mut *self.state.lock(), to);
        if from != to {
            debug!(session = %self.layout.name, ?from, ?to, "Lifecycle transition");
            self.events.on_state_change(from, to);
        }
    }

    /// Transition only if currently in `from`.
    fn transition_from(&self, from: LifecycleState, to: LifecycleState) -> bool {
        {
            let mut state = self.state.lock();
            if *state != from {
                return false;
            }
            *state = to;
        }
        debug!(session = %self.layout.name, ?from, ?to, "Lifecycle transition");
        self.events.on_state_change(from, to);
        true
    }

    fn expect_state(&self, operation: &'static str, allowed: &[LifecycleState]) -> Result<()> {
        let state = self.state();
        if allowed.contains(&state) {
            Ok(())
        } else {
            Err(SyncError::InvalidState { operation, state })
        }
    }

    async fn restore(&self) -> Result<PathBuf> {
        let layout = &self.layout;

        // Never resume on top of whatever a previous run left behind.
        self.cleanup.remove_directory(&layout.session_dir).await;

        if self.store.exists(&layout.name).await? {
            tokio::fs::create_dir_all(&layout.data_path).await?;

            let restored = async {
                self.store.fetch(&layout.name, &layout.archive_path).await?;
                self.codec
                    .decompress(&layout.archive_path, &layout.session_dir)
                    .await?;
                Ok::<_, SyncError>(())
            }
            .await;

            if let Err(e) = restored {
                self.cleanup.remove_file(&layout.archive_path).await;
                return Err(e);
            }
            info!(session = %layout.name, "Session restored from remote store");
        } else {
            tokio::fs::create_dir_all(&layout.session_dir).await?;
            info!(session = %layout.name, "No remote session, starting empty");
        }

        Ok(layout.session_dir.clone())
    }

    async fn run_cycle(&self) -> Result<BackupOutcome> {
        let _guard = self.cycle.lock().await;
        let layout = &self.layout;

        if self.state().is_shutting_down() {
            debug!(session = %layout.name, "Skipping backup, session is shutting down");
            return Ok(BackupOutcome::Skipped(SkipReason::ShuttingDown));
        }
        if !tokio::fs::try_exists(&layout.session_dir).await? {
            debug!(session = %layout.name, "Skipping backup, session directory missing");
            return Ok(BackupOutcome::Skipped(SkipReason::SessionMissing));
        }

        let resumed = self.transition_from(LifecycleState::Ready, LifecycleState::Syncing);
        let result = self.sync_once().await;

        // Release the archive and staging copy whatever happened above.
        self.cleanup.remove_file(&layout.archive_path).await;
        self.cleanup.remove_directory(&layout.staging_dir).await;

        if resumed {
            self.transition_from(LifecycleState::Syncing, LifecycleState::Ready);
        }

        match result {
            Ok(()) => {
                info!(session = %layout.name, "Session backed up");
                self.events.on_backup_saved(&layout.name);
                Ok(BackupOutcome::Saved)
            }
            Err(e) => {
                warn!(session = %layout.name, error = %e, "Backup cycle failed");
                self.events.on_backup_failed(&layout.name, &e.to_string());
                Err(e)
            }
        }
    }

    async fn sync_once(&self) -> Result<()> {
        let layout = &self.layout;
        packager::stage(&layout.session_dir, &layout.staging_dir, layout.required_dirs()).await?;
        self.codec
            .compress(&layout.staging_dir, &layout.archive_path)
            .await?;
        self.store.save(&layout.name, &layout.archive_path).await?;
        Ok(())
    }

    async fn delete_remote(&self) -> Result<bool> {
        if self.store.exists(&self.layout.name).await? {
            self.store.delete(&self.layout.name).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Keeps one session directory backed up to a [`RemoteStore`].
pub struct SessionBackup {
    inner: Arc<Inner>,
    scheduler: BackupScheduler,
    backup_interval: Duration,
}

impl SessionBackup {
    pub fn builder() -> SessionBackupBuilder {
        SessionBackupBuilder::default()
    }

    /// Build from loaded configuration.
    pub fn from_config(config: &SyncConfig, store: Arc<dyn RemoteStore>) -> Result<Self> {
        Ok(SessionBackupBuilder::from_config(config).store(store).build()?)
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.state()
    }

    pub fn session_name(&self) -> &str {
        &self.inner.layout.name
    }

    pub fn session_dir(&self) -> &Path {
        &self.inner.layout.session_dir
    }

    pub fn layout(&self) -> &SessionLayout {
        &self.inner.layout
    }

    pub fn backup_interval(&self) -> Duration {
        self.backup_interval
    }

    /// Whether the periodic backup timer is running.
    pub fn is_backing_up(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Prepare the local session directory before the hosted client starts.
    ///
    /// Any stale directory is removed, then the session is restored from the
    /// remote record if one exists, or created empty otherwise. Returns the
    /// directory the client should use. A disconnect issued while recovery
    /// runs waits for it and then removes the restored directory.
    pub async fn recover(&self) -> Result<PathBuf> {
        let _guard = self.inner.cycle.lock().await;
        self.inner
            .expect_state("recover", &[LifecycleState::Uninitialized])?;

        self.inner.transition(LifecycleState::Recovering);
        let restored = self.inner.restore().await;

        // A disconnect that started meanwhile keeps its state.
        let next = match restored {
            Ok(_) => LifecycleState::Ready,
            Err(_) => LifecycleState::Uninitialized,
        };
        self.inner.transition_from(LifecycleState::Recovering, next);
        restored
    }

    /// Called once the hosted client is ready.
    ///
    /// A session with no remote record gets its first backup after
    /// [`FIRST_BACKUP_SETTLE_DELAY`]. The periodic schedule is started in
    /// every case, including when that first backup fails; its error is
    /// still returned.
    pub async fn on_ready(&self) -> Result<()> {
        self.inner
            .expect_state("signal readiness", &[LifecycleState::Ready, LifecycleState::Syncing])?;
        let name = &self.inner.layout.name;

        let mut first_backup = Ok(());
        if !self.inner.store.exists(name).await? {
            info!(
                session = %name,
                delay_ms = FIRST_BACKUP_SETTLE_DELAY.as_millis() as u64,
                "No remote session yet, waiting before first backup"
            );
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => return Ok(()),
                _ = tokio::time::sleep(FIRST_BACKUP_SETTLE_DELAY) => {}
            }

            match self.inner.run_cycle().await {
                Ok(BackupOutcome::Saved) => self.inner.events.on_first_backup(name),
                Ok(BackupOutcome::Skipped(reason)) => {
                    debug!(session = %name, ?reason, "First backup skipped");
                }
                Err(e) => first_backup = Err(e),
            }
        }

        if !self.inner.state().is_shutting_down() {
            self.start_schedule();
        }
        first_backup
    }

    /// Run one backup cycle now.
    pub async fn backup_now(&self) -> Result<BackupOutcome> {
        self.inner.run_cycle().await
    }

    /// Log out: delete the remote record and the local session directory.
    ///
    /// Waits for an in-flight backup cycle first. Local cleanup runs even when
    /// the store fails; the store error is returned afterwards.
    pub async fn disconnect(&self) -> Result<()> {
        let previous = self.inner.state();
        if previous == LifecycleState::Terminated {
            return Err(SyncError::InvalidState {
                operation: "disconnect",
                state: previous,
            });
        }
        self.inner.transition(LifecycleState::Disconnecting);
        self.inner.shutdown.cancel();

        let layout = &self.inner.layout;
        let remote = {
            let _guard = self.inner.cycle.lock().await;

            let remote = self.inner.delete_remote().await;
            match &remote {
                Ok(true) => info!(session = %layout.name, "Remote session deleted"),
                Ok(false) => debug!(session = %layout.name, "No remote session to delete"),
                Err(e) => warn!(
                    session = %layout.name,
                    error = %e,
                    "Failed to delete remote session, removing local data anyway"
                ),
            }

            self.inner.cleanup.remove_directory(&layout.session_dir).await;
            self.inner.cleanup.remove_directory(&layout.staging_dir).await;
            self.inner.cleanup.remove_file(&layout.archive_path).await;
            remote
        };

        self.scheduler.stop();
        self.inner.transition(LifecycleState::Terminated);
        remote.map(|_| ())
    }

    /// Stop periodic backups without touching the store or the disk.
    pub fn teardown(&self) {
        self.inner.shutdown.cancel();
        self.scheduler.stop();
        self.inner.transition(LifecycleState::Terminated);
    }

    fn start_schedule(&self) {
        let inner = Arc::clone(&self.inner);
        let callback: TickCallback = Arc::new(move || {
            let inner = Arc::clone(&inner);
            async move {
                inner.run_cycle().await?;
                Ok(())
            }
            .boxed()
        });

        if self.scheduler.start(self.backup_interval, callback) {
            info!(
                session = %self.inner.layout.name,
                interval_ms = self.backup_interval.as_millis() as u64,
                "Periodic backups started"
            );
        }
    }
}

/// Builder for [`SessionBackup`]. Validation happens in [`build`](Self::build).
#[derive(Default)]
pub struct SessionBackupBuilder {
    client_id: Option<String>,
    data_path: Option<PathBuf>,
    backup_interval_ms: Option<u64>,
    cleanup_retries: Option<u32>,
    store: Option<Arc<dyn RemoteStore>>,
    events: Option<Arc<dyn BackupEventHandler>>,
    remover: Option<Arc<dyn DirRemover>>,
    retry_delay: Option<Duration>,
}

impl SessionBackupBuilder {
    /// Seed a builder from loaded configuration. The store still has to be
    /// supplied.
    pub fn from_config(config: &SyncConfig) -> Self {
        let mut builder = Self::default()
            .data_path(&config.data_path)
            .cleanup_retries(config.cleanup_retries);
        if let Some(ref id) = config.client_id {
            builder = builder.client_id(id);
        }
        if let Some(ms) = config.backup_interval_ms {
            builder = builder.backup_interval_ms(ms);
        }
        builder
    }

    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_path = Some(path.into());
        self
    }

    pub fn backup_interval_ms(mut self, ms: u64) -> Self {
        self.backup_interval_ms = Some(ms);
        self
    }

    pub fn cleanup_retries(mut self, retries: u32) -> Self {
        self.cleanup_retries = Some(retries);
        self
    }

    pub fn store(mut self, store: Arc<dyn RemoteStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn event_handler(mut self, events: Arc<dyn BackupEventHandler>) -> Self {
        self.events = Some(events);
        self
    }

    /// Replace the filesystem remover used for cleanup.
    pub fn remover(mut self, remover: Arc<dyn DirRemover>) -> Self {
        self.remover = Some(remover);
        self
    }

    /// Base delay between cleanup retries.
    pub fn cleanup_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    pub fn build(self) -> std::result::Result<SessionBackup, CoreError> {
        if !ArchiveCodec::is_available() {
            return Err(CoreError::CapabilityUnavailable("archive compression"));
        }

        let data_path = self
            .data_path
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_PATH));
        let layout = SessionLayout::new(self.client_id.as_deref(), data_path)?;

        let interval_ms = self
            .backup_interval_ms
            .ok_or_else(|| CoreError::Config("backup_interval_ms is required".to_string()))?;
        if interval_ms < MIN_BACKUP_INTERVAL_MS {
            return Err(CoreError::IntervalTooShort {
                interval_ms,
                minimum_ms: MIN_BACKUP_INTERVAL_MS,
            });
        }

        let store = self.store.ok_or(CoreError::MissingStore)?;
        let events = self.events.unwrap_or_else(|| Arc::new(NoOpEventHandler));

        let mut cleanup = Cleanup::new(self.cleanup_retries.unwrap_or(DEFAULT_CLEANUP_RETRIES))
            .with_events(Arc::clone(&events));
        if let Some(remover) = self.remover {
            cleanup = cleanup.with_remover(remover);
        }
        if let Some(delay) = self.retry_delay {
            cleanup = cleanup.with_retry_delay(delay);
        }

        Ok(SessionBackup {
            inner: Arc::new(Inner {
                layout,
                store,
                codec: ArchiveCodec::new(),
                cleanup,
                events,
                state: Mutex::new(LifecycleState::Uninitialized),
                cycle: tokio::sync::Mutex::new(()),
                shutdown: CancellationToken::new(),
            }),
            scheduler: BackupScheduler::new(),
            backup_interval: Duration::from_millis(interval_ms),
        })
    }
}
