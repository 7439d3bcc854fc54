//! # sessionvault-sync
//!
//! Session backup and recovery engine for SessionVault.
//!
//! This crate provides:
//! - Archive codec (gzip-compressed tar) with bounded parallel extraction
//! - Session packager that stages only the required subdirectories
//! - Retrying, never-failing cleanup with observable diagnostics
//! - The [`RemoteStore`] contract and a filesystem implementation
//! - A recurring backup scheduler
//! - [`SessionBackup`], the lifecycle manager hosted clients drive
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sessionvault_sync::{FsStore, SessionBackup};
//!
//! let store = Arc::new(FsStore::new("/var/lib/sessionvault/store").await?);
//! let backup = SessionBackup::builder()
//!     .client_id("bot1")
//!     .backup_interval_ms(300_000)
//!     .store(store)
//!     .build()?;
//!
//! // Before the client starts
//! let session_dir = backup.recover().await?;
//!
//! // Once the client reports ready
//! backup.on_ready().await?;
//!
//! // On logout, or on shutdown
//! backup.disconnect().await?;
//! backup.teardown();
//! ```
//!
//! ## Storage Layout
//!
//! For a session named `RemoteSession-bot1` under the data path:
//! - `{data_path}/RemoteSession-bot1/` - live session used by the client
//! - `{data_path}/temp_session_RemoteSession-bot1/` - staging copy, per cycle
//! - `{data_path}/RemoteSession-bot1.tar.gz` - archive, per cycle

pub mod cleanup;
pub mod codec;
pub mod error;
pub mod events;
pub mod manager;
pub mod packager;
pub mod scheduler;
pub mod store;

// Re-export commonly used types
pub use cleanup::{Cleanup, CleanupOutcome, DirRemover, FsRemover};
pub use codec::{ArchiveCodec, ArchiveError, MAX_CONCURRENT_WRITES};
pub use error::{Result, SyncError};
pub use events::{BackupEvent, BackupEventHandler, ChannelEventHandler, NoOpEventHandler};
pub use manager::{
    BackupOutcome, LifecycleState, SessionBackup, SessionBackupBuilder, SkipReason,
    FIRST_BACKUP_SETTLE_DELAY,
};
pub use packager::PackagerError;
pub use scheduler::BackupScheduler;
pub use store::{FsStore, RecordMetadata, RemoteStore, StoreError};
