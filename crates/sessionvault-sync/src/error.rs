//! Error type of the sync engine.

use thiserror::Error;

use crate::codec::ArchiveError;
use crate::manager::LifecycleState;
use crate::packager::PackagerError;
use crate::store::StoreError;

/// Errors surfaced by [`SessionBackup`](crate::SessionBackup) operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Construction or configuration problem
    #[error(transparent)]
    Config(#[from] sessionvault_core::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Packaging error: {0}")]
    Packager(#[from] PackagerError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Hook called out of order
    #[error("Cannot {operation} while {state:?}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },
}

pub type Result<T> = std::result::Result<T, SyncError>;
