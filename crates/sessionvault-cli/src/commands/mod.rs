//! CLI command implementations.

use std::sync::Arc;

use tracing::{debug, info};

use sessionvault_core::Config;
use sessionvault_sync::{
    BackupEventHandler, FsStore, LifecycleState, SessionBackup, SessionBackupBuilder,
};

pub mod backup;
pub mod config;
pub mod logout;
pub mod restore;
pub mod run;

/// Reports lifecycle events on the console.
struct ConsoleEvents;

impl BackupEventHandler for ConsoleEvents {
    fn on_state_change(&self, from: LifecycleState, to: LifecycleState) {
        debug!(?from, ?to, "Session state changed");
    }

    fn on_first_backup(&self, session: &str) {
        println!("First backup of {} saved", session);
    }

    fn on_backup_saved(&self, session: &str) {
        info!(session = %session, "Backup saved");
    }
}

/// Build a session manager backed by the configured filesystem store.
pub async fn open_session(config: &Config) -> anyhow::Result<SessionBackup> {
    let store = FsStore::new(&config.store.path).await?;
    debug!(store = %store.root().display(), "Opened session store");

    let backup = SessionBackupBuilder::from_config(&config.sync)
        .store(Arc::new(store))
        .event_handler(Arc::new(ConsoleEvents))
        .build()?;
    Ok(backup)
}
