//! Lifecycle notifications.
//!
//! Hosts observe the engine through a [`BackupEventHandler`]. Every method has
//! a no-op default so implementors only override what they need.

use std::path::{Path, PathBuf};

use tokio::sync::mpsc;

use crate::manager::LifecycleState;

/// Callbacks invoked by the session lifecycle manager.
pub trait BackupEventHandler: Send + Sync {
    /// Called on every lifecycle state transition.
    fn on_state_change(&self, _from: LifecycleState, _to: LifecycleState) {}

    /// Called once, after the very first backup of a new session was saved.
    fn on_first_backup(&self, _session: &str) {}

    /// Called after every successful save to the remote store.
    fn on_backup_saved(&self, _session: &str) {}

    /// Called when a backup cycle fails.
    fn on_backup_failed(&self, _session: &str, _error: &str) {}

    /// Called when best-effort cleanup gives up on a path.
    fn on_cleanup_failed(&self, _path: &Path, _error: &str) {}
}

/// Event handler that ignores everything.
pub struct NoOpEventHandler;

impl BackupEventHandler for NoOpEventHandler {}

/// Owned form of the handler callbacks, for channel delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupEvent {
    StateChanged {
        from: LifecycleState,
        to: LifecycleState,
    },
    FirstBackup {
        session: String,
    },
    BackupSaved {
        session: String,
    },
    BackupFailed {
        session: String,
        error: String,
    },
    CleanupFailed {
        path: PathBuf,
        error: String,
    },
}

/// Forwards every callback as a [`BackupEvent`] on an unbounded channel.
pub struct ChannelEventHandler {
    tx: mpsc::UnboundedSender<BackupEvent>,
}

impl ChannelEventHandler {
    /// Create a handler and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BackupEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: BackupEvent) {
        // A dropped receiver just means nobody is listening anymore.
        let _ = self.tx.send(event);
    }
}

impl BackupEventHandler for ChannelEventHandler {
    fn on_state_change(&self, from: LifecycleState, to: LifecycleState) {
        self.send(BackupEvent::StateChanged { from, to });
    }

    fn on_first_backup(&self, session: &str) {
        self.send(BackupEvent::FirstBackup {
            session: session.to_string(),
        });
    }

    fn on_backup_saved(&self, session: &str) {
        self.send(BackupEvent::BackupSaved {
            session: session.to_string(),
        });
    }

    fn on_backup_failed(&self, session: &str, error: &str) {
        self.send(BackupEvent::BackupFailed {
            session: session.to_string(),
            error: error.to_string(),
        });
    }

    fn on_cleanup_failed(&self, path: &Path, error: &str) {
        self.send(BackupEvent::CleanupFailed {
            path: path.to_path_buf(),
            error: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_handler_forwards_events() {
        let (handler, mut rx) = ChannelEventHandler::new();
        handler.on_first_backup("RemoteSession");
        handler.on_cleanup_failed(Path::new("/tmp/x"), "busy");

        assert_eq!(
            rx.try_recv().unwrap(),
            BackupEvent::FirstBackup {
                session: "RemoteSession".to_string()
            }
        );
        assert!(matches!(rx.try_recv().unwrap(), BackupEvent::CleanupFailed { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (handler, rx) = ChannelEventHandler::new();
        drop(rx);
        handler.on_backup_saved("RemoteSession");
    }
}
