//! Recurring backup timer.
//!
//! [`BackupScheduler`] owns at most one background task. Starting an already
//! running scheduler and stopping a stopped one are both no-ops.
//!
//! Each tick awaits the callback to completion before waiting for the next
//! tick, so ticks of one scheduler never overlap. A callback error is logged
//! and the schedule keeps running.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Work performed on every tick.
pub type TickCallback = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

struct RunningSchedule {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owner of a single recurring timer task.
#[derive(Default)]
pub struct BackupScheduler {
    running: Mutex<Option<RunningSchedule>>,
}

impl BackupScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start firing `callback` every `interval`, the first time one interval
    /// from now.
    ///
    /// Returns `false` without doing anything if already running.
    pub fn start(&self, interval: Duration, callback: TickCallback) -> bool {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            debug!("Scheduler already running");
            return false;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                // Cancellation during a tick lets the current callback finish.
                if let Err(e) = callback().await {
                    warn!(error = %e, "Scheduled backup failed, will retry next tick");
                }
            }
            debug!("Scheduler loop exited");
        });

        *running = Some(RunningSchedule { cancel, handle });
        debug!(interval_ms = interval.as_millis() as u64, "Scheduler started");
        true
    }

    /// Stop the timer. Returns `false` if it was not running.
    pub fn stop(&self) -> bool {
        match self.running.lock().take() {
            Some(schedule) => {
                schedule.cancel.cancel();
                debug!("Scheduler stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }
}

impl Drop for BackupScheduler {
    fn drop(&mut self) {
        if let Some(schedule) = self.running.get_mut().take() {
            schedule.cancel.cancel();
        }
    }
}
