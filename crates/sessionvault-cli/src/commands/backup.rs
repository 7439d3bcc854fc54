//! One-shot backup command.

use sessionvault_core::Config;
use sessionvault_sync::{BackupOutcome, SkipReason};

pub async fn run(config: Config) -> anyhow::Result<()> {
    let backup = super::open_session(&config).await?;

    match backup.backup_now().await? {
        BackupOutcome::Saved => println!("Backed up {}", backup.session_name()),
        BackupOutcome::Skipped(SkipReason::SessionMissing) => {
            println!(
                "Nothing to back up: {} does not exist",
                backup.session_dir().display()
            );
        }
        BackupOutcome::Skipped(SkipReason::ShuttingDown) => {
            println!("Backup skipped, session is shutting down");
        }
    }
    Ok(())
}
