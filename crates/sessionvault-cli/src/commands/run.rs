//! Long-running backup command.

use std::sync::Arc;

use tracing::{info, warn};

use sessionvault_core::Config;

pub async fn run(config: Config, logout_on_exit: bool) -> anyhow::Result<()> {
    let backup = Arc::new(super::open_session(&config).await?);

    let dir = backup.recover().await?;
    println!("Session directory ready: {}", dir.display());
    println!("Press Ctrl-C to stop.");

    let ready = {
        let backup = Arc::clone(&backup);
        tokio::spawn(async move {
            if let Err(e) = backup.on_ready().await {
                warn!(error = %e, "First backup failed, periodic backups continue");
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    if logout_on_exit {
        backup.disconnect().await?;
        println!("Logged out {}", backup.session_name());
    } else {
        backup.teardown();
    }

    if let Err(e) = ready.await {
        warn!(error = %e, "Readiness task ended abnormally");
    }
    Ok(())
}
