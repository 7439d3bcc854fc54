//! Logout command: removes the session everywhere.

use sessionvault_core::Config;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let backup = super::open_session(&config).await?;
    backup.disconnect().await?;
    println!("Logged out {}", backup.session_name());
    Ok(())
}
