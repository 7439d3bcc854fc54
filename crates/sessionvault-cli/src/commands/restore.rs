//! Recovery-only command.

use sessionvault_core::Config;

pub async fn run(config: Config) -> anyhow::Result<()> {
    let backup = super::open_session(&config).await?;
    let dir = backup.recover().await?;
    println!("{}", dir.display());
    Ok(())
}
