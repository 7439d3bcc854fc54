//! # sessionvault-cli
//!
//! Command-line interface for SessionVault.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sessionvault_core::{Config, MIN_BACKUP_INTERVAL_MS};

mod commands;

/// SessionVault - keep a client session directory backed up
#[derive(Parser)]
#[command(name = "sessionvault")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Extra config file layered over the user and project config
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Client identifier (overrides configuration)
    #[arg(long, value_name = "ID", global = true)]
    client_id: Option<String>,

    /// Directory holding the session data (overrides configuration)
    #[arg(long, value_name = "PATH", global = true)]
    data_path: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Restore the session, then keep it backed up until interrupted
    Run {
        /// Backup interval in milliseconds (at least 60000)
        #[arg(long, value_name = "N")]
        interval_ms: Option<u64>,

        /// Delete the remote and local session on exit instead of keeping them
        #[arg(long)]
        logout_on_exit: bool,
    },
    /// Run a single backup cycle of the existing session directory
    Backup,
    /// Prepare the session directory from the remote store and exit
    Restore,
    /// Delete the remote record and the local session directory
    Logout,
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Check the effective configuration for problems
    Validate,
}

impl Cli {
    /// Load configuration and apply command-line overrides.
    fn load_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load_from(path)?,
            None => Config::load()?,
        };

        if let Some(ref id) = self.client_id {
            config.sync.client_id = Some(id.clone());
        }
        if let Some(ref path) = self.data_path {
            config.sync.data_path = path.clone();
        }
        match &self.command {
            Commands::Run {
                interval_ms: Some(ms),
                ..
            } => config.sync.backup_interval_ms = Some(*ms),
            // One-shot commands never schedule, so the interval is only a formality.
            Commands::Backup | Commands::Restore | Commands::Logout => {
                config
                    .sync
                    .backup_interval_ms
                    .get_or_insert(MIN_BACKUP_INTERVAL_MS);
            }
            _ => {}
        }

        Ok(config)
    }
}

fn init_logging(verbose: bool, config: &Config) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };

    let json = config.logging.json;
    tracing_subscriber::registry()
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer()))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = cli.load_config()?;
    init_logging(cli.verbose, &config);

    match cli.command {
        Commands::Run { logout_on_exit, .. } => {
            commands::run::run(config.into_validated()?, logout_on_exit).await?;
        }
        Commands::Backup => {
            commands::backup::run(config.into_validated()?).await?;
        }
        Commands::Restore => {
            commands::restore::run(config.into_validated()?).await?;
        }
        Commands::Logout => {
            commands::logout::run(config.into_validated()?).await?;
        }
        Commands::Config { action } => {
            commands::config::handle(action, &config)?;
        }
        Commands::Version => {
            println!("sessionvault {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
