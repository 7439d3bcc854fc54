//! Configuration management commands.

use sessionvault_core::config::IssueSeverity;
use sessionvault_core::Config;

use crate::ConfigAction;

pub fn handle(action: ConfigAction, config: &Config) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Validate => {
            let result = config.validate();
            for issue in &result.issues {
                let label = match issue.severity {
                    IssueSeverity::Error => "error",
                    IssueSeverity::Warning => "warning",
                };
                println!("{}: {}: {}", label, issue.field, issue.message);
            }
            if !result.is_ok() {
                anyhow::bail!("Configuration has {} error(s)", result.errors().len());
            }
            println!("Configuration is valid");
        }
    }
    Ok(())
}
