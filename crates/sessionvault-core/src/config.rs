//! Configuration system for SessionVault.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::session::{validate_client_id, DEFAULT_DATA_PATH};

/// Minimum allowed backup interval in milliseconds.
pub const MIN_BACKUP_INTERVAL_MS: u64 = 60_000;

/// Default number of retries for best-effort directory removal.
pub const DEFAULT_CLEANUP_RETRIES: u32 = 4;

/// Intervals above this only produce a warning.
const LONG_BACKUP_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;

/// Main configuration struct for SessionVault.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Session sync settings
    pub sync: SyncConfig,
    /// Filesystem store settings (used by the CLI host)
    pub store: StoreConfig,
    /// Logging settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Optional client id, appended to the session name
    pub client_id: Option<String>,
    /// Root data directory holding live sessions
    pub data_path: PathBuf,
    /// Interval between backups in milliseconds (required)
    pub backup_interval_ms: Option<u64>,
    /// Retries for forced directory removal
    pub cleanup_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            data_path: PathBuf::from(DEFAULT_DATA_PATH),
            backup_interval_ms: None,
            cleanup_retries: DEFAULT_CLEANUP_RETRIES,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding remote records for the filesystem store
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: Config::data_dir().join("store"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Validation result with multiple issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Create a new empty validation result.
    pub fn new() -> Self {
        Self { issues: Vec::new() }
    }

    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }

    /// Get only error-level issues.
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Error).collect()
    }

    /// Get only warning-level issues.
    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Warning).collect()
    }

    /// Add an error.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning.
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity of the issue
    pub severity: IssueSeverity,
    /// Field path (e.g., "sync.backup_interval_ms")
    pub field: String,
    /// Human-readable message
    pub message: String,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

impl Config {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment(None).extract()
    }

    /// Load configuration, layering an explicit file over the usual sources.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, figment::Error> {
        Self::figment(Some(path.as_ref())).extract()
    }

    fn figment(extra: Option<&Path>) -> Figment {
        let mut figment = Figment::new()
            // Default values
            .merge(Serialized::defaults(Config::default()))
            // User config
            .merge(Toml::file(Self::config_dir().join("config.toml")))
            // Project config
            .merge(Toml::file(".sessionvault/config.toml"));

        if let Some(path) = extra {
            figment = figment.merge(Toml::file(path));
        }

        // Environment variables, e.g. SESSIONVAULT_SYNC__CLIENT_ID
        figment.merge(Env::prefixed("SESSIONVAULT_").split("__"))
    }

    /// Load and validate configuration.
    pub fn load_validated() -> Result<Self, Error> {
        let config = Self::load().map_err(|e| Error::Config(e.to_string()))?;
        config.into_validated()
    }

    /// Validate an already loaded configuration, logging warnings.
    pub fn into_validated(self) -> Result<Self, Error> {
        let result = self.validate();

        if !result.is_ok() {
            let errors: Vec<String> = result
                .errors()
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(Error::Config(format!(
                "Configuration validation failed:\n  {}",
                errors.join("\n  ")
            )));
        }

        for warning in result.warnings() {
            tracing::warn!("Config warning - {}: {}", warning.field, warning.message);
        }

        Ok(self)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if let Some(ref id) = self.sync.client_id {
            if validate_client_id(id).is_err() {
                result.add_error(
                    "sync.client_id",
                    format!("Invalid client id '{}': use letters, digits, '_' or '-'", id),
                );
            }
        }

        match self.sync.backup_interval_ms {
            None => result.add_error("sync.backup_interval_ms", "backup_interval_ms is required"),
            Some(ms) if ms < MIN_BACKUP_INTERVAL_MS => result.add_error(
                "sync.backup_interval_ms",
                format!("backup_interval_ms must be at least {}", MIN_BACKUP_INTERVAL_MS),
            ),
            Some(ms) if ms > LONG_BACKUP_INTERVAL_MS => result.add_warning(
                "sync.backup_interval_ms",
                "backup interval is longer than a day, recent state may be lost on restart",
            ),
            Some(_) => {}
        }

        if self.sync.data_path.as_os_str().is_empty() {
            result.add_error("sync.data_path", "data_path cannot be empty");
        }

        if self.sync.cleanup_retries == 0 {
            result.add_warning(
                "sync.cleanup_retries",
                "cleanup_retries is 0, stale directories will not be retried",
            );
        }

        if self.store.path.as_os_str().is_empty() {
            result.add_error("store.path", "store path cannot be empty");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            result.add_error(
                "logging.level",
                format!("Invalid log level '{}'. Valid values: {:?}", self.logging.level, valid_levels),
            );
        }

        result
    }

    /// Render the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, Error> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("sessionvault"))
            .unwrap_or_else(|| PathBuf::from("~/.config/sessionvault"))
    }

    /// Get the data directory (for the filesystem store).
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .map(|p| p.join("sessionvault"))
            .unwrap_or_else(|| PathBuf::from("~/.local/share/sessionvault"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.sync.backup_interval_ms = Some(MIN_BACKUP_INTERVAL_MS);
        config
    }

    #[test]
    fn test_default_config_requires_interval() {
        let result = Config::default().validate();
        assert!(!result.is_ok());
        assert!(result.errors().iter().any(|e| e.field == "sync.backup_interval_ms"));
    }

    #[test]
    fn test_config_with_interval_is_valid() {
        let result = valid_config().validate();
        assert!(result.is_ok(), "Config should be valid: {:?}", result.issues);
    }

    #[test]
    fn test_interval_below_minimum() {
        let mut config = valid_config();
        config.sync.backup_interval_ms = Some(59_999);
        let result = config.validate();
        assert!(!result.is_ok());
        assert!(result.errors().iter().any(|e| e.field == "sync.backup_interval_ms"));
    }

    #[test]
    fn test_long_interval_is_warning() {
        let mut config = valid_config();
        config.sync.backup_interval_ms = Some(LONG_BACKUP_INTERVAL_MS + 1);
        let result = config.validate();
        assert!(result.is_ok()); // Warnings don't fail validation
        assert!(result.warnings().iter().any(|e| e.field == "sync.backup_interval_ms"));
    }

    #[test]
    fn test_invalid_client_id() {
        let mut config = valid_config();
        config.sync.client_id = Some("bad id".to_string());
        let result = config.validate();
        assert!(!result.is_ok());
        assert!(result.errors().iter().any(|e| e.field == "sync.client_id"));
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = valid_config();
        config.logging.level = "loud".to_string();
        let result = config.validate();
        assert!(result.errors().iter().any(|e| e.field == "logging.level"));
    }

    #[test]
    fn test_into_validated_reports_errors() {
        let err = Config::default().into_validated().unwrap_err();
        assert!(err.to_string().contains("backup_interval_ms"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[sync]\nclient_id = \"bot1\"\nbackup_interval_ms = 120000\ncleanup_retries = 2\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.sync.client_id.as_deref(), Some("bot1"));
        assert_eq!(config.sync.backup_interval_ms, Some(120_000));
        assert_eq!(config.sync.cleanup_retries, 2);
    }

    #[test]
    fn test_to_toml_round_trips_fields() {
        let rendered = valid_config().to_toml().unwrap();
        assert!(rendered.contains("backup_interval_ms = 60000"));
        assert!(rendered.contains("[logging]"));
    }
}
