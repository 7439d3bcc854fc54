//! Error types for SessionVault.
//!
//! These are the construction-time and configuration errors shared by every
//! crate in the workspace. Runtime failures of the sync engine (archive,
//! store, packaging) live in `sessionvault-sync` and wrap this type.

use thiserror::Error;

/// Result type alias using the core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for SessionVault configuration and construction.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Client identifier contains characters outside `[A-Za-z0-9_-]`
    #[error("Invalid client id '{0}': only letters, digits, '_' and '-' are allowed")]
    InvalidIdentifier(String),

    /// Backup interval is below the allowed minimum
    #[error("Backup interval {interval_ms}ms is below the minimum of {minimum_ms}ms")]
    IntervalTooShort { interval_ms: u64, minimum_ms: u64 },

    /// No remote store was supplied
    #[error("A remote store is required")]
    MissingStore,

    /// A required capability was not compiled into this build
    #[error("Capability unavailable: {0}")]
    CapabilityUnavailable(&'static str),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Config(_) => {
                Some("Check your config file at ~/.config/sessionvault/config.toml")
            }
            Error::InvalidIdentifier(_) => {
                Some("Use a client id made of letters, digits, underscores or hyphens")
            }
            Error::IntervalTooShort { .. } => {
                Some("Set sync.backup_interval_ms to at least 60000")
            }
            Error::MissingStore => Some("Pass a remote store to the session backup builder"),
            Error::CapabilityUnavailable(_) => {
                Some("Rebuild sessionvault-sync with the 'archive' feature enabled")
            }
            _ => None,
        }
    }

    /// Whether this error is a configuration problem detected before any
    /// filesystem or network work started.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::InvalidIdentifier(_)
                | Error::IntervalTooShort { .. }
                | Error::MissingStore
                | Error::CapabilityUnavailable(_)
                | Error::Validation(_)
        )
    }
}

/// Format an error with its recovery suggestion.
pub fn format_error_with_suggestion(error: &Error) -> String {
    let mut output = error.to_string();
    if let Some(suggestion) = error.recovery_suggestion() {
        output.push_str(&format!("\n  Suggestion: {}", suggestion));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_too_short() {
        let err = Error::IntervalTooShort {
            interval_ms: 1000,
            minimum_ms: 60_000,
        };
        assert!(err.to_string().contains("1000ms"));
        assert!(err.is_configuration());
        assert!(err.recovery_suggestion().is_some());
    }

    #[test]
    fn test_invalid_identifier() {
        let err = Error::InvalidIdentifier("bad id".to_string());
        assert!(err.to_string().contains("bad id"));
        assert!(format_error_with_suggestion(&err).contains("Suggestion:"));
    }

    #[test]
    fn test_io_is_not_configuration() {
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert!(!err.is_configuration());
        assert!(err.recovery_suggestion().is_none());
    }
}
