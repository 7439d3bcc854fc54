//! Session naming and on-disk layout.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Session name used when no client id is supplied.
pub const DEFAULT_SESSION_NAME: &str = "RemoteSession";

/// Default root directory for live session data.
pub const DEFAULT_DATA_PATH: &str = "./.sessionvault_auth";

/// Subdirectories of a live session that make up the minimal resumable state.
///
/// The same list is used for packaging and for restoring. Anything else under
/// the session directory is excluded from backups.
pub const REQUIRED_DIRS: [&str; 3] = ["Default", "IndexedDB", "Local Storage"];

/// File extension of session archives.
pub const ARCHIVE_EXTENSION: &str = "tar.gz";

static CLIENT_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static regex"));

/// Check that a client id only uses letters, digits, underscores and hyphens.
pub fn validate_client_id(client_id: &str) -> Result<()> {
    if CLIENT_ID_PATTERN.is_match(client_id) {
        Ok(())
    } else {
        Err(Error::InvalidIdentifier(client_id.to_string()))
    }
}

/// Derive the session name from an optional client id.
pub fn session_name(client_id: Option<&str>) -> String {
    match client_id {
        Some(id) => format!("{}-{}", DEFAULT_SESSION_NAME, id),
        None => DEFAULT_SESSION_NAME.to_string(),
    }
}

/// Resolved paths for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionLayout {
    /// Derived session name, also the remote record key
    pub name: String,
    /// Root data directory
    pub data_path: PathBuf,
    /// Live session directory consumed by the hosted client
    pub session_dir: PathBuf,
    /// Ephemeral staging directory rebuilt every backup cycle
    pub staging_dir: PathBuf,
    /// Ephemeral archive file produced every backup cycle and on recovery
    pub archive_path: PathBuf,
}

impl SessionLayout {
    /// Build the layout for a session under `data_path`.
    ///
    /// The client id is validated before any path is derived from it.
    pub fn new(client_id: Option<&str>, data_path: impl AsRef<Path>) -> Result<Self> {
        if let Some(id) = client_id {
            validate_client_id(id)?;
        }

        let data_path = data_path.as_ref().to_path_buf();
        let name = session_name(client_id);

        Ok(Self {
            session_dir: data_path.join(&name),
            staging_dir: data_path.join(format!("temp_session_{}", name)),
            archive_path: data_path.join(format!("{}.{}", name, ARCHIVE_EXTENSION)),
            name,
            data_path,
        })
    }

    /// Required subdirectories of this session.
    pub fn required_dirs(&self) -> &'static [&'static str] {
        &REQUIRED_DIRS
    }
}
