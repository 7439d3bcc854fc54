//! Session packager.
//!
//! Builds the staging directory for a backup cycle: a copy of only the
//! required subdirectories of the live session.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

/// Errors that can occur while staging a session.
#[derive(Error, Debug)]
pub enum PackagerError {
    #[error("IO error while staging {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Staging task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, PackagerError>;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PackagerError + '_ {
    move |source| PackagerError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Copy the required subdirectories of `session_dir` into `staging_dir`.
///
/// Anything already at `staging_dir` is removed first, and staging fails if
/// it cannot be. Required directories that do not exist in the session are
/// skipped, which is normal for a brand-new session.
pub async fn stage(
    session_dir: &Path,
    staging_dir: &Path,
    required_dirs: &[&str],
) -> Result<PathBuf> {
    let session = session_dir.to_path_buf();
    let staging = staging_dir.to_path_buf();
    let required: Vec<String> = required_dirs.iter().map(|d| d.to_string()).collect();

    tokio::task::spawn_blocking(move || stage_blocking(&session, &staging, &required))
        .await
        .map_err(|e| PackagerError::Task(e.to_string()))?
}

fn stage_blocking(session_dir: &Path, staging_dir: &Path, required: &[String]) -> Result<PathBuf> {
    match fs::remove_dir_all(staging_dir) {
        Ok(()) => tracing::debug!(staging = %staging_dir.display(), "Removed leftover staging directory"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(staging_dir)(e)),
    }
    fs::create_dir_all(staging_dir).map_err(io_err(staging_dir))?;

    for name in required {
        let source = session_dir.join(name);
        if !source.is_dir() {
            tracing::debug!(dir = %name, "Required directory absent, skipping");
            continue;
        }
        copy_tree(&source, &staging_dir.join(name))?;
    }

    Ok(staging_dir.to_path_buf())
}

/// Recursively copy a directory tree. Symlinks are not followed or copied.
fn copy_tree(source: &Path, target: &Path) -> Result<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source).to_path_buf();
            PackagerError::Io {
                path,
                source: e.into(),
            }
        })?;

        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| PackagerError::Task(e.to_string()))?;
        let dest = target.join(relative);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&dest).map_err(io_err(&dest))?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &dest).map_err(io_err(entry.path()))?;
        }
    }
    Ok(())
}
