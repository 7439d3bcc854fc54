//! # sessionvault-core
//!
//! Core types and abstractions for SessionVault.
//!
//! This crate provides:
//! - Session naming and on-disk layout
//! - Configuration system
//! - Common error types

pub mod config;
pub mod error;
pub mod session;

pub use config::{
    Config, LoggingConfig, StoreConfig, SyncConfig, DEFAULT_CLEANUP_RETRIES,
    MIN_BACKUP_INTERVAL_MS,
};
pub use error::{Error, Result};
pub use session::{SessionLayout, DEFAULT_DATA_PATH, DEFAULT_SESSION_NAME, REQUIRED_DIRS};
