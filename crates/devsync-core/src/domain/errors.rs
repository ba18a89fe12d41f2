//! Domain error types
//!
//! This module defines error types specific to domain operations:
//! path mapping failures and configuration problems detected before any
//! session is started.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Path is not within the configured local root
    #[error("Path not within sync root: {0}")]
    PathNotInSyncRoot(String),

    /// Invalid remote path format
    #[error("Invalid remote path: {0}")]
    InvalidRemotePath(String),

    /// The `[user[:pass]@]host[:port]/path` target could not be parsed
    #[error("Invalid remote target: {0}")]
    InvalidRemoteTarget(String),

    /// Port outside 1..=65535
    #[error("Invalid port: {0}")]
    InvalidPort(String),

    /// Configuration failed validation; carries every problem found
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The configuration file could not be read or parsed
    #[error("Cannot load configuration {path}: {reason}")]
    ConfigLoad {
        /// Path of the configuration file
        path: String,
        /// Underlying reason
        reason: String,
    },
}
