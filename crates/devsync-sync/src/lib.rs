//! devsync Sync - One-way mirroring engine
//!
//! Provides:
//! - Recursive filesystem watching with a uniform raw event stream
//! - Debounced coalescing of raw events into a minimal operation set
//! - A remote mirror adapter that maps local paths onto the remote root
//! - Transparent reconnection when the transport is severed
//! - Additive-only directory reconciliation
//!
//! ## Modules
//!
//! - [`watcher`] - `notify` based FS event source
//! - [`coalescer`] - Debounce loop, merge rules and dispatch
//! - [`mirror`] - Remote mirror adapter (path mapping + primitives)
//! - [`resilience`] - Reconnect loop around the mirror
//! - [`reconcile`] - Recursive subtree reconciliation
//! - [`session`] - Per-target sessions and their orchestrator

pub mod coalescer;
pub mod mirror;
pub mod reconcile;
pub mod resilience;
pub mod session;
pub mod watcher;

use std::path::PathBuf;

use devsync_core::domain::errors::DomainError;
use devsync_core::ports::remote::{DialError, RemoteError};
use thiserror::Error;

/// Errors that can occur during synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// A local path vanished or became unreadable between notification and dispatch
    #[error("Local path not accessible: {}: {source}", path.display())]
    LocalAccess {
        /// The local path that could not be read
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A remote operation failed
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// The remote session could not be established
    #[error("Connection error: {0}")]
    Dial(#[from] DialError),

    /// A domain-level error propagated from devsync-core
    #[error("Domain error: {0}")]
    DomainError(#[from] DomainError),

    /// The filesystem watch could not be set up
    #[error("Watch error: {0}")]
    Watch(#[source] anyhow::Error),
}

impl SyncError {
    /// Builds a [`SyncError::LocalAccess`] for `path`
    pub fn local(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SyncError::LocalAccess {
            path: path.into(),
            source,
        }
    }

    /// Returns true if the error is the transport-severed signature
    pub fn is_transport_severed(&self) -> bool {
        matches!(self, SyncError::Remote(e) if e.is_transport_severed())
    }

    /// Returns true if the error is a vanished/unreadable local path
    pub fn is_local_access(&self) -> bool {
        matches!(self, SyncError::LocalAccess { .. })
    }
}
