//! Remote file service port (driven/secondary port)
//!
//! This module defines the capability set the sync engine consumes from the
//! remote side. The shipped implementation speaks SFTP (`devsync-sftp`), the
//! integration tests use an in-memory one.
//!
//! ## Design Notes
//!
//! - Paths handed to a [`RemoteFileService`] are already mapped remote paths
//!   (`/`-separated strings); mapping is done by the mirror adapter.
//! - Errors are classified at the adapter boundary into [`RemoteError`] so
//!   the resilience layer can recognise a severed transport without
//!   inspecting adapter-specific types.
//! - Uses `#[async_trait]` for async trait methods.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncWrite;

// ============================================================================
// Errors
// ============================================================================

/// Failures of an individual remote operation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The underlying connection is gone; the session must be re-dialled
    #[error("Transport severed: {0}")]
    TransportSevered(String),

    /// The remote path does not exist
    #[error("Remote path not found: {0}")]
    NotFound(String),

    /// Any other remote failure (permission, conflict, quota, ...)
    #[error("Remote operation failed on {path}: {reason}")]
    Failure {
        /// Remote path the operation targeted
        path: String,
        /// Adapter-provided reason
        reason: String,
    },
}

impl RemoteError {
    /// Convenience constructor for [`RemoteError::Failure`]
    pub fn failure(path: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Failure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Returns true if this error means the connection itself was lost
    pub fn is_transport_severed(&self) -> bool {
        matches!(self, RemoteError::TransportSevered(_))
    }

    /// Returns true if the remote path does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

/// Failures while establishing a remote session
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DialError {
    /// Host unreachable, handshake failed or authentication was rejected
    #[error("Remote host unreachable or login failed: {0}")]
    BadHost(String),

    /// The remote root does not exist, is not a directory or is inaccessible
    #[error("Remote directory does not exist or is not accessible: {0}")]
    BadRemoteDir(String),

    /// No user name or no usable credential could be found
    #[error("No remote user or credential available: {0}")]
    MissingCredential(String),
}

// ============================================================================
// Connection parameters
// ============================================================================

/// How to authenticate against the remote host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Explicit password
    Password(String),
    /// Explicit private key file
    PrivateKey(PathBuf),
    /// Keyring-stored password, then the default private key locations
    Auto,
}

/// Everything needed to (re-)dial a remote session
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectParams {
    /// Remote host name or address
    pub host: String,
    /// Remote port
    pub port: u16,
    /// Login name; empty means "current OS user"
    pub user: String,
    /// Authentication material
    pub credential: Credential,
    /// Remote root that must exist and be a directory
    pub remote_root: String,
    /// Upper bound on connect + handshake + authentication
    pub timeout: Duration,
}

impl ConnectParams {
    /// `host:port` form used for logging and socket addresses
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let credential = match &self.credential {
            Credential::Password(_) => "password".to_string(),
            Credential::PrivateKey(p) => format!("key {}", p.display()),
            Credential::Auto => "auto".to_string(),
        };
        f.debug_struct("ConnectParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("credential", &credential)
            .field("remote_root", &self.remote_root)
            .field("timeout", &self.timeout)
            .finish()
    }
}

// ============================================================================
// Remote metadata
// ============================================================================

/// Result of a remote `stat`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoteStat {
    /// Whether anything exists at the path
    pub exists: bool,
    /// Whether the entry is a directory
    pub is_dir: bool,
    /// Size in bytes (0 for directories)
    pub size: u64,
    /// Modification time in seconds since the Unix epoch, if reported
    pub modified: Option<u64>,
}

impl RemoteStat {
    /// A stat result for a path that does not exist
    pub fn missing() -> Self {
        Self::default()
    }

    /// Returns true if the entry exists and is a regular file
    pub fn is_file(&self) -> bool {
        self.exists && !self.is_dir
    }
}

/// A child of a remote directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// File name, without any directory part
    pub name: String,
    /// Whether the child is a directory
    pub is_dir: bool,
}

/// Writable remote file handle returned by [`RemoteFileService::create`]
pub type RemoteWriter = Box<dyn AsyncWrite + Send + Unpin>;

// ============================================================================
// RemoteFileService trait
// ============================================================================

/// Port trait for primitive remote file operations
///
/// ## Implementation Notes
///
/// - `remove_file` and `remove_dir` must treat a missing path as success.
/// - A lost connection must surface as [`RemoteError::TransportSevered`];
///   implementations never retry on their own.
#[async_trait::async_trait]
pub trait RemoteFileService: Send + Sync {
    /// Stat a remote path; a missing path is `Ok(RemoteStat::missing())`
    async fn stat(&self, path: &str) -> Result<RemoteStat, RemoteError>;

    /// Create a single directory (the parent must exist)
    async fn mkdir(&self, path: &str) -> Result<(), RemoteError>;

    /// Delete a non-directory entry
    async fn remove_file(&self, path: &str) -> Result<(), RemoteError>;

    /// Delete an empty directory
    async fn remove_dir(&self, path: &str) -> Result<(), RemoteError>;

    /// Create or truncate a file and return a writer for its content
    ///
    /// The caller must `shutdown()` the writer once all bytes are written.
    async fn create(&self, path: &str) -> Result<RemoteWriter, RemoteError>;

    /// Set the modification (and access) time of a remote entry
    async fn set_modified(&self, path: &str, modified: u64) -> Result<(), RemoteError>;

    /// Rename `from` to `to`
    async fn rename(&self, from: &str, to: &str) -> Result<(), RemoteError>;

    /// List the children of a directory, excluding `.` and `..`
    async fn list_children(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError>;

    /// Release the session; further calls fail
    async fn close(&self) -> Result<(), RemoteError>;
}

// ============================================================================
// RemoteConnector trait
// ============================================================================

/// Factory for [`RemoteFileService`] sessions
///
/// Kept separate from the service so the resilience layer can throw a dead
/// session away and dial a fresh one with the same parameters.
#[async_trait::async_trait]
pub trait RemoteConnector: Send + Sync {
    /// Open an authenticated session
    ///
    /// Verifying the remote root is the caller's job; implementations only
    /// need to authenticate and open the file service.
    async fn connect(
        &self,
        params: &ConnectParams,
    ) -> Result<Box<dyn RemoteFileService>, DialError>;
}
