//! Configuration module for devsync.
//!
//! A run is described by one or more [`SyncTarget`] entries, each pairing a
//! local directory with a remote SFTP directory. Entries come either from a
//! single `[user[:pass]@]host[:port]/path` remote target given on the command
//! line, or from a file holding a stream of JSON records.
//!
//! Engine tunables that are not per-target live in [`SessionSettings`].

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainError;
use crate::ports::remote::{ConnectParams, Credential};

/// Port used when a target does not name one.
pub const DEFAULT_PORT: u32 = 22;

// ---------------------------------------------------------------------------
// SyncTarget
// ---------------------------------------------------------------------------

/// One local directory mirrored onto one remote directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncTarget {
    /// Local directory to watch.
    pub local_path: PathBuf,
    /// Remote host name or address.
    pub remote_host: String,
    /// Remote SSH port.
    #[serde(default = "default_port")]
    pub remote_port: u32,
    /// Remote login; empty means the current OS user.
    #[serde(default)]
    pub remote_user: String,
    /// Remote password; empty means key based login.
    #[serde(default)]
    pub remote_pass: String,
    /// Private key to log in with instead of the default key locations.
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    /// Remote directory receiving the mirror.
    pub remote_path: String,
}

fn default_port() -> u32 {
    DEFAULT_PORT
}

/// `[user[:pass]@]host[:port]/path`
static REMOTE_TARGET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(([^:]+)(:([^@]+))?@)?([^:/]+)(:(\d+))?(/\S+)$")
        .expect("remote target pattern is valid")
});

impl SyncTarget {
    /// Build a target from a local directory and a remote target string such
    /// as `deploy:secret@10.0.0.5:2222/srv/app`.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidRemoteTarget` if the string does not
    /// match the grammar and `DomainError::InvalidPort` if the port does not
    /// fit in 1..=65535.
    pub fn from_remote_spec(local_path: impl Into<PathBuf>, spec: &str) -> Result<Self, DomainError> {
        let caps = REMOTE_TARGET
            .captures(spec.trim())
            .ok_or_else(|| DomainError::InvalidRemoteTarget(spec.to_string()))?;

        let remote_port = match caps.get(7) {
            None => DEFAULT_PORT,
            Some(port) => port
                .as_str()
                .parse::<u32>()
                .ok()
                .filter(|p| (1..=65535).contains(p))
                .ok_or_else(|| DomainError::InvalidPort(port.as_str().to_string()))?,
        };

        let group = |i: usize| caps.get(i).map(|m| m.as_str().to_string()).unwrap_or_default();

        Ok(Self {
            local_path: local_path.into(),
            remote_host: group(5),
            remote_port,
            remote_user: group(2),
            remote_pass: group(4),
            identity_file: None,
            remote_path: group(8),
        })
    }

    /// Load every target from a configuration file.
    ///
    /// The file holds a stream of JSON values separated by whitespace; each
    /// value is either one target object or an array of them.
    pub fn load_all(path: &Path) -> Result<Vec<Self>, DomainError> {
        let content = std::fs::read_to_string(path).map_err(|e| DomainError::ConfigLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse_all(&content).map_err(|reason| DomainError::ConfigLoad {
            path: path.display().to_string(),
            reason,
        })
    }

    /// Parse a stream of JSON records (see [`SyncTarget::load_all`]).
    pub fn parse_all(content: &str) -> Result<Vec<Self>, String> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Record {
            One(SyncTarget),
            Many(Vec<SyncTarget>),
        }

        let mut targets = Vec::new();
        for record in serde_json::Deserializer::from_str(content).into_iter::<Record>() {
            match record.map_err(|e| e.to_string())? {
                Record::One(target) => targets.push(target),
                Record::Many(many) => targets.extend(many),
            }
        }

        if targets.is_empty() {
            return Err("no sync targets defined".to_string());
        }
        Ok(targets)
    }

    /// `host:port/path` form for log lines (never includes the password).
    pub fn display_remote(&self) -> String {
        format!("{}:{}{}", self.remote_host, self.remote_port, self.remote_path)
    }

    /// Connection parameters for dialling this target.
    ///
    /// Call [`SyncTarget::validate`] first; an out-of-range port is clamped
    /// to the default here.
    pub fn connect_params(&self, dial_timeout: Duration) -> ConnectParams {
        let credential = if !self.remote_pass.is_empty() {
            Credential::Password(self.remote_pass.clone())
        } else if let Some(identity) = &self.identity_file {
            Credential::PrivateKey(identity.clone())
        } else {
            Credential::Auto
        };

        ConnectParams {
            host: self.remote_host.clone(),
            port: u16::try_from(self.remote_port).unwrap_or(DEFAULT_PORT as u16),
            user: self.remote_user.clone(),
            credential,
            remote_root: self.remote_path.clone(),
            timeout: dial_timeout,
        }
    }
}

// ---------------------------------------------------------------------------
// SessionSettings
// ---------------------------------------------------------------------------

/// Engine tunables shared by every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Idle period after the last raw event before a coalesce pass runs.
    pub debounce: Duration,
    /// Fixed part of the reconnect back-off.
    pub reconnect_base: Duration,
    /// Per-attempt growth of the reconnect back-off.
    pub reconnect_step: Duration,
    /// Upper bound on a single dial.
    pub dial_timeout: Duration,
    /// Capacity of the raw event channel between watcher and session task.
    pub event_buffer: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(100),
            reconnect_base: Duration::from_secs(2),
            reconnect_step: Duration::from_secs(2),
            dial_timeout: Duration::from_secs(10),
            event_buffer: 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Name of the offending field, e.g. `"remote_port"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl SyncTarget {
    /// Validate the target and return all errors found.
    ///
    /// An empty vector means the target is usable. The local directory is
    /// checked on disk.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        let mut push = |field: &str, message: String| {
            errors.push(ValidationError {
                field: field.into(),
                message,
            })
        };

        if self.local_path.as_os_str().is_empty() {
            push("local_path", "must not be empty".into());
        } else {
            match std::fs::metadata(&self.local_path) {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => push(
                    "local_path",
                    format!("{} is not a directory", self.local_path.display()),
                ),
                Err(e) => push(
                    "local_path",
                    format!("{} is not accessible: {e}", self.local_path.display()),
                ),
            }
        }

        if self.remote_host.trim().is_empty() {
            push("remote_host", "must not be empty".into());
        }

        if !(1..=65535).contains(&self.remote_port) {
            push(
                "remote_port",
                format!("must be between 1 and 65535 (got {})", self.remote_port),
            );
        }

        if self.remote_path.is_empty() {
            push("remote_path", "must not be empty".into());
        } else if !self.remote_path.starts_with('/') {
            push(
                "remote_path",
                format!("must be absolute (got {:?})", self.remote_path),
            );
        }

        if let Some(identity) = &self.identity_file {
            if !identity.is_file() {
                push(
                    "identity_file",
                    format!("{} is not a readable file", identity.display()),
                );
            }
        }

        errors
    }

    /// Validate and fold every problem into one `DomainError::InvalidConfig`.
    pub fn ensure_valid(&self) -> Result<(), DomainError> {
        let errors = self.validate();
        if errors.is_empty() {
            return Ok(());
        }
        let joined = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(DomainError::InvalidConfig(format!(
            "{}: {joined}",
            self.local_path.display()
        )))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
