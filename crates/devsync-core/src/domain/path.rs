//! Local-to-remote path mapping
//!
//! [`PathMapper`] is the single place where a local path under the watched
//! root is turned into the path of its remote image:
//!
//! ```text
//! remote = remote_root + "/" + components(local - local_root).join("/")
//! ```
//!
//! The mapping is a pure function of the two roots. Local separators are
//! whatever the platform uses; the remote side always uses `/`.

use std::path::{Component, Path, PathBuf};

use crate::domain::errors::DomainError;

/// Maps paths under a local root onto a remote root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMapper {
    local_root: PathBuf,
    remote_root: String,
}

impl PathMapper {
    /// Create a mapper, normalising both roots
    ///
    /// A relative local root is resolved against the current directory.
    /// The remote root has duplicate slashes collapsed and its trailing
    /// slash removed (except when it is `/` itself).
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if the local root cannot be made
    /// absolute, or `DomainError::InvalidRemotePath` if the remote root is
    /// empty or relative.
    pub fn new(local_root: impl AsRef<Path>, remote_root: &str) -> Result<Self, DomainError> {
        let local_root = std::path::absolute(local_root.as_ref()).map_err(|e| {
            DomainError::InvalidPath(format!("{}: {e}", local_root.as_ref().display()))
        })?;
        let local_root = normalize_local(&local_root)?;
        let remote_root = normalize_remote(remote_root)?;

        Ok(Self {
            local_root,
            remote_root,
        })
    }

    /// The normalised, absolute local root
    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    /// The normalised remote root
    pub fn remote_root(&self) -> &str {
        &self.remote_root
    }

    /// Map a local path to its remote counterpart
    ///
    /// # Errors
    /// Returns `DomainError::PathNotInSyncRoot` if `local` is not the local
    /// root or a descendant of it, and `DomainError::InvalidPath` for path
    /// components that are not valid UTF-8.
    pub fn map(&self, local: &Path) -> Result<String, DomainError> {
        let absolute = if local.is_absolute() {
            normalize_local(local)?
        } else {
            normalize_local(&self.local_root.join(local))?
        };

        let relative = absolute.strip_prefix(&self.local_root).map_err(|_| {
            DomainError::PathNotInSyncRoot(format!(
                "{} is not within sync root {}",
                local.display(),
                self.local_root.display()
            ))
        })?;

        let mut remote = self.remote_root.clone();
        for component in relative.components() {
            let Component::Normal(name) = component else {
                continue;
            };
            let name = name.to_str().ok_or_else(|| {
                DomainError::InvalidPath(format!("non UTF-8 path: {}", local.display()))
            })?;
            if !remote.ends_with('/') {
                remote.push('/');
            }
            remote.push_str(name);
        }

        Ok(remote)
    }
}

/// Resolve `.` and `..` components without touching the filesystem
fn normalize_local(path: &Path) -> Result<PathBuf, DomainError> {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::Prefix(p) => normalized.push(p.as_os_str()),
            Component::RootDir => normalized.push(Component::RootDir.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(DomainError::InvalidPath(
                        "Path escapes root via ..".to_string(),
                    ));
                }
            }
            Component::Normal(c) => normalized.push(c),
        }
    }

    Ok(normalized)
}

fn normalize_remote(root: &str) -> Result<String, DomainError> {
    if !root.starts_with('/') {
        return Err(DomainError::InvalidRemotePath(format!(
            "Remote root must be absolute: {root:?}"
        )));
    }

    let parts: Vec<&str> = root
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect();

    Ok(format!("/{}", parts.join("/")))
}
