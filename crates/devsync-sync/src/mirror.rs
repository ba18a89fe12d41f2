//! Remote mirror adapter
//!
//! [`RemoteMirror`] owns one session to the remote host and exposes the
//! mirror primitives in terms of *local* paths: every call maps its argument
//! through the [`PathMapper`] before touching the remote side.
//!
//! The adapter never retries. A lost connection surfaces as
//! [`RemoteError::TransportSevered`] and is handled by
//! [`ResilientMirror`](crate::resilience::ResilientMirror).

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use devsync_core::domain::path::PathMapper;
use devsync_core::ports::remote::{
    ConnectParams, DialError, RemoteConnector, RemoteEntry, RemoteError, RemoteFileService,
    RemoteStat,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, instrument, warn};

use crate::SyncError;

/// Chunk size used when streaming local files to the remote
const UPLOAD_CHUNK: usize = 32 * 1024;

/// Bidirectional handle to one remote mirror root
pub struct RemoteMirror {
    connector: Arc<dyn RemoteConnector>,
    params: ConnectParams,
    mapper: PathMapper,
    service: Option<Box<dyn RemoteFileService>>,
}

impl RemoteMirror {
    /// Dials the remote host and verifies the remote root
    ///
    /// # Errors
    /// - `DialError::BadHost` if the host is unreachable, the handshake or
    ///   authentication fails, or the dial exceeds `params.timeout`
    /// - `DialError::BadRemoteDir` if the remote root is missing or not a
    ///   directory
    /// - `DialError::MissingCredential` if no usable credential exists
    pub async fn dial(
        connector: Arc<dyn RemoteConnector>,
        params: ConnectParams,
        mapper: PathMapper,
    ) -> Result<Self, DialError> {
        let mut mirror = Self {
            connector,
            params,
            mapper,
            service: None,
        };
        mirror.connect().await?;
        Ok(mirror)
    }

    /// (Re-)establishes the session, replacing any previous one
    pub(crate) async fn connect(&mut self) -> Result<(), DialError> {
        let address = self.params.address();
        debug!(address = %address, "Dialing remote host");

        let service = tokio::time::timeout(self.params.timeout, self.connector.connect(&self.params))
            .await
            .map_err(|_| {
                DialError::BadHost(format!(
                    "{address}: timed out after {:?}",
                    self.params.timeout
                ))
            })??;

        let root = self.mapper.remote_root();
        let verdict = match service.stat(root).await {
            Ok(stat) if stat.exists && stat.is_dir => Ok(()),
            Ok(stat) if stat.exists => Err(format!("{root} is not a directory")),
            Ok(_) => Err(format!("{root} does not exist")),
            Err(e) => Err(format!("{root}: {e}")),
        };

        if let Err(reason) = verdict {
            if let Err(e) = service.close().await {
                debug!(error = %e, "Failed to close rejected session");
            }
            return Err(DialError::BadRemoteDir(reason));
        }

        info!(address = %address, root = %root, "Remote session established");
        self.service = Some(service);
        Ok(())
    }

    /// Releases the session; later calls fail with a severed transport
    pub async fn close(&mut self) -> Result<(), RemoteError> {
        match self.service.take() {
            Some(service) => service.close().await,
            None => Ok(()),
        }
    }

    /// Whether a session is currently held
    pub fn is_connected(&self) -> bool {
        self.service.is_some()
    }

    /// The path mapper for this mirror
    pub fn mapper(&self) -> &PathMapper {
        &self.mapper
    }

    /// Connection parameters used for every (re-)dial
    pub fn params(&self) -> &ConnectParams {
        &self.params
    }

    /// Maps a local path to its remote counterpart
    pub fn map_path(&self, local: &Path) -> Result<String, SyncError> {
        Ok(self.mapper.map(local)?)
    }

    fn service(&self) -> Result<&dyn RemoteFileService, SyncError> {
        self.service
            .as_deref()
            .ok_or_else(|| RemoteError::TransportSevered("no active session".into()).into())
    }

    // ========================================================================
    // Primitives
    // ========================================================================

    /// Stats the remote image of `local`
    pub async fn stat(&self, local: &Path) -> Result<RemoteStat, SyncError> {
        let remote = self.map_path(local)?;
        Ok(self.service()?.stat(&remote).await?)
    }

    /// Lists the remote children of the image of `local`
    pub async fn list(&self, local: &Path) -> Result<Vec<RemoteEntry>, SyncError> {
        let remote = self.map_path(local)?;
        Ok(self.service()?.list_children(&remote).await?)
    }

    /// Creates a single remote directory
    ///
    /// Fails if the remote parent is missing or the entry already exists.
    #[instrument(level = "debug", skip_all, fields(path = %local.display()))]
    pub async fn create_dir(&self, local: &Path) -> Result<(), SyncError> {
        let remote = self.map_path(local)?;
        debug!(remote = %remote, "Creating remote directory");
        Ok(self.service()?.mkdir(&remote).await?)
    }

    /// Removes the remote image of `local` and everything below it
    ///
    /// A missing remote path is success, so removing twice is harmless.
    /// Directories are emptied depth-first before being removed.
    #[instrument(level = "debug", skip_all, fields(path = %local.display()))]
    pub async fn remove(&self, local: &Path) -> Result<(), SyncError> {
        let remote = self.map_path(local)?;
        self.remove_remote(&remote).await
    }

    async fn remove_remote(&self, root: &str) -> Result<(), SyncError> {
        let service = self.service()?;

        let stat = service.stat(root).await?;
        if !stat.exists {
            debug!(remote = %root, "Remote path already absent");
            return Ok(());
        }
        if !stat.is_dir {
            debug!(remote = %root, "Removing remote file");
            return Ok(service.remove_file(root).await?);
        }

        // (path, children already queued)
        let mut stack: Vec<(String, bool)> = vec![(root.to_string(), false)];
        while let Some((dir, expanded)) = stack.pop() {
            if expanded {
                debug!(remote = %dir, "Removing remote directory");
                service.remove_dir(&dir).await?;
                continue;
            }

            stack.push((dir.clone(), true));
            let children = match service.list_children(&dir).await {
                Ok(children) => children,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            };
            for child in children {
                let path = join_remote(&dir, &child.name);
                if child.is_dir {
                    stack.push((path, false));
                } else {
                    service.remove_file(&path).await?;
                }
            }
        }

        Ok(())
    }

    /// Uploads the content of a local file to its remote image
    ///
    /// The remote file is created or truncated, written in full, closed, and
    /// then stamped with the local modification time. Returns the number of
    /// bytes written.
    #[instrument(level = "debug", skip_all, fields(path = %local.display()))]
    pub async fn upload_file(&self, local: &Path) -> Result<u64, SyncError> {
        let remote = self.map_path(local)?;
        let service = self.service()?;

        let mut file = tokio::fs::File::open(local)
            .await
            .map_err(|e| SyncError::local(local, e))?;
        let metadata = file
            .metadata()
            .await
            .map_err(|e| SyncError::local(local, e))?;

        let mut writer = service.create(&remote).await?;
        let mut buf = vec![0u8; UPLOAD_CHUNK];
        let mut written: u64 = 0;
        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| SyncError::local(local, e))?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buf[..n])
                .await
                .map_err(|e| classify_write_error(&remote, e))?;
            written += n as u64;
        }
        writer
            .shutdown()
            .await
            .map_err(|e| classify_write_error(&remote, e))?;
        drop(writer);

        if let Some(modified) = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        {
            if let Err(e) = service.set_modified(&remote, modified.as_secs()).await {
                if e.is_transport_severed() {
                    return Err(e.into());
                }
                warn!(remote = %remote, error = %e, "Failed to set remote modification time");
            }
        }

        debug!(remote = %remote, bytes = written, "Uploaded file");
        Ok(written)
    }

    /// Renames the remote image of `from` to the remote image of `to`
    #[instrument(level = "debug", skip_all, fields(from = %from.display(), to = %to.display()))]
    pub async fn rename(&self, from: &Path, to: &Path) -> Result<(), SyncError> {
        let remote_from = self.map_path(from)?;
        let remote_to = self.map_path(to)?;
        debug!(from = %remote_from, to = %remote_to, "Renaming remote entry");
        Ok(self.service()?.rename(&remote_from, &remote_to).await?)
    }
}

/// Joins a remote directory and a child name with `/`
pub(crate) fn join_remote(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Classifies an error raised while streaming to a remote writer
fn classify_write_error(remote: &str, err: std::io::Error) -> SyncError {
    let severed = matches!(
        err.kind(),
        ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::UnexpectedEof
            | ErrorKind::TimedOut
    );
    if severed {
        RemoteError::TransportSevered(format!("{remote}: {err}")).into()
    } else {
        RemoteError::failure(remote, err).into()
    }
}
