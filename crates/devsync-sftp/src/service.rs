//! SFTP implementation of the remote file service port
//!
//! Error classification:
//!
//! | SFTP / SSH condition                                  | RemoteError        |
//! |-------------------------------------------------------|--------------------|
//! | `NoSuchFile`                                          | `NotFound`         |
//! | `ConnectionLost`, `NoConnection`, I/O, timeout        | `TransportSevered` |
//! | anything while the SSH session is closed              | `TransportSevered` |
//! | everything else                                       | `Failure`          |

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use devsync_core::ports::remote::{
    RemoteEntry, RemoteError, RemoteFileService, RemoteStat, RemoteWriter,
};
use russh::client::Handle;
use russh::Disconnect;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::client::fs::File;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{FileAttributes, StatusCode};
use tokio::io::AsyncWrite;
use tracing::debug;

use crate::client::SshClient;

/// One authenticated SFTP session
pub struct SftpService {
    session: Arc<Handle<SshClient>>,
    sftp: SftpSession,
}

impl SftpService {
    pub(crate) fn new(session: Handle<SshClient>, sftp: SftpSession) -> Self {
        Self {
            session: Arc::new(session),
            sftp,
        }
    }

    fn classify(&self, path: &str, err: SftpError) -> RemoteError {
        classify_error(path, err, self.session.is_closed())
    }
}

/// Maps an SFTP client error onto the port's error taxonomy
fn classify_error(path: &str, err: SftpError, session_closed: bool) -> RemoteError {
    match err {
        SftpError::Status(status) => match status.status_code {
            StatusCode::NoSuchFile => RemoteError::NotFound(path.to_string()),
            StatusCode::ConnectionLost | StatusCode::NoConnection => {
                RemoteError::TransportSevered(format!("{path}: {}", status.error_message))
            }
            code => RemoteError::failure(path, format!("{code:?}: {}", status.error_message)),
        },
        SftpError::IO(reason) => RemoteError::TransportSevered(format!("{path}: {reason}")),
        SftpError::Timeout => RemoteError::TransportSevered(format!("{path}: timed out")),
        other if session_closed => RemoteError::TransportSevered(format!("{path}: {other}")),
        other => RemoteError::failure(path, other),
    }
}

/// Clamps unix seconds into the 32-bit SFTP v3 time field
fn sftp_time(seconds: u64) -> u32 {
    u32::try_from(seconds).unwrap_or(u32::MAX)
}

#[async_trait]
impl RemoteFileService for SftpService {
    async fn stat(&self, path: &str) -> Result<RemoteStat, RemoteError> {
        match self.sftp.metadata(path).await {
            Ok(attrs) => Ok(RemoteStat {
                exists: true,
                is_dir: attrs.is_dir(),
                size: attrs.size.unwrap_or(0),
                modified: attrs.mtime.map(u64::from),
            }),
            Err(e) => match self.classify(path, e) {
                RemoteError::NotFound(_) => Ok(RemoteStat::missing()),
                other => Err(other),
            },
        }
    }

    async fn mkdir(&self, path: &str) -> Result<(), RemoteError> {
        self.sftp
            .create_dir(path)
            .await
            .map_err(|e| self.classify(path, e))
    }

    async fn remove_file(&self, path: &str) -> Result<(), RemoteError> {
        match self.sftp.remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) => match self.classify(path, e) {
                RemoteError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn remove_dir(&self, path: &str) -> Result<(), RemoteError> {
        match self.sftp.remove_dir(path).await {
            Ok(()) => Ok(()),
            Err(e) => match self.classify(path, e) {
                RemoteError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn create(&self, path: &str) -> Result<RemoteWriter, RemoteError> {
        let file = self
            .sftp
            .create(path)
            .await
            .map_err(|e| self.classify(path, e))?;
        Ok(Box::new(SftpWriter {
            file: Box::pin(file),
            session: Arc::clone(&self.session),
        }))
    }

    async fn set_modified(&self, path: &str, modified: u64) -> Result<(), RemoteError> {
        let attrs = FileAttributes {
            atime: Some(sftp_time(modified)),
            mtime: Some(sftp_time(modified)),
            ..FileAttributes::empty()
        };
        self.sftp
            .set_metadata(path, attrs)
            .await
            .map_err(|e| self.classify(path, e))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), RemoteError> {
        self.sftp
            .rename(from, to)
            .await
            .map_err(|e| self.classify(from, e))
    }

    async fn list_children(&self, path: &str) -> Result<Vec<RemoteEntry>, RemoteError> {
        let entries = self
            .sftp
            .read_dir(path)
            .await
            .map_err(|e| self.classify(path, e))?;

        Ok(entries
            .filter_map(|entry| {
                let name = entry.file_name();
                if name == "." || name == ".." {
                    return None;
                }
                Some(RemoteEntry {
                    is_dir: entry.file_type().is_dir(),
                    name,
                })
            })
            .collect())
    }

    async fn close(&self) -> Result<(), RemoteError> {
        if let Err(e) = self.sftp.close().await {
            debug!(error = %e, "SFTP close failed");
        }
        if self.session.is_closed() {
            return Ok(());
        }
        self.session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
            .map_err(|e| RemoteError::TransportSevered(e.to_string()))
    }
}

// ============================================================================
// SftpWriter
// ============================================================================

/// Remote file writer that reports writes on a dead session as `BrokenPipe`
struct SftpWriter {
    file: Pin<Box<File>>,
    session: Arc<Handle<SshClient>>,
}

impl SftpWriter {
    fn map_err(&self, err: std::io::Error) -> std::io::Error {
        if self.session.is_closed() {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, err)
        } else {
            err
        }
    }
}

impl AsyncWrite for SftpWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.file.as_mut().poll_write(cx, buf) {
            Poll::Ready(Err(e)) => Poll::Ready(Err(self.map_err(e))),
            other => other,
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.file.as_mut().poll_flush(cx) {
            Poll::Ready(Err(e)) => Poll::Ready(Err(self.map_err(e))),
            other => other,
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.file.as_mut().poll_shutdown(cx) {
            Poll::Ready(Err(e)) => Poll::Ready(Err(self.map_err(e))),
            other => other,
        }
    }
}
