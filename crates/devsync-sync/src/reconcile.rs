//! Subtree reconciliation
//!
//! Walks a local subtree and makes sure every local entry has a remote
//! image of the same kind and content. The pass is additive: remote entries
//! without a local counterpart are left alone, except where a remote entry
//! of the wrong kind blocks the local one.
//!
//! Files whose remote image already has the same size and modification time
//! are skipped, so running the pass twice over an unchanged tree performs no
//! remote mutation the second time.

use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use devsync_core::ports::remote::RemoteStat;
use tracing::{debug, info, warn};

use crate::resilience::ResilientMirror;
use crate::SyncError;

/// Outcome of a reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Remote directories created
    pub dirs_created: u64,
    /// Files uploaded
    pub files_uploaded: u64,
    /// Bytes uploaded
    pub bytes_uploaded: u64,
    /// Files already up to date
    pub files_skipped: u64,
    /// Remote entries removed because their kind differed from the local one
    pub removed: u64,
    /// Local entries skipped (symlinked directories, special files)
    pub ignored: u64,
    /// Per-entry errors; the pass continues past each of them
    pub errors: Vec<String>,
}

impl ReconcileReport {
    /// Number of remote mutations the pass performed
    pub fn mutations(&self) -> u64 {
        self.dirs_created + self.files_uploaded + self.removed
    }

    /// Whether every entry was handled without error
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    fn record(&mut self, path: &Path, err: &SyncError) {
        warn!(path = %path.display(), error = %err, "Reconcile step failed");
        self.errors.push(format!("{}: {err}", path.display()));
    }
}

/// Drives reconciliation passes against a [`ResilientMirror`]
pub struct Reconciler;

impl Reconciler {
    /// Reconciles the subtree rooted at `root`
    ///
    /// Errors on individual entries are collected in the report. The walk
    /// uses an explicit worklist, so deep trees do not grow the call stack.
    pub async fn reconcile(mirror: &mut ResilientMirror, root: &Path) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut pending: Vec<PathBuf> = vec![root.to_path_buf()];

        info!(root = %root.display(), "Starting reconciliation");

        while let Some(path) = pending.pop() {
            let metadata = match local_metadata(&path).await {
                Ok(Some(m)) => m,
                Ok(None) => {
                    report.ignored += 1;
                    continue;
                }
                Err(e) => {
                    report.record(&path, &e);
                    continue;
                }
            };

            if metadata.is_dir() {
                match reconcile_dir(mirror, &path, &mut report).await {
                    Ok(()) => match sorted_children(&path).await {
                        // Reverse so the worklist pops them in name order
                        Ok(children) => pending.extend(children.into_iter().rev()),
                        Err(e) => report.record(&path, &e),
                    },
                    Err(e) => report.record(&path, &e),
                }
            } else if let Err(e) = reconcile_file(mirror, &path, &metadata, &mut report).await {
                report.record(&path, &e);
            }
        }

        info!(
            root = %root.display(),
            dirs_created = report.dirs_created,
            files_uploaded = report.files_uploaded,
            files_skipped = report.files_skipped,
            removed = report.removed,
            errors = report.errors.len(),
            "Reconciliation finished"
        );
        report
    }
}

/// Metadata of a local entry, following symlinks to files only
///
/// Returns `Ok(None)` for entries that are not mirrored: symlinked
/// directories and special files.
pub(crate) async fn local_metadata(path: &Path) -> Result<Option<Metadata>, SyncError> {
    let link = tokio::fs::symlink_metadata(path)
        .await
        .map_err(|e| SyncError::local(path, e))?;

    let metadata = if link.file_type().is_symlink() {
        let target = tokio::fs::metadata(path)
            .await
            .map_err(|e| SyncError::local(path, e))?;
        if target.is_dir() {
            debug!(path = %path.display(), "Skipping symlinked directory");
            return Ok(None);
        }
        target
    } else {
        link
    };

    if metadata.is_dir() || metadata.is_file() {
        Ok(Some(metadata))
    } else {
        debug!(path = %path.display(), "Skipping special file");
        Ok(None)
    }
}

async fn sorted_children(dir: &Path) -> Result<Vec<PathBuf>, SyncError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| SyncError::local(dir, e))?;
    let mut children = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| SyncError::local(dir, e))?
    {
        children.push(entry.path());
    }
    children.sort();
    Ok(children)
}

async fn reconcile_dir(
    mirror: &mut ResilientMirror,
    path: &Path,
    report: &mut ReconcileReport,
) -> Result<(), SyncError> {
    let stat = mirror.stat(path).await?;
    if stat.exists && stat.is_dir {
        return Ok(());
    }
    if stat.exists {
        debug!(path = %path.display(), "Remote file blocks local directory, replacing");
        mirror.remove(path).await?;
        report.removed += 1;
    }
    mirror.create_dir(path).await?;
    report.dirs_created += 1;
    Ok(())
}

async fn reconcile_file(
    mirror: &mut ResilientMirror,
    path: &Path,
    metadata: &Metadata,
    report: &mut ReconcileReport,
) -> Result<(), SyncError> {
    let stat = mirror.stat(path).await?;
    if stat.is_dir {
        debug!(path = %path.display(), "Remote directory blocks local file, replacing");
        mirror.remove(path).await?;
        report.removed += 1;
    } else if is_up_to_date(&stat, metadata) {
        report.files_skipped += 1;
        return Ok(());
    }

    let bytes = mirror.upload_file(path).await?;
    report.files_uploaded += 1;
    report.bytes_uploaded += bytes;
    Ok(())
}

/// Quick check: same size and same whole-second modification time
fn is_up_to_date(stat: &RemoteStat, local: &Metadata) -> bool {
    if !stat.is_file() || stat.size != local.len() {
        return false;
    }
    let local_mtime = local
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs());
    local_mtime.is_some() && stat.modified == local_mtime
}
