//! Event coalescing and dispatch
//!
//! The [`Coalescer`] buffers raw events until the stream has been quiet for
//! the debounce interval, reduces the buffer to a minimal list of
//! [`CoalescedOperation`]s with [`coalesce`], and dispatches each operation
//! against the [`ResilientMirror`] in order.
//!
//! ## Merge rules
//!
//! Walking the buffer in arrival order, with "predecessor" meaning the
//! immediately preceding event:
//!
//! - a `Write` right after a `Create` of the same path is folded into the
//!   create (the create uploads the final content anyway)
//! - an event identical in kind and path to its predecessor is dropped
//! - `RenameOld(a)` followed by `RenameNew(b)` becomes `Rename { a → b }`
//! - an unpaired `RenameOld` means the entry left the tree: `Remove`
//! - an unpaired `RenameNew` means the entry entered the tree: `Create`

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::reconcile::{local_metadata, ReconcileReport, Reconciler};
use crate::resilience::ResilientMirror;
use crate::watcher::{RawEvent, RawEventKind};
use crate::SyncError;

// ============================================================================
// Operations
// ============================================================================

/// A remote action derived from one or more raw events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoalescedOperation {
    /// Mirror a newly appeared entry
    Create(PathBuf),
    /// Re-upload a file's content
    Write(PathBuf),
    /// Delete the remote image of an entry
    Remove(PathBuf),
    /// Move a remote entry
    Rename {
        /// Previous local path
        from: PathBuf,
        /// New local path
        to: PathBuf,
    },
}

impl CoalescedOperation {
    /// The path the operation leaves in place (the destination for renames)
    pub fn path(&self) -> &Path {
        match self {
            CoalescedOperation::Create(p)
            | CoalescedOperation::Write(p)
            | CoalescedOperation::Remove(p) => p,
            CoalescedOperation::Rename { to, .. } => to,
        }
    }
}

/// What dispatching one operation did on the remote side
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// An empty directory was created
    CreatedDir,
    /// A file was uploaded (bytes written)
    Uploaded(u64),
    /// A non-empty directory was reconciled
    Reconciled(ReconcileReport),
    /// The remote image was removed
    Removed,
    /// The remote entry was renamed
    Renamed,
    /// Nothing to do (a write to a directory, a symlinked directory or a
    /// special file)
    Skipped,
}

// ============================================================================
// Pure coalescing
// ============================================================================

/// Rename pairing state while walking a buffer
enum PairingState {
    Idle,
    AwaitingRenameTarget(PathBuf),
}

/// Reduces a buffer of raw events to an ordered list of operations
pub fn coalesce(events: &[RawEvent]) -> Vec<CoalescedOperation> {
    let mut ops: Vec<CoalescedOperation> = Vec::new();
    let mut state = PairingState::Idle;
    // Predecessor as interpreted: unpaired RenameNew counts as a Create
    let mut prev: Option<(RawEventKind, &Path)> = None;

    for event in events {
        let path = event.path.as_path();

        if let PairingState::AwaitingRenameTarget(from) =
            std::mem::replace(&mut state, PairingState::Idle)
        {
            if event.kind == RawEventKind::RenameNew {
                push_op(&mut ops, CoalescedOperation::Rename {
                    from,
                    to: path.to_path_buf(),
                });
                prev = Some((RawEventKind::RenameNew, path));
                continue;
            }
            push_op(&mut ops, CoalescedOperation::Remove(from));
        }

        let interpreted = match event.kind {
            RawEventKind::RenameOld => {
                state = PairingState::AwaitingRenameTarget(path.to_path_buf());
                prev = Some((RawEventKind::RenameOld, path));
                continue;
            }
            RawEventKind::RenameNew => RawEventKind::Create,
            kind => kind,
        };

        let emit = match prev {
            None => true,
            Some((RawEventKind::Create, p)) if interpreted == RawEventKind::Write && p == path => {
                false
            }
            Some((kind, p)) => kind != interpreted || p != path,
        };

        if emit {
            let op = match interpreted {
                RawEventKind::Create => CoalescedOperation::Create(path.to_path_buf()),
                RawEventKind::Write => CoalescedOperation::Write(path.to_path_buf()),
                _ => CoalescedOperation::Remove(path.to_path_buf()),
            };
            push_op(&mut ops, op);
        }
        prev = Some((interpreted, path));
    }

    if let PairingState::AwaitingRenameTarget(from) = state {
        push_op(&mut ops, CoalescedOperation::Remove(from));
    }

    ops
}

/// Appends `op` unless it repeats the previous operation verbatim
fn push_op(ops: &mut Vec<CoalescedOperation>, op: CoalescedOperation) {
    if ops.last() != Some(&op) {
        ops.push(op);
    }
}

// ============================================================================
// Coalescer
// ============================================================================

/// Debounced consumer of raw events for one session
pub struct Coalescer {
    mirror: ResilientMirror,
    buffer: Vec<RawEvent>,
    debounce: Duration,
    dispatched: u64,
    failed: u64,
}

impl Coalescer {
    /// Creates a coalescer dispatching into `mirror`
    pub fn new(mirror: ResilientMirror, debounce: Duration) -> Self {
        Self {
            mirror,
            buffer: Vec::new(),
            debounce,
            dispatched: 0,
            failed: 0,
        }
    }

    /// Appends a raw event to the pending buffer
    pub fn ingest(&mut self, event: RawEvent) {
        debug!(path = %event.path.display(), kind = ?event.kind, seq = event.seq, "Buffered raw event");
        self.buffer.push(event);
    }

    /// Number of buffered raw events
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Operations dispatched successfully so far
    pub fn dispatched_count(&self) -> u64 {
        self.dispatched
    }

    /// Operations whose dispatch failed so far
    pub fn failed_count(&self) -> u64 {
        self.failed
    }

    /// Mutable access to the wrapped mirror
    pub fn mirror_mut(&mut self) -> &mut ResilientMirror {
        &mut self.mirror
    }

    /// Consumes the coalescer, returning its mirror
    pub fn into_mirror(self) -> ResilientMirror {
        self.mirror
    }

    /// Coalesces the current buffer and dispatches every resulting operation
    ///
    /// The buffer is swapped out before dispatch starts, so events arriving
    /// meanwhile belong to the next pass. Failures are logged and do not stop
    /// the remaining operations. Returns the number of successful dispatches.
    pub async fn flush(&mut self) -> usize {
        let events = std::mem::take(&mut self.buffer);
        if events.is_empty() {
            return 0;
        }

        let ops = coalesce(&events);
        debug!(events = events.len(), operations = ops.len(), "Coalesced event buffer");

        let mut succeeded = 0;
        for op in ops {
            match self.handle(&op).await {
                Ok(outcome) => {
                    succeeded += 1;
                    self.dispatched += 1;
                    info!(operation = ?op, outcome = ?outcome, "Mirrored change");
                }
                Err(e) if e.is_local_access() => {
                    self.failed += 1;
                    warn!(operation = ?op, error = %e, "Local path changed before dispatch");
                }
                Err(e) => {
                    self.failed += 1;
                    error!(operation = ?op, error = %e, "Failed to mirror change");
                }
            }
        }
        succeeded
    }

    /// Dispatches a single operation
    pub async fn handle(&mut self, op: &CoalescedOperation) -> Result<DispatchOutcome, SyncError> {
        match op {
            CoalescedOperation::Remove(path) => {
                self.mirror.remove(path).await?;
                Ok(DispatchOutcome::Removed)
            }
            CoalescedOperation::Rename { from, to } => {
                tokio::fs::symlink_metadata(to)
                    .await
                    .map_err(|e| SyncError::local(to, e))?;
                self.mirror.rename(from, to).await?;
                Ok(DispatchOutcome::Renamed)
            }
            CoalescedOperation::Write(path) => match local_metadata(path).await? {
                Some(metadata) if metadata.is_file() => {
                    let bytes = self.mirror.upload_file(path).await?;
                    Ok(DispatchOutcome::Uploaded(bytes))
                }
                _ => Ok(DispatchOutcome::Skipped),
            },
            CoalescedOperation::Create(path) => {
                let Some(metadata) = local_metadata(path).await? else {
                    debug!(path = %path.display(), "Not mirrored, skipping");
                    return Ok(DispatchOutcome::Skipped);
                };
                if !metadata.is_dir() {
                    let bytes = self.mirror.upload_file(path).await?;
                    return Ok(DispatchOutcome::Uploaded(bytes));
                }

                if is_empty_dir(path).await? {
                    self.mirror.create_dir(path).await?;
                    Ok(DispatchOutcome::CreatedDir)
                } else {
                    // Content may predate the watch on this directory
                    let report = Reconciler::reconcile(&mut self.mirror, path).await;
                    Ok(DispatchOutcome::Reconciled(report))
                }
            }
        }
    }

    /// Runs the debounce loop until the event stream ends or `shutdown` fires
    ///
    /// Every received event resets the debounce deadline; once the stream
    /// has been quiet for the debounce interval the buffer is flushed. Events
    /// already received are flushed before returning. Returns the mirror so
    /// the caller can close it.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<RawEvent>,
        shutdown: CancellationToken,
    ) -> ResilientMirror {
        let deadline = tokio::time::sleep(self.debounce);
        tokio::pin!(deadline);

        info!(debounce_ms = self.debounce.as_millis() as u64, "Coalescer started");

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!(pending = self.buffer.len(), "Coalescer received shutdown signal");
                    break;
                }

                event = events.recv() => match event {
                    Some(event) => {
                        self.ingest(event);
                        deadline.as_mut().reset(Instant::now() + self.debounce);
                    }
                    None => {
                        debug!("Event stream closed");
                        break;
                    }
                },

                _ = &mut deadline, if !self.buffer.is_empty() => {
                    self.flush().await;
                }
            }
        }

        while let Ok(event) = events.try_recv() {
            self.ingest(event);
        }
        self.flush().await;
        info!(
            dispatched = self.dispatched,
            failed = self.failed,
            "Coalescer stopped"
        );
        self.mirror
    }
}

async fn is_empty_dir(path: &Path) -> Result<bool, SyncError> {
    let mut entries = tokio::fs::read_dir(path)
        .await
        .map_err(|e| SyncError::local(path, e))?;
    let first = entries
        .next_entry()
        .await
        .map_err(|e| SyncError::local(path, e))?;
    Ok(first.is_none())
}
