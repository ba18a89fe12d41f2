//! Filesystem event source
//!
//! Wraps the `notify` crate to watch a local root recursively and converts
//! native notifications into [`RawEvent`] values.
//!
//! ## Architecture
//!
//! ```text
//! inotify / kqueue / ReadDirectoryChangesW
//!       │
//!       ▼
//!  FsEventSource  ──→  mpsc::channel  ──→  Coalescer  ──→  ResilientMirror
//! ```
//!
//! Events are delivered in the order the platform reported them. Each event
//! carries a sequence number assigned on arrival so later stages can reason
//! about ordering without looking at wall-clock time.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

// ============================================================================
// RawEvent
// ============================================================================

/// Kind of a platform-neutral filesystem notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RawEventKind {
    /// A file or directory appeared
    Create,
    /// File content was written
    Write,
    /// A file or directory disappeared
    Remove,
    /// The source half of a rename
    RenameOld,
    /// The destination half of a rename
    RenameNew,
}

/// A single notification as delivered by the event source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Absolute local path the notification refers to
    pub path: PathBuf,
    /// What happened
    pub kind: RawEventKind,
    /// Arrival order within one event source
    pub seq: u64,
}

impl RawEvent {
    /// Creates an event with the given sequence number
    pub fn new(path: impl Into<PathBuf>, kind: RawEventKind, seq: u64) -> Self {
        Self {
            path: path.into(),
            kind,
            seq,
        }
    }
}

// ============================================================================
// FsEventSource
// ============================================================================

/// Recursive watch over a local root
///
/// Dropping the source (or calling [`unsubscribe`](Self::unsubscribe))
/// releases the native watch. Once the watcher is gone its channel sender is
/// dropped too, so the receiving side observes end-of-stream.
pub struct FsEventSource {
    watcher: Option<RecommendedWatcher>,
    root: PathBuf,
}

impl FsEventSource {
    /// Starts watching `root` and every directory below it
    ///
    /// Returns the source together with the receiving half of a bounded
    /// channel of `capacity` events. The native callback blocks when the
    /// channel is full, which applies back-pressure to the OS queue instead of
    /// growing memory without limit.
    ///
    /// # Errors
    /// Returns an error if the OS watcher cannot be created or the root
    /// cannot be watched (missing, permissions, watch limit reached).
    pub fn subscribe(root: &Path, capacity: usize) -> Result<(Self, mpsc::Receiver<RawEvent>)> {
        let (tx, rx) = mpsc::channel::<RawEvent>(capacity.max(1));
        let mut seq: u64 = 0;

        info!(root = %root.display(), capacity, "Initializing file watcher");

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    let Some((kind, path)) = map_notify_event(&event) else {
                        return;
                    };
                    seq += 1;
                    if let Err(e) = tx.blocking_send(RawEvent::new(path, kind, seq)) {
                        warn!(error = %e, "Failed to send raw event (receiver dropped)");
                    }
                }
                Err(err) => {
                    error!(error = %err, "File watcher error");
                }
            },
            notify::Config::default(),
        )
        .context("Failed to create file watcher")?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("Failed to watch path: {}", root.display()))?;

        Ok((
            Self {
                watcher: Some(watcher),
                root: root.to_path_buf(),
            },
            rx,
        ))
    }

    /// The watched root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the native watch is still installed
    pub fn is_active(&self) -> bool {
        self.watcher.is_some()
    }

    /// Stops watching and releases the native watcher
    ///
    /// Calling this twice is a no-op.
    ///
    /// # Errors
    /// Returns an error if the platform refuses to remove the watch; the
    /// watcher is released regardless.
    pub fn unsubscribe(&mut self) -> Result<()> {
        let Some(mut watcher) = self.watcher.take() else {
            return Ok(());
        };

        info!(root = %self.root.display(), "Stopping watch");
        watcher
            .unwatch(&self.root)
            .with_context(|| format!("Failed to unwatch path: {}", self.root.display()))
    }
}

// ============================================================================
// Event mapping - notify::Event → RawEvent
// ============================================================================

/// Converts a `notify::Event` into a raw event kind and path
///
/// Maps the notify event kinds as follows:
/// - `Create(*)` -> `Create`
/// - `Modify(Data(*))`, `Modify(Any)`, `Access(Close(Write))` -> `Write`
/// - `Modify(Name(From))` -> `RenameOld`
/// - `Modify(Name(To))` -> `RenameNew`
/// - `Modify(Name(Any))` -> `RenameNew` if the path exists, else `RenameOld`
/// - `Remove(*)` -> `Remove`
///
/// `Modify(Name(Both))` is ignored: backends that emit it also emit the
/// `From`/`To` halves. Metadata and other access events are ignored as well.
pub fn map_notify_event(event: &notify::Event) -> Option<(RawEventKind, PathBuf)> {
    let path = event.paths.first()?;

    let kind = match &event.kind {
        EventKind::Create(_) => RawEventKind::Create,
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any) => {
            RawEventKind::Write
        }
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => RawEventKind::Write,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => RawEventKind::RenameOld,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => RawEventKind::RenameNew,
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => {
            if path.exists() {
                RawEventKind::RenameNew
            } else {
                RawEventKind::RenameOld
            }
        }
        EventKind::Remove(_) => RawEventKind::Remove,
        _ => {
            debug!(kind = ?event.kind, "Ignoring event kind");
            return None;
        }
    };

    debug!(path = %path.display(), kind = ?kind, "Mapped notify event");
    Some((kind, path.clone()))
}
