//! Watch sessions and their orchestrator
//!
//! A [`WatchSession`] binds one [`SyncTarget`] to one remote mirror. The
//! [`Orchestrator`] owns every session of a run:
//!
//! ```text
//! add(target)   validate, map roots, dial        -> Ready
//! start()       subscribe watcher, spawn task    -> Running
//! sync_once()   reconcile the first Ready target (no watcher)
//! stop()        cancel, unsubscribe, join, close -> Stopped
//! ```
//!
//! Sessions are independent: each has its own watcher, event channel,
//! coalescer task and remote connection.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use devsync_core::config::{SessionSettings, SyncTarget};
use devsync_core::domain::errors::DomainError;
use devsync_core::domain::path::PathMapper;
use devsync_core::ports::remote::RemoteConnector;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::coalescer::Coalescer;
use crate::mirror::RemoteMirror;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::resilience::{ReconnectPolicy, ResilientMirror};
use crate::watcher::FsEventSource;
use crate::SyncError;

/// Lifecycle state of a session
enum SessionState {
    /// Connected, not watching yet
    Ready(ResilientMirror),
    /// Watching; the coalescer task owns the mirror
    Running {
        source: FsEventSource,
        task: JoinHandle<ResilientMirror>,
        shutdown: CancellationToken,
    },
    /// Torn down
    Stopped,
}

/// One local root mirrored onto one remote root
pub struct WatchSession {
    target: SyncTarget,
    local_root: PathBuf,
    state: SessionState,
}

impl WatchSession {
    /// The configured target
    pub fn target(&self) -> &SyncTarget {
        &self.target
    }

    /// The normalised local root
    pub fn local_root(&self) -> &Path {
        &self.local_root
    }

    /// Whether the session is watching
    pub fn is_running(&self) -> bool {
        matches!(self.state, SessionState::Running { .. })
    }

    /// Whether the session has been torn down
    pub fn is_stopped(&self) -> bool {
        matches!(self.state, SessionState::Stopped)
    }

    async fn stop(&mut self) {
        let root = self.local_root.display().to_string();
        let mirror = match std::mem::replace(&mut self.state, SessionState::Stopped) {
            SessionState::Ready(mirror) => Some(mirror),
            SessionState::Running {
                mut source,
                task,
                shutdown,
            } => {
                shutdown.cancel();
                // notify unwatches synchronously
                match tokio::task::spawn_blocking(move || source.unsubscribe()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(root = %root, error = %e, "Failed to remove watch"),
                    Err(e) => error!(root = %root, error = %e, "Unwatch task failed"),
                }
                match task.await {
                    Ok(mirror) => Some(mirror),
                    Err(e) => {
                        error!(root = %root, error = %e, "Session task failed");
                        None
                    }
                }
            }
            SessionState::Stopped => None,
        };

        if let Some(mut mirror) = mirror {
            if let Err(e) = mirror.close().await {
                warn!(root = %root, error = %e, "Failed to close remote session");
            }
            info!(root = %root, "Session stopped");
        }
    }
}

/// Owns every session of a run
pub struct Orchestrator {
    connector: Arc<dyn RemoteConnector>,
    settings: SessionSettings,
    sessions: Vec<WatchSession>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    /// Creates an orchestrator dialing through `connector`
    pub fn new(connector: Arc<dyn RemoteConnector>, settings: SessionSettings) -> Self {
        Self {
            connector,
            settings,
            sessions: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Engine settings shared by all sessions
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Sessions added so far
    pub fn sessions(&self) -> &[WatchSession] {
        &self.sessions
    }

    /// Validates a target, dials its remote root and registers a session
    ///
    /// # Errors
    /// - `SyncError::DomainError` if the target fails validation or its
    ///   roots cannot be mapped
    /// - `SyncError::Dial` if the remote session cannot be established
    pub async fn add(&mut self, target: SyncTarget) -> Result<(), SyncError> {
        target.ensure_valid()?;
        // Watch backends report resolved paths
        let local = std::fs::canonicalize(&target.local_path)
            .map_err(|e| SyncError::local(&target.local_path, e))?;
        let mapper = PathMapper::new(&local, &target.remote_path)?;
        let local_root = mapper.local_root().to_path_buf();
        let params = target.connect_params(self.settings.dial_timeout);

        info!(
            local = %local_root.display(),
            remote = %target.display_remote(),
            "Adding sync target"
        );

        let mirror = RemoteMirror::dial(Arc::clone(&self.connector), params, mapper).await?;
        let mirror = ResilientMirror::new(mirror, ReconnectPolicy::from(&self.settings))
            .with_shutdown(self.shutdown.child_token());

        self.sessions.push(WatchSession {
            target,
            local_root,
            state: SessionState::Ready(mirror),
        });
        Ok(())
    }

    /// Starts watching every ready session
    ///
    /// # Errors
    /// Returns `SyncError::Watch` if a watcher cannot be installed. Sessions
    /// started before the failure keep running until [`stop`](Self::stop).
    pub fn start(&mut self) -> Result<(), SyncError> {
        for session in &mut self.sessions {
            if !matches!(session.state, SessionState::Ready(_)) {
                continue;
            }

            let (source, events) =
                FsEventSource::subscribe(&session.local_root, self.settings.event_buffer)
                    .map_err(SyncError::Watch)?;

            let SessionState::Ready(mirror) =
                std::mem::replace(&mut session.state, SessionState::Stopped)
            else {
                continue;
            };

            let shutdown = self.shutdown.child_token();
            let coalescer = Coalescer::new(mirror, self.settings.debounce);
            let task = tokio::spawn(coalescer.run(events, shutdown.clone()));

            info!(root = %session.local_root.display(), "Watching for changes");
            session.state = SessionState::Running {
                source,
                task,
                shutdown,
            };
        }
        Ok(())
    }

    /// Reconciles the first ready session once, without watching
    ///
    /// # Errors
    /// Returns `SyncError::DomainError` if no session is ready.
    pub async fn sync_once(&mut self) -> Result<ReconcileReport, SyncError> {
        for session in &mut self.sessions {
            if let SessionState::Ready(mirror) = &mut session.state {
                return Ok(Reconciler::reconcile(mirror, &session.local_root).await);
            }
        }
        Err(DomainError::InvalidConfig("no connected sync target to reconcile".into()).into())
    }

    /// Stops every session and releases its resources
    ///
    /// The operation being dispatched when this is called runs to completion;
    /// buffered events are flushed before the remote session is closed.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        for session in &mut self.sessions {
            session.stop().await;
        }
    }
}
