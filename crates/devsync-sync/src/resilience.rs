//! Connection resilience
//!
//! [`ResilientMirror`] wraps a [`RemoteMirror`] and intercepts every
//! primitive. When a primitive fails with the transport-severed signature
//! the wrapper closes the dead session and dials again with linear back-off
//! until a fresh session is up.
//!
//! The failed operation itself is *not* replayed: its error is returned to
//! the caller once the session has been restored. A later event or
//! reconciliation pass converges the remote state.

use std::path::Path;
use std::time::Duration;

use devsync_core::config::SessionSettings;
use devsync_core::domain::path::PathMapper;
use devsync_core::ports::remote::{RemoteEntry, RemoteError, RemoteStat};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::mirror::RemoteMirror;
use crate::SyncError;

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Linear back-off between reconnect attempts
///
/// The wait after the `n`-th failed attempt (1-based) is
/// `base + step * n`, so successive waits strictly increase whenever
/// `step` is non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Fixed part of every wait
    pub base: Duration,
    /// Growth per attempt
    pub step: Duration,
}

impl ReconnectPolicy {
    /// Creates a policy with the given base and step
    pub fn new(base: Duration, step: Duration) -> Self {
        Self { base, step }
    }

    /// Wait before retrying after the `attempt`-th failed dial
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base.saturating_add(self.step.saturating_mul(attempt))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&SessionSettings::default())
    }
}

impl From<&SessionSettings> for ReconnectPolicy {
    fn from(settings: &SessionSettings) -> Self {
        Self::new(settings.reconnect_base, settings.reconnect_step)
    }
}

// ============================================================================
// ResilientMirror
// ============================================================================

/// A [`RemoteMirror`] that re-dials transparently after a severed transport
pub struct ResilientMirror {
    mirror: RemoteMirror,
    policy: ReconnectPolicy,
    shutdown: CancellationToken,
    /// Dial attempts made by the reconnect loop
    reconnect_attempts: u64,
    /// Operations that failed because the transport was severed
    dropped_operations: u64,
}

impl ResilientMirror {
    /// Wraps `mirror` with the given back-off policy
    pub fn new(mirror: RemoteMirror, policy: ReconnectPolicy) -> Self {
        Self {
            mirror,
            policy,
            shutdown: CancellationToken::new(),
            reconnect_attempts: 0,
            dropped_operations: 0,
        }
    }

    /// Abandon reconnecting once `shutdown` is cancelled
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Total dial attempts made while recovering from severed transports
    pub fn reconnect_count(&self) -> u64 {
        self.reconnect_attempts
    }

    /// Operations that failed with a severed transport and were not replayed
    pub fn dropped_count(&self) -> u64 {
        self.dropped_operations
    }

    /// The path mapper of the wrapped mirror
    pub fn mapper(&self) -> &PathMapper {
        self.mirror.mapper()
    }

    /// Whether the wrapped mirror currently holds a session
    pub fn is_connected(&self) -> bool {
        self.mirror.is_connected()
    }

    /// Releases the session
    pub async fn close(&mut self) -> Result<(), RemoteError> {
        self.mirror.close().await
    }

    /// Unwraps the inner mirror
    pub fn into_inner(self) -> RemoteMirror {
        self.mirror
    }

    /// Inspects a primitive's outcome and reconnects on a severed transport
    async fn guard<T>(&mut self, result: Result<T, SyncError>) -> Result<T, SyncError> {
        if let Err(err) = &result {
            if err.is_transport_severed() {
                self.dropped_operations += 1;
                warn!(error = %err, "Remote transport severed, operation will not be replayed");
                self.reconnect().await;
            }
        }
        result
    }

    /// Dials until a session is re-established or shutdown is requested
    ///
    /// Returns `true` once connected, `false` if shutdown interrupted the loop.
    pub async fn reconnect(&mut self) -> bool {
        if let Err(e) = self.mirror.close().await {
            debug!(error = %e, "Closing dead session failed");
        }

        let address = self.mirror.params().address();
        let mut attempt: u32 = 0;
        loop {
            if self.shutdown.is_cancelled() {
                info!(address = %address, "Shutdown requested, giving up reconnect");
                return false;
            }

            attempt = attempt.saturating_add(1);
            self.reconnect_attempts += 1;
            info!(address = %address, attempt, "Reconnecting to remote host");

            match self.mirror.connect().await {
                Ok(()) => {
                    info!(address = %address, attempt, "Remote session restored");
                    return true;
                }
                Err(e) => {
                    let delay = self.policy.delay(attempt);
                    warn!(
                        address = %address,
                        attempt,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "Reconnect failed"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.cancelled() => {
                            info!(address = %address, "Shutdown requested, giving up reconnect");
                            return false;
                        }
                    }
                }
            }
        }
    }

    // ========================================================================
    // Guarded primitives
    // ========================================================================

    /// See [`RemoteMirror::stat`]
    pub async fn stat(&mut self, local: &Path) -> Result<RemoteStat, SyncError> {
        let result = self.mirror.stat(local).await;
        self.guard(result).await
    }

    /// See [`RemoteMirror::list`]
    pub async fn list(&mut self, local: &Path) -> Result<Vec<RemoteEntry>, SyncError> {
        let result = self.mirror.list(local).await;
        self.guard(result).await
    }

    /// See [`RemoteMirror::create_dir`]
    pub async fn create_dir(&mut self, local: &Path) -> Result<(), SyncError> {
        let result = self.mirror.create_dir(local).await;
        self.guard(result).await
    }

    /// See [`RemoteMirror::remove`]
    pub async fn remove(&mut self, local: &Path) -> Result<(), SyncError> {
        let result = self.mirror.remove(local).await;
        self.guard(result).await
    }

    /// See [`RemoteMirror::upload_file`]
    pub async fn upload_file(&mut self, local: &Path) -> Result<u64, SyncError> {
        let result = self.mirror.upload_file(local).await;
        self.guard(result).await
    }

    /// See [`RemoteMirror::rename`]
    pub async fn rename(&mut self, from: &Path, to: &Path) -> Result<(), SyncError> {
        let result = self.mirror.rename(from, to).await;
        self.guard(result).await
    }
}
