//! SSH handshake and SFTP subsystem setup
//!
//! [`SftpConnector`] dials the host with `russh`, authenticates with the
//! method chosen by [`auth`](crate::auth), opens a session channel and
//! starts the `sftp` subsystem on it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use devsync_core::ports::remote::{ConnectParams, DialError, RemoteConnector, RemoteFileService};
use russh::client;
use russh::keys::{load_secret_key, HashAlg, PrivateKeyWithHashAlg, PublicKey};
use russh_sftp::client::SftpSession;
use tracing::{debug, info};

use crate::auth::{self, AuthMethod};
use crate::service::SftpService;

/// Interval between SSH keepalive requests
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Unanswered keepalives before the transport is considered dead
const KEEPALIVE_MAX: usize = 3;

/// Client-side SSH event handler
///
/// Host keys are accepted without verification; the fingerprint is logged
/// at debug level.
pub struct SshClient;

impl client::Handler for SshClient {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            fingerprint = %server_public_key.fingerprint(HashAlg::Sha256),
            "Accepting server host key"
        );
        Ok(true)
    }
}

/// Dials SFTP sessions
pub struct SftpConnector {
    config: Arc<client::Config>,
}

impl SftpConnector {
    /// Creates a connector with keepalives enabled
    pub fn new() -> Self {
        let config = client::Config {
            keepalive_interval: Some(KEEPALIVE_INTERVAL),
            keepalive_max: KEEPALIVE_MAX,
            ..client::Config::default()
        };
        Self {
            config: Arc::new(config),
        }
    }
}

impl Default for SftpConnector {
    fn default() -> Self {
        Self::new()
    }
}

fn bad_host(params: &ConnectParams, err: impl std::fmt::Display) -> DialError {
    DialError::BadHost(format!("{}: {err}", params.address()))
}

#[async_trait]
impl RemoteConnector for SftpConnector {
    async fn connect(
        &self,
        params: &ConnectParams,
    ) -> Result<Box<dyn RemoteFileService>, DialError> {
        let user = auth::resolve_user(&params.user)?;
        // Keyring lookups block on the platform secret store
        let method = {
            let params = params.clone();
            let user = user.clone();
            tokio::task::spawn_blocking(move || auth::resolve_auth(&params, &user))
                .await
                .map_err(|e| DialError::MissingCredential(format!("credential lookup failed: {e}")))??
        };
        debug!(address = %params.address(), user = %user, method = ?method, "Connecting");

        let mut session = client::connect(
            Arc::clone(&self.config),
            (params.host.as_str(), params.port),
            SshClient,
        )
        .await
        .map_err(|e| bad_host(params, e))?;

        let outcome = match &method {
            AuthMethod::Password(password) => session
                .authenticate_password(user.as_str(), password.as_str())
                .await
                .map_err(|e| bad_host(params, e))?,
            AuthMethod::Key(path) => {
                let key = load_secret_key(path, None).map_err(|e| {
                    DialError::MissingCredential(format!("{}: {e}", path.display()))
                })?;
                let hash = session
                    .best_supported_rsa_hash()
                    .await
                    .map_err(|e| bad_host(params, e))?
                    .flatten();
                session
                    .authenticate_publickey(
                        user.as_str(),
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash),
                    )
                    .await
                    .map_err(|e| bad_host(params, e))?
            }
        };

        if !outcome.success() {
            return Err(bad_host(
                params,
                format!("authentication rejected for user {user}"),
            ));
        }

        let channel = session
            .channel_open_session()
            .await
            .map_err(|e| bad_host(params, e))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| bad_host(params, e))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| bad_host(params, e))?;

        info!(address = %params.address(), user = %user, "SFTP session opened");
        Ok(Box::new(SftpService::new(session, sftp)))
    }
}
