//! Target assembly and run modes

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use devsync_core::config::{SessionSettings, SyncTarget};
use devsync_sftp::auth::{self, KeyringPasswordStore};
use devsync_sftp::SftpConnector;
use devsync_sync::reconcile::ReconcileReport;
use devsync_sync::session::Orchestrator;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::Cli;

/// What a run does once its targets are known
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Mirror changes until interrupted
    Watch,
    /// One full synchronization, then exit
    Once,
    /// Store the target password in the keyring
    Remember,
    /// Delete the target password from the keyring
    Forget,
}

/// Builds the list of targets named on the command line or in `--config`
pub fn build_targets(cli: &Cli) -> Result<Vec<SyncTarget>> {
    if let Some(config) = &cli.config {
        let targets = SyncTarget::load_all(config)?;
        info!(
            path = %config.display(),
            targets = targets.len(),
            "Loaded configuration"
        );
        return Ok(targets);
    }

    let remote = cli
        .remote
        .as_deref()
        .context("Remote target not specified (use --remote or --config)")?;

    // Keyring modes never touch the local side
    let local = match (&cli.local, cli.mode()) {
        (Some(local), _) => local.clone(),
        (None, Mode::Remember | Mode::Forget) => PathBuf::new(),
        (None, _) => bail!("Local directory not specified (use --local or --config)"),
    };

    let mut target = SyncTarget::from_remote_spec(local, remote)?;
    target.identity_file = cli.identity.clone();
    Ok(vec![target])
}

/// Engine settings derived from the command line
pub fn settings(cli: &Cli) -> SessionSettings {
    SessionSettings {
        debounce: Duration::from_millis(cli.debounce_ms),
        ..SessionSettings::default()
    }
}

fn keyring_account(target: &SyncTarget) -> Result<String> {
    let user = auth::resolve_user(&target.remote_user)?;
    Ok(auth::keyring_account(&user, &target.remote_host))
}

/// Stores the password embedded in the remote target
pub fn remember(targets: &[SyncTarget]) -> Result<()> {
    for target in targets {
        if target.remote_pass.is_empty() {
            bail!(
                "No password in remote target {} (use user:password@host/path)",
                target.display_remote()
            );
        }
        let account = keyring_account(target)?;
        KeyringPasswordStore::store(&account, &target.remote_pass)?;
        println!("Password for {account} stored in the system keyring");
    }
    Ok(())
}

/// Deletes the stored password of the remote target
pub fn forget(targets: &[SyncTarget]) -> Result<()> {
    for target in targets {
        let account = keyring_account(target)?;
        KeyringPasswordStore::clear(&account)?;
        println!("Password for {account} removed from the system keyring");
    }
    Ok(())
}

/// Runs the watch or one-shot mode over `targets`
///
/// Dial and watcher failures at startup are fatal; every session already
/// set up is stopped before the error is returned.
pub async fn serve(
    targets: Vec<SyncTarget>,
    settings: SessionSettings,
    mode: Mode,
    shutdown: CancellationToken,
) -> Result<()> {
    if mode == Mode::Once && targets.len() != 1 {
        bail!("--sync needs exactly one sync target");
    }

    let mut orchestrator = Orchestrator::new(Arc::new(SftpConnector::new()), settings);

    for target in targets {
        let remote = target.display_remote();
        let local = target.local_path.display().to_string();
        if let Err(e) = orchestrator.add(target).await {
            orchestrator.stop().await;
            return Err(e).with_context(|| format!("Cannot sync {local} to {remote}"));
        }
    }

    let result = match mode {
        Mode::Once => sync_once(&mut orchestrator, &shutdown).await,
        _ => watch(&mut orchestrator, &shutdown).await,
    };

    orchestrator.stop().await;
    result
}

async fn sync_once(orchestrator: &mut Orchestrator, shutdown: &CancellationToken) -> Result<()> {
    let report = tokio::select! {
        report = orchestrator.sync_once() => report?,
        _ = shutdown.cancelled() => {
            warn!("Synchronization interrupted");
            bail!("Synchronization interrupted");
        }
    };

    log_report(&report);
    if !report.is_clean() {
        bail!("{} entries failed to synchronize", report.errors.len());
    }
    Ok(())
}

async fn watch(orchestrator: &mut Orchestrator, shutdown: &CancellationToken) -> Result<()> {
    orchestrator
        .start()
        .context("Failed to start watching local directories")?;
    info!(
        sessions = orchestrator.sessions().len(),
        "Watching; press Ctrl+C to stop"
    );

    shutdown.cancelled().await;
    info!("Shutting down");
    Ok(())
}

fn log_report(report: &ReconcileReport) {
    info!(
        dirs_created = report.dirs_created,
        files_uploaded = report.files_uploaded,
        bytes_uploaded = report.bytes_uploaded,
        files_skipped = report.files_skipped,
        removed = report.removed,
        ignored = report.ignored,
        errors = report.errors.len(),
        "Synchronization finished"
    );
    for err in &report.errors {
        error!("{err}");
    }
}
