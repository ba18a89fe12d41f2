//! devsync CLI - mirrors local directories onto SFTP servers
//!
//! Run modes:
//! - watch (default): mirror every change until SIGINT/SIGTERM
//! - `--sync`: one full synchronization of a single target, then exit
//! - `--config`: watch every target defined in a configuration file
//! - `--remember` / `--forget`: manage the keyring password of a target

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod run;

use run::Mode;

#[derive(Debug, Parser)]
#[command(
    name = "devsync",
    version,
    about = "Mirror local directories onto SFTP servers"
)]
pub struct Cli {
    /// Configuration file defining several sync targets
    #[arg(short, long, value_name = "FILE", conflicts_with_all = ["local", "remote", "sync", "identity"])]
    config: Option<PathBuf>,

    /// Local directory to watch
    #[arg(short, long, value_name = "DIR")]
    local: Option<PathBuf>,

    /// Remote target, e.g. "deploy:secret@10.0.0.5:22/srv/app"
    #[arg(short, long, value_name = "TARGET")]
    remote: Option<String>,

    /// Run one full synchronization and exit
    #[arg(short, long)]
    sync: bool,

    /// Private key used to log in
    #[arg(short, long, value_name = "FILE")]
    identity: Option<PathBuf>,

    /// Quiet period before buffered changes are applied, in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 100)]
    debounce_ms: u64,

    /// Append log output to this file instead of stderr
    #[arg(long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Store the password of --remote in the system keyring and exit
    #[arg(long, conflicts_with_all = ["config", "sync", "forget"])]
    remember: bool,

    /// Delete the keyring password for --remote and exit
    #[arg(long, conflicts_with_all = ["config", "sync"])]
    forget: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn mode(&self) -> Mode {
        if self.remember {
            Mode::Remember
        } else if self.forget {
            Mode::Forget
        } else if self.sync {
            Mode::Once
        } else {
            Mode::Watch
        }
    }
}

fn init_tracing(verbose: u8, log: Option<&Path>) -> Result<()> {
    let filter = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false);

    match log {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => builder.init(),
    }
    Ok(())
}

/// Waits for SIGTERM or SIGINT and cancels `token`
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log.as_deref())?;

    let mode = cli.mode();
    let targets = run::build_targets(&cli)?;

    match mode {
        Mode::Remember => run::remember(&targets),
        Mode::Forget => run::forget(&targets),
        Mode::Once | Mode::Watch => {
            let shutdown = CancellationToken::new();
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                shutdown_signal(signal_token).await;
            });

            run::serve(targets, run::settings(&cli), mode, shutdown).await
        }
    }
}
