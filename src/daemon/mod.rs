// Daemon module - process entry for `vigil run`

pub mod manager;
pub mod pid;

pub use manager::{DaemonManager, StopOutcome};
pub use pid::PidFile;

use crate::cli::output;
use crate::config::SupervisorConfig;
use crate::error::Result;
use crate::supervisor::Supervisor;
use crate::watchdog::{RollingRestartOutcome, Watchdog};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Install the global log subscriber
///
/// `RUST_LOG` wins over `default_level` when set.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    // Embedders may have installed their own subscriber already
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Run the supervisor in the foreground until SIGTERM or SIGINT
pub async fn run(config: SupervisorConfig) -> Result<()> {
    let pid_file = PidFile::with_path(&config.pid_file);
    pid_file.acquire()?;
    info!(
        "Supervisor starting (PID: {}, PID file: {})",
        std::process::id(),
        pid_file.path().display()
    );

    let result = supervise(config).await;

    if let Err(e) = pid_file.release() {
        warn!("{}", e);
    }
    result
}

async fn supervise(config: SupervisorConfig) -> Result<()> {
    let mut supervisor = Supervisor::from_config(config)?;
    supervisor.start().await?;

    let waited = wait_for_shutdown(&supervisor).await;
    supervisor.shutdown().await;
    waited
}

#[cfg(unix)]
async fn wait_for_shutdown(supervisor: &Supervisor) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
                break;
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
                break;
            }
            _ = sighup.recv() => {
                info!("Received SIGHUP");
                spawn_rolling_restart(supervisor.watchdog(), "SIGHUP");
            }
            _ = sigusr1.recv() => {
                let status = supervisor.watchdog().get_status().await;
                output::print_status(&status);
            }
        }
    }

    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_supervisor: &Supervisor) -> Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C");
    Ok(())
}

/// Run a rolling restart without blocking the signal loop
fn spawn_rolling_restart(watchdog: &Arc<Watchdog>, reason: &'static str) {
    let watchdog = Arc::clone(watchdog);
    tokio::spawn(async move {
        match watchdog.graceful_rolling_restart(reason).await {
            RollingRestartOutcome::Completed(report) if !report.failed.is_empty() => {
                error!(
                    "Rolling restart ({}) could not restart workers {:?}",
                    reason, report.failed
                );
            }
            RollingRestartOutcome::Completed(_) => {}
            RollingRestartOutcome::AlreadyInProgress => {
                info!("Rolling restart already running; {} ignored", reason);
            }
            RollingRestartOutcome::ShuttingDown => {}
        }
    });
}
