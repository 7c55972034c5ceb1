// CLI module - the `vigil` command line

pub mod output;

use crate::config::SupervisorConfig;
use crate::daemon::{self, DaemonManager, PidFile, StopOutcome};
use crate::error::{Result, VigilError};
use crate::state::JsonStore;
use crate::watchdog::WatchdogStatus;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Vigil - a self-healing worker-pool supervisor
#[derive(Parser)]
#[command(name = "vigil")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the supervisor in the foreground
    Run {
        /// Configuration file (.toml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of workers, overriding the configuration
        #[arg(short, long)]
        workers: Option<usize>,

        /// Log level used when RUST_LOG is not set
        #[arg(long, default_value = "info")]
        log_level: String,
    },

    /// Validate a configuration file and print the effective settings
    CheckConfig {
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Show the last status snapshot written by the supervisor
    Status {
        /// Read the status file location from this configuration
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Status snapshot to read
        #[arg(long)]
        status_file: Option<PathBuf>,

        /// Print the raw JSON snapshot
        #[arg(long)]
        json: bool,
    },

    /// Gracefully restart every worker, one at a time
    Reload {
        #[arg(long, default_value = "/tmp/vigil.pid")]
        pid_file: PathBuf,
    },

    /// Make the running supervisor print its status table to its own output
    Dump {
        #[arg(long, default_value = "/tmp/vigil.pid")]
        pid_file: PathBuf,
    },

    /// Stop the running supervisor
    Stop {
        #[arg(long, default_value = "/tmp/vigil.pid")]
        pid_file: PathBuf,

        /// Seconds to wait for a graceful shutdown before SIGKILL
        #[arg(short, long, default_value = "35")]
        timeout: u64,
    },
}

impl Cli {
    /// Run the CLI application
    pub fn run() -> Result<()> {
        let cli = Cli::parse();
        cli.execute()
    }

    fn execute(&self) -> Result<()> {
        match &self.command {
            Commands::Run {
                config,
                workers,
                log_level,
            } => {
                let config = load_config(config.as_deref(), *workers)?;
                daemon::init_tracing(log_level);

                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .enable_all()
                    .build()?;
                runtime.block_on(daemon::run(config))
            }

            Commands::CheckConfig { config } => {
                let config = load_config(Some(config), None)?;
                output::print_success_msg("Configuration is valid");
                output::print_config(&config);
                Ok(())
            }

            Commands::Status {
                config,
                status_file,
                json,
            } => {
                let path = match (status_file, config) {
                    (Some(path), _) => path.clone(),
                    (None, Some(config)) => load_config(Some(config), None)?.status_file,
                    (None, None) => SupervisorConfig::default().status_file,
                };

                let status = read_status(&path)?;
                if *json {
                    let raw = serde_json::to_string_pretty(&status).map_err(|e| {
                        VigilError::Internal(format!("Failed to encode status: {}", e))
                    })?;
                    println!("{}", raw);
                } else {
                    output::print_status(&status);
                }
                Ok(())
            }

            Commands::Reload { pid_file } => {
                let manager = DaemonManager::new(PidFile::with_path(pid_file));
                let pid = manager.reload()?;
                output::print_success_msg(&format!(
                    "Rolling restart requested (PID: {})",
                    pid
                ));
                Ok(())
            }

            Commands::Dump { pid_file } => {
                let manager = DaemonManager::new(PidFile::with_path(pid_file));
                let pid = manager.dump_status()?;
                output::print_info(&format!("Status dump requested (PID: {})", pid));
                Ok(())
            }

            Commands::Stop { pid_file, timeout } => {
                let manager = DaemonManager::new(PidFile::with_path(pid_file));
                let pid = manager.pid()?;

                let pb = output::create_progress_bar(&format!(
                    "Stopping supervisor (PID: {})...",
                    pid
                ));
                match manager.stop(Duration::from_secs(*timeout)) {
                    Ok(StopOutcome::Graceful) => {
                        output::finish_progress_success(pb, "Supervisor stopped");
                        Ok(())
                    }
                    Ok(StopOutcome::Forced) => {
                        output::finish_progress_success(
                            pb,
                            "Supervisor did not stop in time and was killed",
                        );
                        Ok(())
                    }
                    Err(e) => {
                        output::finish_progress_error(pb, "Failed to stop supervisor");
                        Err(e)
                    }
                }
            }
        }
    }
}

/// Load the configuration file (or defaults), then env and flag overrides
fn load_config(path: Option<&Path>, workers: Option<usize>) -> Result<SupervisorConfig> {
    let mut config = match path {
        Some(path) => SupervisorConfig::from_file(path)?,
        None => SupervisorConfig::default(),
    };

    config.apply_env_overrides()?;
    if let Some(workers) = workers {
        config.worker_count = workers;
    }
    config.validate()?;

    Ok(config)
}

fn read_status(path: &Path) -> Result<WatchdogStatus> {
    JsonStore::new(path).load()?.ok_or_else(|| {
        VigilError::StateLoadError(format!(
            "No status snapshot at {}; is the supervisor running?",
            path.display()
        ))
    })
}
