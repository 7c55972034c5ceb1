// Reference worker process for the vigil supervisor
//
// Simulates a steady stream of requests inside the worker runtime shell, with
// switches for injecting faults.

use anyhow::Context;
use clap::Parser;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use vigil::worker::{install_panic_hook, report_crash, WorkerShell};

#[derive(Parser, Debug)]
#[command(name = "vigil-worker")]
#[command(about = "Reference worker process for the vigil supervisor", long_about = None)]
struct Args {
    /// Start a new simulated request every N milliseconds
    #[arg(long, default_value_t = 50)]
    request_interval_ms: u64,

    /// How long each simulated request takes
    #[arg(long, default_value_t = 20)]
    request_duration_ms: u64,

    /// Report a crash and exit with status 1 after N milliseconds
    #[arg(long)]
    crash_after_ms: Option<u64>,

    /// Never finish draining
    #[arg(long)]
    ignore_drain: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the supervisor protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    install_panic_hook();

    let args = Args::parse();
    let shell = WorkerShell::from_env().context("worker must be started by the supervisor")?;

    // An in-flight request that never completes keeps the drain open forever
    let _stuck = if args.ignore_drain {
        shell.begin_request()
    } else {
        None
    };

    if let Some(ms) = args.crash_after_ms {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            report_crash("simulated crash");
            std::process::exit(1);
        });
    }

    let generator = shell.clone();
    let request_interval = Duration::from_millis(args.request_interval_ms.max(1));
    let request_duration = Duration::from_millis(args.request_duration_ms);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(request_interval);
        loop {
            ticker.tick().await;
            match generator.begin_request() {
                Some(guard) => {
                    tokio::spawn(async move {
                        tokio::time::sleep(request_duration).await;
                        drop(guard);
                    });
                }
                None => break,
            }
        }
    });

    shell.run().await.context("worker protocol failed")?;
    Ok(())
}
