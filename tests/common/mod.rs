// Shared setup for tests that run real vigil-worker processes

#![allow(dead_code)]

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use vigil::alert::{Alert, Alerter, RecordingAlertSink};
use vigil::config::{SupervisorConfig, WorkerConfig};
use vigil::maintenance::MaintenanceStore;
use vigil::process::ProcessRuntime;
use vigil::supervisor::Supervisor;

pub struct Harness {
    pub supervisor: Supervisor,
    pub maintenance: Arc<MaintenanceStore>,
    pub alerts: RecordingAlertSink,
}

impl Harness {
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.alerts()
    }
}

/// Fast timings so real processes move through their lifecycle quickly
pub fn fast_config(worker_count: usize, worker_args: &[&str]) -> SupervisorConfig {
    SupervisorConfig {
        worker_count,
        heartbeat_interval_ms: 100,
        heartbeat_timeout_ms: 400,
        check_interval_ms: 100,
        drain_timeout_ms: 3_000,
        settle_delay_ms: 50,
        graceful_shutdown_timeout_ms: 2_000,
        worker: WorkerConfig {
            script: PathBuf::from(env!("CARGO_BIN_EXE_vigil-worker")),
            args: worker_args.iter().map(|arg| arg.to_string()).collect(),
            ..WorkerConfig::default()
        },
        ..SupervisorConfig::default()
    }
}

/// A supervisor over real processes with in-memory maintenance and recorded alerts
pub fn harness(config: SupervisorConfig) -> Harness {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let runtime = Arc::new(ProcessRuntime::new(
        config.worker.clone(),
        config.heartbeat_interval(),
        events_tx.clone(),
    ));
    let maintenance = Arc::new(MaintenanceStore::in_memory());
    let alerts = RecordingAlertSink::new();

    let supervisor = Supervisor::new(
        config,
        runtime,
        events_tx,
        events_rx,
        maintenance.clone(),
        Alerter::new().with_sink(Arc::new(alerts.clone())),
    );

    Harness {
        supervisor,
        maintenance,
        alerts,
    }
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn eventually<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
