// Supervisor module - wires the pool components together and owns their tasks

use crate::alert::Alerter;
use crate::config::SupervisorConfig;
use crate::error::{Result, VigilError};
use crate::health::HealthMonitor;
use crate::maintenance::{MaintenanceControl, MaintenanceStore};
use crate::process::{Orchestrator, ProcessRuntime, WorkerEvent, WorkerRuntime};
use crate::watchdog::Watchdog;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// The whole supervisor: event pump, orchestrator and watchdog
///
/// Every component is built here and handed its collaborators explicitly.
pub struct Supervisor {
    config: Arc<SupervisorConfig>,
    orchestrator: Arc<Orchestrator>,
    watchdog: Arc<Watchdog>,
    events: Option<mpsc::UnboundedReceiver<WorkerEvent>>,
    pump: Option<JoinHandle<()>>,
    monitor: Option<JoinHandle<()>>,
}

impl Supervisor {
    /// Assemble a supervisor on top of an arbitrary worker runtime
    ///
    /// `events_tx` must be the sender the runtime reports to; `events_rx` is
    /// its receiving end and is drained by the pump started in [`start`].
    ///
    /// [`start`]: Supervisor::start
    pub fn new(
        config: SupervisorConfig,
        runtime: Arc<dyn WorkerRuntime>,
        events_tx: mpsc::UnboundedSender<WorkerEvent>,
        events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
        maintenance: Arc<dyn MaintenanceControl>,
        alerts: Alerter,
    ) -> Self {
        Self::assemble(config, runtime, events_tx, events_rx, maintenance, alerts, None)
    }

    /// Assemble a supervisor that runs real worker processes
    pub fn from_config(config: SupervisorConfig) -> Result<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let runtime = Arc::new(ProcessRuntime::new(
            config.worker.clone(),
            config.heartbeat_interval(),
            events_tx.clone(),
        ));
        let maintenance = Arc::new(MaintenanceStore::from_config(&config)?);
        let status_file = config.status_file.clone();

        Ok(Self::assemble(
            config,
            runtime,
            events_tx,
            events_rx,
            maintenance,
            Alerter::logging(),
            Some(status_file),
        ))
    }

    fn assemble(
        config: SupervisorConfig,
        runtime: Arc<dyn WorkerRuntime>,
        events_tx: mpsc::UnboundedSender<WorkerEvent>,
        events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
        maintenance: Arc<dyn MaintenanceControl>,
        alerts: Alerter,
        status_file: Option<PathBuf>,
    ) -> Self {
        let config = Arc::new(config);
        let health = Arc::new(RwLock::new(HealthMonitor::from_config(&config)));

        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&config),
            runtime,
            health,
            Arc::clone(&maintenance),
            alerts.clone(),
            events_tx,
        ));
        let mut watchdog = Watchdog::new(
            Arc::clone(&config),
            Arc::clone(&orchestrator),
            maintenance,
            alerts,
        );
        if let Some(path) = status_file {
            watchdog = watchdog.with_status_file(path);
        }

        Self {
            config,
            orchestrator,
            watchdog: Arc::new(watchdog),
            events: Some(events_rx),
            pump: None,
            monitor: None,
        }
    }

    /// Start the event pump, spawn the pool and begin monitoring
    ///
    /// # Returns
    /// The number of workers that were spawned
    pub async fn start(&mut self) -> Result<usize> {
        let mut events = self
            .events
            .take()
            .ok_or_else(|| VigilError::StateError("Supervisor already started".to_string()))?;

        let orchestrator = Arc::clone(&self.orchestrator);
        self.pump = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                orchestrator.handle_event(event).await;
            }
        }));

        let spawned = self
            .orchestrator
            .spawn_initial_pool(self.config.worker_count)
            .await;
        if spawned < self.config.worker_count {
            warn!(
                "Only {} of {} workers started",
                spawned, self.config.worker_count
            );
        }

        self.monitor = Some(self.watchdog.start());
        info!("Supervisor started with {} workers", spawned);

        Ok(spawned)
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn watchdog(&self) -> &Arc<Watchdog> {
        &self.watchdog
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Drain the pool and stop every background task
    pub async fn shutdown(&mut self) {
        // The pump keeps running while the pool drains so exits are observed
        self.watchdog.shutdown().await;

        if let Some(monitor) = self.monitor.take() {
            if let Err(e) = monitor.await {
                warn!("Watchdog task ended abnormally: {}", e);
            }
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }

        info!("Supervisor stopped");
    }
}
