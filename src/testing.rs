// Test support: a scripted worker runtime and a pre-wired pool

use crate::alert::{Alert, Alerter, RecordingAlertSink};
use crate::config::SupervisorConfig;
use crate::error::{Result, VigilError};
use crate::health::HealthMonitor;
use crate::maintenance::{EnableRequest, MaintenanceControl, MaintenanceState, MaintenanceStore};
use crate::process::{ExitReason, Orchestrator, WorkerEvent, WorkerId, WorkerRuntime};
use crate::watchdog::Watchdog;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;

#[derive(Default)]
struct Script {
    next_pid: u32,
    live: HashMap<WorkerId, u32>,
    spawns: Vec<WorkerId>,
    drains: Vec<WorkerId>,
    kills: Vec<(WorkerId, bool)>,
    failing: HashSet<WorkerId>,
    ignore_drain: HashSet<WorkerId>,
    drain_delay: Duration,
    /// Drained and not yet replaced
    down: HashSet<WorkerId>,
    max_down: usize,
}

/// In-memory worker runtime driven by the test
///
/// Spawns succeed immediately and emit `Ready`; drained workers exit cleanly
/// after the configured delay unless told to ignore drains.
pub(crate) struct ScriptedRuntime {
    events: mpsc::UnboundedSender<WorkerEvent>,
    script: Arc<Mutex<Script>>,
}

impl ScriptedRuntime {
    pub fn new(events: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self {
            events,
            script: Arc::new(Mutex::new(Script {
                next_pid: 1000,
                ..Script::default()
            })),
        }
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    pub fn set_drain_delay(&self, delay: Duration) {
        self.script().drain_delay = delay;
    }

    pub fn fail_spawns(&self, id: WorkerId, fail: bool) {
        if fail {
            self.script().failing.insert(id);
        } else {
            self.script().failing.remove(&id);
        }
    }

    pub fn ignore_drain(&self, id: WorkerId) {
        self.script().ignore_drain.insert(id);
    }

    /// Make a live worker exit with `code`
    pub fn crash(&self, id: WorkerId, code: i32) -> bool {
        let pid = self.script().live.remove(&id);
        match pid {
            Some(pid) => {
                let _ = self.events.send(WorkerEvent::Exited {
                    id,
                    pid: Some(pid),
                    reason: ExitReason::Exited(code),
                });
                true
            }
            None => false,
        }
    }

    pub fn emit(&self, event: WorkerEvent) {
        let _ = self.events.send(event);
    }

    pub fn pid_of(&self, id: WorkerId) -> Option<u32> {
        self.script().live.get(&id).copied()
    }

    pub fn spawns(&self) -> Vec<WorkerId> {
        self.script().spawns.clone()
    }

    pub fn spawn_count(&self, id: WorkerId) -> usize {
        self.script().spawns.iter().filter(|spawned| **spawned == id).count()
    }

    pub fn drains(&self) -> Vec<WorkerId> {
        self.script().drains.clone()
    }

    pub fn kills(&self) -> Vec<(WorkerId, bool)> {
        self.script().kills.clone()
    }

    pub fn max_down(&self) -> usize {
        self.script().max_down
    }

    pub fn live_count(&self) -> usize {
        self.script().live.len()
    }
}

#[async_trait]
impl WorkerRuntime for ScriptedRuntime {
    async fn spawn(&self, id: WorkerId) -> Result<u32> {
        let pid = {
            let mut script = self.script();
            script.spawns.push(id);
            if script.failing.contains(&id) {
                return Err(VigilError::SpawnError(format!(
                    "scripted spawn failure for worker {}",
                    id
                )));
            }

            let pid = script.next_pid;
            script.next_pid += 1;
            script.live.insert(id, pid);
            script.down.remove(&id);
            pid
        };

        let _ = self.events.send(WorkerEvent::Ready { id, pid });
        Ok(pid)
    }

    async fn terminate(&self, id: WorkerId, forcible: bool) -> Result<()> {
        let pid = {
            let mut script = self.script();
            script.kills.push((id, forcible));
            script.live.remove(&id).ok_or(VigilError::WorkerNotFound(id))?
        };

        let _ = self.events.send(WorkerEvent::Exited {
            id,
            pid: Some(pid),
            reason: ExitReason::Signaled(if forcible { 9 } else { 15 }),
        });
        Ok(())
    }

    async fn send_drain(&self, id: WorkerId) -> Result<()> {
        let (pid, delay) = {
            let mut script = self.script();
            script.drains.push(id);
            let pid = *script.live.get(&id).ok_or(VigilError::WorkerNotFound(id))?;

            script.down.insert(id);
            script.max_down = script.max_down.max(script.down.len());

            if script.ignore_drain.contains(&id) {
                return Ok(());
            }
            (pid, script.drain_delay)
        };

        let script = Arc::clone(&self.script);
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let exited = {
                let mut script = script.lock().unwrap();
                if script.live.get(&id) == Some(&pid) {
                    script.live.remove(&id);
                    true
                } else {
                    false
                }
            };
            if exited {
                let _ = events.send(WorkerEvent::Exited {
                    id,
                    pid: Some(pid),
                    reason: ExitReason::Exited(0),
                });
            }
        });

        Ok(())
    }
}

/// Maintenance collaborator whose every write fails
#[derive(Default)]
pub(crate) struct FailingMaintenance {
    enable_calls: AtomicUsize,
    auto_disable_calls: AtomicUsize,
}

impl FailingMaintenance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable_calls(&self) -> usize {
        self.enable_calls.load(Ordering::SeqCst)
    }

    pub fn auto_disable_calls(&self) -> usize {
        self.auto_disable_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MaintenanceControl for FailingMaintenance {
    async fn enable(&self, _request: EnableRequest) -> Result<MaintenanceState> {
        self.enable_calls.fetch_add(1, Ordering::SeqCst);
        Err(VigilError::StateSaveError("maintenance store unavailable".to_string()))
    }

    async fn disable(&self) -> Result<()> {
        Err(VigilError::StateSaveError("maintenance store unavailable".to_string()))
    }

    async fn state(&self) -> MaintenanceState {
        MaintenanceState::default()
    }

    async fn check_auto_disable(&self) -> Result<bool> {
        self.auto_disable_calls.fetch_add(1, Ordering::SeqCst);
        Err(VigilError::StateLoadError("maintenance store unavailable".to_string()))
    }
}

/// Config with short, deterministic timings for the paused test clock
pub(crate) fn test_config(worker_count: usize) -> SupervisorConfig {
    SupervisorConfig {
        worker_count,
        memory_threshold_mb: 256,
        heartbeat_interval_ms: 5_000,
        heartbeat_timeout_ms: 15_000,
        check_interval_ms: 2_000,
        restart_threshold: 5,
        restart_window_ms: 60_000,
        graceful_shutdown_timeout_ms: 30_000,
        drain_timeout_ms: 10_000,
        settle_delay_ms: 500,
        maintenance_duration_minutes: 30,
        ..SupervisorConfig::default()
    }
}

/// A fully wired pool on top of [`ScriptedRuntime`], with its event pump running
pub(crate) struct TestPool {
    pub runtime: Arc<ScriptedRuntime>,
    pub health: Arc<RwLock<HealthMonitor>>,
    pub maintenance: Arc<dyn MaintenanceControl>,
    pub alerts: RecordingAlertSink,
    pub orchestrator: Arc<Orchestrator>,
    pub watchdog: Arc<Watchdog>,
    pump: JoinHandle<()>,
}

impl TestPool {
    /// Build the pool without spawning any worker
    pub fn new(config: SupervisorConfig) -> Self {
        Self::with_maintenance(config, Arc::new(MaintenanceStore::in_memory()))
    }

    /// Like [`TestPool::new`], on top of the given maintenance collaborator
    pub fn with_maintenance(
        config: SupervisorConfig,
        maintenance: Arc<dyn MaintenanceControl>,
    ) -> Self {
        let config = Arc::new(config);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();

        let runtime = Arc::new(ScriptedRuntime::new(events_tx.clone()));
        let health = Arc::new(RwLock::new(HealthMonitor::from_config(&config)));
        let alerts = RecordingAlertSink::new();
        let alerter = Alerter::new().with_sink(Arc::new(alerts.clone()));

        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&config),
            runtime.clone(),
            Arc::clone(&health),
            maintenance.clone(),
            alerter.clone(),
            events_tx,
        ));
        let watchdog = Arc::new(Watchdog::new(
            Arc::clone(&config),
            Arc::clone(&orchestrator),
            maintenance.clone(),
            alerter,
        ));

        let pump_orchestrator = Arc::clone(&orchestrator);
        let pump = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                pump_orchestrator.handle_event(event).await;
            }
        });

        Self {
            runtime,
            health,
            maintenance,
            alerts,
            orchestrator,
            watchdog,
            pump,
        }
    }

    /// Build the pool and spawn `config.worker_count` workers
    pub async fn start(config: SupervisorConfig) -> Self {
        Self::start_with_maintenance(config, Arc::new(MaintenanceStore::in_memory())).await
    }

    pub async fn start_with_maintenance(
        config: SupervisorConfig,
        maintenance: Arc<dyn MaintenanceControl>,
    ) -> Self {
        let count = config.worker_count;
        let pool = Self::with_maintenance(config, maintenance);
        pool.orchestrator.spawn_initial_pool(count).await;
        pool.settle().await;
        pool
    }

    /// Let the event pump drain everything already queued
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.alerts()
    }
}

impl Drop for TestPool {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

pub(crate) fn id(raw: u32) -> WorkerId {
    WorkerId::new(raw)
}
