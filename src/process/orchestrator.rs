use crate::alert::{Alert, Alerter};
use crate::config::SupervisorConfig;
use crate::error::{Result, VigilError};
use crate::health::{HealthMonitor, HealthStatus, HeartbeatMetrics};
use crate::maintenance::{EnableRequest, MaintenanceControl};
use crate::process::restart::{CrashLoopPolicy, RestartDecision, RestartWindow};
use crate::process::runtime::WorkerRuntime;
use crate::process::types::{ExitReason, WorkerEvent, WorkerExit, WorkerId, WorkerState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};


const EXIT_BROADCAST_CAPACITY: usize = 256;

/// How long to wait for exits after SIGKILL during shutdown
const FORCE_KILL_GRACE: Duration = Duration::from_secs(2);

/// Far enough out to never fire in practice
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// The instant `timeout` from now, saturating instead of overflowing
pub(crate) fn deadline_after(timeout: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(timeout).unwrap_or_else(|| now + FAR_FUTURE)
}

#[derive(Debug)]
struct WorkerSlot {
    state: WorkerState,
    pid: Option<u32>,
    /// Set while a rolling-restart session owns this slot's replacement
    suppress_respawn: bool,
    last_crash: Option<String>,
}

impl WorkerSlot {
    fn new() -> Self {
        Self {
            state: WorkerState::Starting,
            pid: None,
            suppress_respawn: false,
            last_crash: None,
        }
    }

    fn live_pid(&self) -> Option<u32> {
        match self.state {
            WorkerState::Dead => None,
            _ => self.pid,
        }
    }
}

#[derive(Debug, Default)]
struct PoolState {
    slots: HashMap<WorkerId, WorkerSlot>,
    windows: HashMap<WorkerId, RestartWindow>,
    shutting_down: bool,
}

/// Point-in-time view of one worker slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSummary {
    pub id: WorkerId,
    pub state: WorkerState,
    pub pid: Option<u32>,
    pub last_crash: Option<String>,
}

/// Spawns workers, tracks the live set and reacts to worker exits
///
/// Every failure is absorbed and logged here; nothing propagates to the
/// event pump that drives it.
pub struct Orchestrator {
    config: Arc<SupervisorConfig>,
    runtime: Arc<dyn WorkerRuntime>,
    health: Arc<RwLock<HealthMonitor>>,
    maintenance: Arc<dyn MaintenanceControl>,
    alerts: Alerter,
    events: mpsc::UnboundedSender<WorkerEvent>,
    policy: CrashLoopPolicy,
    pool: Mutex<PoolState>,
    /// Serializes the maintenance check and enable of escalation
    escalation: Mutex<()>,
    exits: broadcast::Sender<WorkerExit>,
}

impl Orchestrator {
    pub fn new(
        config: Arc<SupervisorConfig>,
        runtime: Arc<dyn WorkerRuntime>,
        health: Arc<RwLock<HealthMonitor>>,
        maintenance: Arc<dyn MaintenanceControl>,
        alerts: Alerter,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        let (exits, _) = broadcast::channel(EXIT_BROADCAST_CAPACITY);
        Self {
            policy: CrashLoopPolicy::from_config(&config),
            config,
            runtime,
            health,
            maintenance,
            alerts,
            events,
            pool: Mutex::new(PoolState::default()),
            escalation: Mutex::new(()),
            exits,
        }
    }

    /// Spawn `n` new workers and register each with the health monitor
    ///
    /// Returns how many spawns succeeded. Failed spawns are fed back as
    /// immediate exits and retried through the normal respawn path.
    pub async fn spawn_initial_pool(&self, n: usize) -> usize {
        let mut pool = self.pool.lock().await;
        let first = pool.slots.keys().max().map_or(1, |id| id.as_u32() + 1);
        let mut spawned = 0;

        for offset in 0..n as u32 {
            let id = WorkerId::new(first + offset);
            pool.slots.insert(id, WorkerSlot::new());
            self.health.write().await.register_worker(id);

            match self.runtime.spawn(id).await {
                Ok(pid) => {
                    if let Some(slot) = pool.slots.get_mut(&id) {
                        slot.pid = Some(pid);
                    }
                    info!(worker = %id, pid, "Worker started");
                    spawned += 1;
                }
                Err(e) => {
                    error!(worker = %id, "Failed to spawn worker: {}", e);
                    self.report_spawn_failure(id, &e);
                }
            }
        }

        info!("Spawned {}/{} workers", spawned, n);
        spawned
    }

    /// Route one inbound runtime event
    pub async fn handle_event(&self, event: WorkerEvent) {
        match event {
            WorkerEvent::Ready { id, pid } => self.on_worker_ready(id, pid).await,
            WorkerEvent::Heartbeat { id, metrics } => self.on_heartbeat(id, metrics).await,
            WorkerEvent::CrashReport { id, message } => self.record_crash(id, message).await,
            WorkerEvent::Exited { id, pid, reason } => self.on_worker_exit(id, pid, reason).await,
        }
    }

    pub async fn on_worker_ready(&self, id: WorkerId, pid: u32) {
        let mut pool = self.pool.lock().await;
        if let Some(slot) = pool.slots.get_mut(&id) {
            if slot.pid == Some(pid) && slot.state == WorkerState::Starting {
                slot.state = WorkerState::Running;
                debug!(worker = %id, pid, "Worker is ready");
            }
        }
    }

    pub async fn on_heartbeat(&self, id: WorkerId, metrics: HeartbeatMetrics) {
        let mut pool = self.pool.lock().await;
        let slot = match pool.slots.get_mut(&id) {
            Some(slot) => slot,
            None => {
                debug!(worker = %id, "Heartbeat from untracked worker ignored");
                return;
            }
        };

        if slot.state == WorkerState::Starting && slot.pid.is_some() {
            slot.state = WorkerState::Running;
        }

        self.health.write().await.process_heartbeat(id, metrics);
    }

    pub async fn record_crash(&self, id: WorkerId, message: String) {
        error!(worker = %id, "Worker crash report: {}", message);
        let mut pool = self.pool.lock().await;
        if let Some(slot) = pool.slots.get_mut(&id) {
            slot.last_crash = Some(message);
        }
    }

    /// React to a worker process going away
    ///
    /// Applies the crash-loop policy, escalates to maintenance mode when the
    /// system is unhealthy, then respawns unless a rolling-restart session
    /// owns the slot.
    pub async fn on_worker_exit(&self, id: WorkerId, pid: Option<u32>, reason: ExitReason) {
        let mut pool = self.pool.lock().await;

        let suppress_respawn = match pool.slots.get_mut(&id) {
            Some(slot) if slot.pid == pid => {
                slot.state = WorkerState::Dead;
                slot.pid = None;
                slot.suppress_respawn
            }
            Some(_) => {
                debug!(worker = %id, ?pid, "Ignoring exit of a replaced process");
                return;
            }
            None => {
                debug!(worker = %id, ?pid, "Ignoring exit of an untracked worker");
                return;
            }
        };

        if reason.is_clean() {
            info!(worker = %id, ?pid, "Worker {}", reason);
        } else {
            warn!(worker = %id, ?pid, "Worker {}", reason);
        }

        if pool.shutting_down {
            pool.slots.remove(&id);
            pool.windows.remove(&id);
            self.health.write().await.remove_worker(id);
            self.broadcast_exit(id, pid, reason, false);
            return;
        }

        let window = pool.windows.entry(id).or_default();
        if let RestartDecision::CrashLoop { recent } = self.policy.evaluate(window, Instant::now())
        {
            error!(
                worker = %id,
                restarts = recent,
                window_ms = self.config.restart_window_ms,
                "Crash loop detected; worker will not be respawned"
            );
            self.alerts.notify(Alert::CrashLoopDetected {
                worker: id,
                restarts: recent,
                window_ms: self.config.restart_window_ms,
            });

            pool.slots.remove(&id);
            pool.windows.remove(&id);
            self.health.write().await.remove_worker(id);
            self.broadcast_exit(id, pid, reason, false);
            return;
        }

        self.escalate_if_unhealthy().await;

        let respawned = if suppress_respawn {
            debug!(worker = %id, "Replacement left to the rolling restart");
            false
        } else {
            self.respawn_slot(&mut pool, id).await.is_some()
        };

        self.broadcast_exit(id, pid, reason, respawned);
    }

    /// Spawn the replacement for a slot drained by a rolling-restart session
    ///
    /// No-op if the slot already has a live process.
    pub async fn respawn(&self, id: WorkerId) -> Result<u32> {
        let mut pool = self.pool.lock().await;
        if pool.shutting_down {
            return Err(VigilError::ShuttingDown);
        }

        let slot = pool
            .slots
            .get_mut(&id)
            .ok_or(VigilError::WorkerNotFound(id))?;
        if let Some(pid) = slot.live_pid() {
            // Still running (drain never finished); its exit respawns normally
            slot.suppress_respawn = false;
            return Ok(pid);
        }

        self.respawn_slot(&mut pool, id)
            .await
            .ok_or_else(|| VigilError::SpawnError(format!("Failed to respawn worker {}", id)))
    }

    /// Send a drain command to a live worker
    ///
    /// With `session_managed` the orchestrator will not respawn the worker
    /// when it exits; the caller must call [`Orchestrator::respawn`].
    pub async fn begin_drain(&self, id: WorkerId, session_managed: bool) -> Result<u32> {
        let mut pool = self.pool.lock().await;
        if pool.shutting_down {
            return Err(VigilError::ShuttingDown);
        }

        let slot = pool
            .slots
            .get_mut(&id)
            .ok_or(VigilError::WorkerNotFound(id))?;
        let pid = slot
            .live_pid()
            .ok_or_else(|| VigilError::InvalidWorkerState(id, "worker is not running".into()))?;
        if slot.state == WorkerState::Draining {
            return Err(VigilError::InvalidWorkerState(
                id,
                "worker is already draining".into(),
            ));
        }

        let previous = slot.state;
        slot.state = WorkerState::Draining;
        slot.suppress_respawn = session_managed;

        if let Err(e) = self.runtime.send_drain(id).await {
            slot.state = previous;
            slot.suppress_respawn = false;
            return Err(e);
        }

        info!(worker = %id, pid, "Draining worker");
        Ok(pid)
    }

    /// Signal a live worker; its exit flows through the normal exit path
    pub async fn terminate(&self, id: WorkerId, forcible: bool) -> Result<u32> {
        self.terminate_process(id, None, forcible).await
    }

    /// Like [`Orchestrator::terminate`], but only if the slot still runs `expected_pid`
    pub(crate) async fn terminate_process(
        &self,
        id: WorkerId,
        expected_pid: Option<u32>,
        forcible: bool,
    ) -> Result<u32> {
        let pool = self.pool.lock().await;
        let slot = pool.slots.get(&id).ok_or(VigilError::WorkerNotFound(id))?;
        let pid = slot
            .live_pid()
            .ok_or_else(|| VigilError::InvalidWorkerState(id, "worker is not running".into()))?;
        if expected_pid.is_some_and(|expected| expected != pid) {
            return Err(VigilError::InvalidWorkerState(
                id,
                "process was already replaced".into(),
            ));
        }

        if forcible {
            warn!(worker = %id, pid, "Force killing worker");
        } else {
            info!(worker = %id, pid, "Terminating worker");
        }
        self.runtime.terminate(id, forcible).await?;
        Ok(pid)
    }

    /// Escalate to maintenance mode if system health is `Unhealthy`
    ///
    /// No-op when maintenance is already enabled. Returns whether this call
    /// switched it on.
    pub async fn escalate_if_unhealthy(&self) -> bool {
        let system = self.health.read().await.system_health();
        if system != HealthStatus::Unhealthy {
            return false;
        }

        let _escalating = self.escalation.lock().await;
        if self.maintenance.state().await.enabled {
            debug!("System unhealthy; maintenance mode already enabled");
            return false;
        }

        let reason = format!("System health is {}", system);
        let request =
            EnableRequest::watchdog(reason.clone(), self.config.maintenance_duration_minutes);

        match self.maintenance.enable(request).await {
            Ok(_) => {
                self.alerts.notify(Alert::MaintenanceActivated { reason });
                true
            }
            Err(e) => {
                warn!("Failed to enable maintenance mode: {}", e);
                false
            }
        }
    }

    /// Wait until each `(id, pid)` target has exited or `deadline` passes
    ///
    /// Returns the targets still running. Subscribe with
    /// [`Orchestrator::subscribe_exits`] before acting on the workers.
    pub async fn wait_for_exits(
        &self,
        exits: &mut broadcast::Receiver<WorkerExit>,
        targets: &[(WorkerId, u32)],
        deadline: Instant,
    ) -> Vec<(WorkerId, u32)> {
        let mut pending: HashMap<WorkerId, u32> = targets.iter().copied().collect();

        while !pending.is_empty() {
            match tokio::time::timeout_at(deadline, exits.recv()).await {
                Ok(Ok(exit)) => {
                    if exit.pid.is_some() && pending.get(&exit.id).copied() == exit.pid {
                        pending.remove(&exit.id);
                    }
                }
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    debug!(skipped, "Exit subscriber lagged; rechecking live workers");
                    let pool = self.pool.lock().await;
                    pending.retain(|id, pid| {
                        pool.slots.get(id).and_then(|slot| slot.live_pid()) == Some(*pid)
                    });
                }
                Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => break,
            }
        }

        let mut remaining: Vec<(WorkerId, u32)> = pending.into_iter().collect();
        remaining.sort();
        remaining
    }

    /// Drain every live worker, force-killing those still alive at `timeout`
    ///
    /// After this call no worker is respawned.
    pub async fn shutdown(&self, timeout: Duration) {
        let mut exits = self.exits.subscribe();

        let targets = {
            let mut pool = self.pool.lock().await;
            pool.shutting_down = true;

            let mut targets = Vec::new();
            for (id, slot) in pool.slots.iter_mut() {
                if let Some(pid) = slot.live_pid() {
                    slot.state = WorkerState::Draining;
                    targets.push((*id, pid));
                }
            }
            targets.sort();

            for (id, _) in &targets {
                if let Err(e) = self.runtime.send_drain(*id).await {
                    debug!(worker = %id, "Drain failed ({}); sending SIGTERM", e);
                    if let Err(e) = self.runtime.terminate(*id, false).await {
                        warn!(worker = %id, "Failed to terminate worker: {}", e);
                    }
                }
            }
            targets
        };

        if !targets.is_empty() {
            info!("Waiting up to {:?} for {} workers to drain", timeout, targets.len());
            let remaining = self
                .wait_for_exits(&mut exits, &targets, deadline_after(timeout))
                .await;

            if !remaining.is_empty() {
                warn!(
                    "{} workers still running after {:?}; force killing",
                    remaining.len(),
                    timeout
                );
                for (id, _) in &remaining {
                    if let Err(e) = self.runtime.terminate(*id, true).await {
                        warn!(worker = %id, "Failed to kill worker: {}", e);
                    }
                }

                let left = self
                    .wait_for_exits(&mut exits, &remaining, deadline_after(FORCE_KILL_GRACE))
                    .await;
                if !left.is_empty() {
                    error!("{} workers did not exit after SIGKILL", left.len());
                }
            }
        }

        let mut pool = self.pool.lock().await;
        let mut health = self.health.write().await;
        for id in pool.slots.keys() {
            health.remove_worker(*id);
        }
        pool.slots.clear();
        pool.windows.clear();
        info!("All workers stopped");
    }

    pub fn subscribe_exits(&self) -> broadcast::Receiver<WorkerExit> {
        self.exits.subscribe()
    }

    /// Live workers and their pids, ordered by id
    pub async fn live_workers(&self) -> Vec<(WorkerId, u32)> {
        let pool = self.pool.lock().await;
        let mut live: Vec<(WorkerId, u32)> = pool
            .slots
            .iter()
            .filter_map(|(id, slot)| slot.live_pid().map(|pid| (*id, pid)))
            .collect();
        live.sort();
        live
    }

    pub async fn live_worker_ids(&self) -> Vec<WorkerId> {
        self.live_workers()
            .await
            .into_iter()
            .map(|(id, _)| id)
            .collect()
    }

    pub async fn live_count(&self) -> usize {
        self.live_workers().await.len()
    }

    pub async fn slot_summaries(&self) -> Vec<SlotSummary> {
        let pool = self.pool.lock().await;
        let mut summaries: Vec<SlotSummary> = pool
            .slots
            .iter()
            .map(|(id, slot)| SlotSummary {
                id: *id,
                state: slot.state,
                pid: slot.pid,
                last_crash: slot.last_crash.clone(),
            })
            .collect();
        summaries.sort_by_key(|summary| summary.id);
        summaries
    }

    /// Restarts of a slot currently inside the crash-loop window
    pub async fn recent_restarts(&self, id: WorkerId) -> usize {
        let mut pool = self.pool.lock().await;
        let window = self.policy.window;
        pool.windows.get_mut(&id).map_or(0, |restarts| {
            restarts.prune(window, Instant::now());
            restarts.len()
        })
    }

    pub async fn is_shutting_down(&self) -> bool {
        self.pool.lock().await.shutting_down
    }

    pub fn health(&self) -> &Arc<RwLock<HealthMonitor>> {
        &self.health
    }

    async fn respawn_slot(&self, pool: &mut PoolState, id: WorkerId) -> Option<u32> {
        let slot = pool.slots.get_mut(&id)?;
        slot.state = WorkerState::Starting;
        slot.pid = None;
        slot.suppress_respawn = false;

        match self.runtime.spawn(id).await {
            Ok(pid) => {
                slot.pid = Some(pid);
                self.health.write().await.record_restart(id);
                info!(worker = %id, pid, "Worker respawned");
                Some(pid)
            }
            Err(e) => {
                slot.state = WorkerState::Dead;
                error!(worker = %id, "Failed to respawn worker: {}", e);
                self.report_spawn_failure(id, &e);
                None
            }
        }
    }

    /// Model a failed spawn as an immediate exit of the slot
    fn report_spawn_failure(&self, id: WorkerId, e: &VigilError) {
        let event = WorkerEvent::Exited {
            id,
            pid: None,
            reason: ExitReason::SpawnFailed(e.to_string()),
        };
        if self.events.send(event).is_err() {
            debug!(worker = %id, "Event channel closed; spawn failure not retried");
        }
    }

    fn broadcast_exit(&self, id: WorkerId, pid: Option<u32>, reason: ExitReason, respawned: bool) {
        let _ = self.exits.send(WorkerExit {
            id,
            pid,
            reason,
            respawned,
        });
    }
}
