// Watchdog module - periodic health checks, escalation and rolling restarts

mod session;

#[cfg(test)]
mod tests;

pub use session::{RollingRestartSession, SessionGuard};

use crate::alert::{Alert, Alerter};
use crate::config::SupervisorConfig;
use crate::error::{Result, VigilError};
use crate::health::{HealthMonitor, HealthStatus, StatusChange, WorkerSummary};
use crate::maintenance::{MaintenanceControl, MaintenanceState};
use crate::process::orchestrator::deadline_after;
use crate::process::{Orchestrator, WorkerId, WorkerState};
use crate::state::JsonStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify, RwLock, RwLockReadGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// How long to wait for an exit after SIGKILL on a drain timeout
const FORCE_KILL_GRACE: Duration = Duration::from_secs(2);

/// What one check cycle observed and did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Workers that missed enough heartbeats to be unhealthy
    pub unhealthy: Vec<WorkerId>,
    /// Workers the cycle force-killed
    pub killed: Vec<WorkerId>,
    pub system_health: HealthStatus,
    /// Maintenance mode was switched on by this cycle
    pub maintenance_escalated: bool,
    /// Maintenance mode reached its deadline during this cycle
    pub maintenance_auto_disabled: bool,
}

impl CycleReport {
    fn new() -> Self {
        Self {
            unhealthy: Vec::new(),
            killed: Vec::new(),
            system_health: HealthStatus::Healthy,
            maintenance_escalated: false,
            maintenance_auto_disabled: false,
        }
    }
}

/// How a single graceful restart ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The worker exited on its own after draining
    Exited,
    /// The drain timed out and the worker was force-killed
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollingRestartReport {
    pub reason: String,
    pub restarted: Vec<WorkerId>,
    pub timed_out: Vec<WorkerId>,
    /// Workers that were no longer live when their turn came
    pub skipped: Vec<WorkerId>,
    pub failed: Vec<WorkerId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollingRestartOutcome {
    Completed(RollingRestartReport),
    /// Another session is running; nothing was touched
    AlreadyInProgress,
    ShuttingDown,
}

/// Status of one worker as reported by [`Watchdog::get_status`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerStatus {
    #[serde(flatten)]
    pub health: WorkerSummary,
    pub state: Option<WorkerState>,
    pub pid: Option<u32>,
    pub last_crash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchdogStatus {
    pub monitoring: bool,
    pub rolling_restart_in_progress: bool,
    pub pending_restarts: Vec<WorkerId>,
    pub system_health: HealthStatus,
    pub maintenance_enabled: bool,
    pub maintenance: MaintenanceState,
    pub workers: Vec<WorkerStatus>,
    pub generated_at: DateTime<Utc>,
}

/// Top-level coordinator of the worker pool
///
/// Drives the periodic health check, kills unhealthy workers, escalates to
/// maintenance mode and runs graceful restarts. The watchdog never respawns
/// workers itself except inside a rolling-restart session.
pub struct Watchdog {
    config: Arc<SupervisorConfig>,
    health: Arc<RwLock<HealthMonitor>>,
    orchestrator: Arc<Orchestrator>,
    maintenance: Arc<dyn MaintenanceControl>,
    alerts: Alerter,
    session: RollingRestartSession,
    monitoring: AtomicBool,
    accepting: AtomicBool,
    stop_signal: Notify,
    last_system_health: Mutex<HealthStatus>,
    status_file: Option<JsonStore<WatchdogStatus>>,
}

impl Watchdog {
    pub fn new(
        config: Arc<SupervisorConfig>,
        orchestrator: Arc<Orchestrator>,
        maintenance: Arc<dyn MaintenanceControl>,
        alerts: Alerter,
    ) -> Self {
        Self {
            health: Arc::clone(orchestrator.health()),
            config,
            orchestrator,
            maintenance,
            alerts,
            session: RollingRestartSession::new(),
            monitoring: AtomicBool::new(false),
            accepting: AtomicBool::new(true),
            stop_signal: Notify::new(),
            last_system_health: Mutex::new(HealthStatus::Healthy),
            status_file: None,
        }
    }

    /// Write a status snapshot to `path` after every cycle
    pub fn with_status_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.status_file = Some(JsonStore::new(path));
        self
    }

    /// Start the periodic check loop
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        self.monitoring.store(true, Ordering::SeqCst);
        let watchdog = Arc::clone(self);

        tokio::spawn(async move {
            let interval = watchdog.config.check_interval();
            info!("Starting watchdog (check interval: {:?})", interval);

            let mut ticker = tokio::time::interval_at(deadline_after(interval), interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = watchdog.stop_signal.notified() => break,
                }

                if !watchdog.monitoring.load(Ordering::SeqCst) {
                    break;
                }

                watchdog.run_cycle().await;
            }

            info!("Watchdog stopped");
        })
    }

    /// Stop the periodic check loop
    pub fn stop(&self) {
        self.monitoring.store(false, Ordering::SeqCst);
        self.stop_signal.notify_waiters();
    }

    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }

    /// Perform a single health check cycle
    ///
    /// Kills workers that stopped heartbeating, escalates to maintenance mode
    /// when the system is unhealthy, and polls maintenance auto-disable.
    ///
    /// # Returns
    /// What the cycle observed. Errors are logged here and never returned, so
    /// a broken check cannot stop the loop.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::new();

        if let Err(e) = self.check_cycle(&mut report).await {
            error!("Error during health check cycle: {}", e);
        }

        if let Some(ref status_file) = self.status_file {
            let status = self.get_status().await;
            if let Err(e) = status_file.save(&status) {
                warn!("Failed to write status file: {}", e);
            }
        }

        report
    }

    async fn check_cycle(&self, report: &mut CycleReport) -> Result<()> {
        debug!("Performing health check");

        report.unhealthy = self.health.write().await.check_all_heartbeats();

        if !report.unhealthy.is_empty() {
            warn!(
                "Detected {} worker(s) without heartbeats",
                report.unhealthy.len()
            );
        }

        for id in &report.unhealthy {
            match self.orchestrator.terminate(*id, true).await {
                Ok(_) => report.killed.push(*id),
                Err(e) => warn!(worker = %id, "Failed to kill unhealthy worker: {}", e),
            }
        }

        let (system_health, unhealthy_workers) = {
            let health = self.health.read().await;
            (
                health.system_health(),
                health.workers_with_status(HealthStatus::Unhealthy),
            )
        };
        report.system_health = system_health;

        if system_health == HealthStatus::Unhealthy {
            report.maintenance_escalated = self.orchestrator.escalate_if_unhealthy().await;
        }

        let degraded = {
            let mut last = self
                .last_system_health
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let degraded = *last == HealthStatus::Healthy && system_health != HealthStatus::Healthy;
            *last = system_health;
            degraded
        };

        if degraded {
            self.alerts.notify(Alert::SystemHealthDegraded {
                status: system_health,
                unhealthy: unhealthy_workers,
            });
        }

        report.maintenance_auto_disabled = self.maintenance.check_auto_disable().await?;

        Ok(())
    }

    /// Gracefully restart one worker outside any rolling-restart session
    ///
    /// The orchestrator respawns the worker once it exits.
    pub async fn restart_worker(&self, id: WorkerId) -> Result<DrainOutcome> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(VigilError::ShuttingDown);
        }
        self.drain_and_replace(id, false).await
    }

    pub async fn force_kill_worker(&self, id: WorkerId) -> Result<()> {
        self.orchestrator.terminate(id, true).await.map(|_| ())
    }

    /// Restart every live worker one at a time
    ///
    /// # Arguments
    /// * `reason` - Why the restart was requested; carried into alerts and logs
    ///
    /// # Returns
    /// * `Completed` - The session ran; the report lists what happened per worker
    /// * `AlreadyInProgress` - Another session holds the guard; nothing was touched
    /// * `ShuttingDown` - The supervisor no longer accepts restart requests
    pub async fn graceful_rolling_restart(&self, reason: &str) -> RollingRestartOutcome {
        if !self.accepting.load(Ordering::SeqCst) {
            info!("Ignoring rolling restart ({}): shutting down", reason);
            return RollingRestartOutcome::ShuttingDown;
        }

        let workers = self.orchestrator.live_worker_ids().await;
        let guard = match self.session.try_begin(workers.clone()) {
            Some(guard) => guard,
            None => {
                info!("Rolling restart already in progress; ignoring request ({})", reason);
                return RollingRestartOutcome::AlreadyInProgress;
            }
        };

        info!("Starting rolling restart of {} workers: {}", workers.len(), reason);
        self.alerts.notify(Alert::RollingRestartStarted {
            reason: reason.to_string(),
            workers: workers.len(),
        });

        let mut report = RollingRestartReport {
            reason: reason.to_string(),
            restarted: Vec::new(),
            timed_out: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        };

        while let Some(id) = guard.next_worker() {
            match self.drain_and_replace(id, true).await {
                Ok(DrainOutcome::Exited) => report.restarted.push(id),
                Ok(DrainOutcome::TimedOut) => {
                    report.restarted.push(id);
                    report.timed_out.push(id);
                }
                Err(VigilError::ShuttingDown) => {
                    info!("Shutdown in progress; abandoning rolling restart");
                    report.skipped.push(id);
                    report.skipped.extend(self.session.pending());
                    break;
                }
                Err(VigilError::WorkerNotFound(_)) | Err(VigilError::InvalidWorkerState(..)) => {
                    info!(worker = %id, "Worker no longer live; skipping");
                    report.skipped.push(id);
                }
                Err(e) => {
                    error!(worker = %id, "Failed to restart worker: {}", e);
                    report.failed.push(id);
                }
            }
        }
        drop(guard);

        info!(
            "Rolling restart completed: {} restarted, {} timed out, {} skipped, {} failed",
            report.restarted.len(),
            report.timed_out.len(),
            report.skipped.len(),
            report.failed.len()
        );
        self.alerts.notify(Alert::RollingRestartCompleted {
            reason: reason.to_string(),
            restarted: report.restarted.len(),
            timed_out: report.timed_out.len(),
        });

        RollingRestartOutcome::Completed(report)
    }

    /// Drain one worker, force-killing it if the drain times out
    ///
    /// In a session the replacement is spawned here, followed by the settle
    /// delay.
    async fn drain_and_replace(&self, id: WorkerId, in_session: bool) -> Result<DrainOutcome> {
        let drain_timeout = self.config.drain_timeout();
        let mut exits = self.orchestrator.subscribe_exits();

        let pid = self.orchestrator.begin_drain(id, in_session).await?;
        let target = [(id, pid)];

        let remaining = self
            .orchestrator
            .wait_for_exits(&mut exits, &target, deadline_after(drain_timeout))
            .await;

        let mut outcome = Ok(DrainOutcome::Exited);
        if !remaining.is_empty() {
            warn!(
                worker = %id,
                pid,
                "Drain timed out after {:?}; force killing",
                drain_timeout
            );
            if let Err(e) = self.orchestrator.terminate_process(id, Some(pid), true).await {
                debug!(worker = %id, "Kill after drain timeout skipped: {}", e);
            }

            let left = self
                .orchestrator
                .wait_for_exits(&mut exits, &target, deadline_after(FORCE_KILL_GRACE))
                .await;
            outcome = if left.is_empty() {
                Ok(DrainOutcome::TimedOut)
            } else {
                Err(VigilError::TimeoutError(format!(
                    "Worker {} (PID: {}) did not exit after SIGKILL",
                    id, pid
                )))
            };
        }

        if in_session {
            self.orchestrator.respawn(id).await?;
            tokio::time::sleep(self.config.settle_delay()).await;
        }

        outcome
    }

    /// Read-only aggregate of the supervisor's state
    pub async fn get_status(&self) -> WatchdogStatus {
        let (system_health, summaries) = {
            let health = self.health.read().await;
            (health.system_health(), health.all_worker_summaries())
        };
        let slots = self.orchestrator.slot_summaries().await;
        let maintenance = self.maintenance.state().await;

        let workers = summaries
            .into_iter()
            .map(|summary| {
                let slot = slots.iter().find(|slot| slot.id == summary.id);
                WorkerStatus {
                    state: slot.map(|slot| slot.state),
                    pid: slot.and_then(|slot| slot.pid),
                    last_crash: slot.and_then(|slot| slot.last_crash.clone()),
                    health: summary,
                }
            })
            .collect();

        WatchdogStatus {
            monitoring: self.is_monitoring(),
            rolling_restart_in_progress: self.session.is_in_progress(),
            pending_restarts: self.session.pending(),
            system_health,
            maintenance_enabled: maintenance.enabled,
            maintenance,
            workers,
            generated_at: Utc::now(),
        }
    }

    pub fn is_rolling_restart_in_progress(&self) -> bool {
        self.session.is_in_progress()
    }

    /// Read-only access to the health monitor
    pub async fn health_monitor(&self) -> RwLockReadGuard<'_, HealthMonitor> {
        self.health.read().await
    }

    pub async fn subscribe_status_changes(&self) -> broadcast::Receiver<StatusChange> {
        self.health.read().await.subscribe()
    }

    /// Stop monitoring, refuse new restarts and drain the pool
    pub async fn shutdown(&self) {
        info!("Watchdog shutting down");
        self.accepting.store(false, Ordering::SeqCst);
        self.stop();
        self.orchestrator
            .shutdown(self.config.graceful_shutdown_timeout())
            .await;
    }
}
