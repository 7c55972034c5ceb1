// Alert module - fire-and-forget notifications raised by the supervisor

use crate::error::Result;
use crate::health::HealthStatus;
use crate::process::WorkerId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};

/// Something an operator should hear about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Alert {
    /// A worker slot keeps dying and will not be respawned
    CrashLoopDetected {
        worker: WorkerId,
        restarts: usize,
        window_ms: u64,
    },
    /// System health left `Healthy`
    SystemHealthDegraded {
        status: HealthStatus,
        unhealthy: Vec<WorkerId>,
    },
    RollingRestartStarted {
        reason: String,
        workers: usize,
    },
    RollingRestartCompleted {
        reason: String,
        restarted: usize,
        timed_out: usize,
    },
    /// Maintenance mode was switched on by the watchdog
    MaintenanceActivated {
        reason: String,
    },
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Alert::CrashLoopDetected {
                worker,
                restarts,
                window_ms,
            } => write!(
                f,
                "Worker {} is crash looping ({} restarts within {}ms); respawn suppressed",
                worker, restarts, window_ms
            ),
            Alert::SystemHealthDegraded { status, unhealthy } => {
                let ids: Vec<String> = unhealthy.iter().map(|id| id.to_string()).collect();
                if ids.is_empty() {
                    write!(f, "System health is {}", status)
                } else {
                    write!(
                        f,
                        "System health is {} (unhealthy workers: {})",
                        status,
                        ids.join(", ")
                    )
                }
            }
            Alert::RollingRestartStarted { reason, workers } => write!(
                f,
                "Rolling restart started for {} workers: {}",
                workers, reason
            ),
            Alert::RollingRestartCompleted {
                reason,
                restarted,
                timed_out,
            } => write!(
                f,
                "Rolling restart completed ({} restarted, {} drain timeouts): {}",
                restarted, timed_out, reason
            ),
            Alert::MaintenanceActivated { reason } => {
                write!(f, "Maintenance mode activated by watchdog: {}", reason)
            }
        }
    }
}

/// Delivery transport for alerts (email, chat, paging, ...)
pub trait AlertSink: Send + Sync {
    fn deliver(&self, alert: &Alert) -> Result<()>;
}

/// Writes alerts to the log
#[derive(Debug, Default)]
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn deliver(&self, alert: &Alert) -> Result<()> {
        match alert {
            Alert::CrashLoopDetected { .. } => error!(alert = "crash_loop", "{}", alert),
            Alert::SystemHealthDegraded { .. } => warn!(alert = "health", "{}", alert),
            Alert::MaintenanceActivated { .. } => warn!(alert = "maintenance", "{}", alert),
            Alert::RollingRestartStarted { .. } | Alert::RollingRestartCompleted { .. } => {
                info!(alert = "rolling_restart", "{}", alert)
            }
        }
        Ok(())
    }
}

/// Keeps every delivered alert in memory
#[derive(Debug, Default, Clone)]
pub struct RecordingAlertSink {
    alerts: Arc<Mutex<Vec<Alert>>>,
}

impl RecordingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn clear(&self) {
        self.alerts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

impl AlertSink for RecordingAlertSink {
    fn deliver(&self, alert: &Alert) -> Result<()> {
        self.alerts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(alert.clone());
        Ok(())
    }
}

/// Fans alerts out to every registered sink
///
/// Delivery failures are logged and dropped; they never reach the caller.
#[derive(Clone, Default)]
pub struct Alerter {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl Alerter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Alerter that only writes to the log
    pub fn logging() -> Self {
        Self::new().with_sink(Arc::new(LogAlertSink))
    }

    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    pub fn notify(&self, alert: Alert) {
        for sink in &self.sinks {
            if let Err(e) = sink.deliver(&alert) {
                warn!("Failed to deliver alert ({}): {}", alert, e);
            }
        }
    }
}
