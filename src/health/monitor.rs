use crate::config::SupervisorConfig;
use crate::health::record::{
    HealthRecord, HealthStatus, HealthThresholds, HeartbeatMetrics, WorkerSummary,
    MISSED_CHECKS_BEFORE_UNHEALTHY,
};
use crate::process::WorkerId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const STATUS_CHANGE_CAPACITY: usize = 64;

/// A worker moved from one health status to another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub id: WorkerId,
    pub from: HealthStatus,
    pub to: HealthStatus,
}

/// Health monitor owning one health record per live worker
///
/// The monitor only classifies. Killing, alerting and escalation belong to
/// the watchdog.
pub struct HealthMonitor {
    records: HashMap<WorkerId, HealthRecord>,
    thresholds: HealthThresholds,
    heartbeat_timeout: Duration,
    changes: broadcast::Sender<StatusChange>,
}

impl HealthMonitor {
    pub fn new(thresholds: HealthThresholds, heartbeat_timeout: Duration) -> Self {
        let (changes, _) = broadcast::channel(STATUS_CHANGE_CAPACITY);
        Self {
            records: HashMap::new(),
            thresholds,
            heartbeat_timeout,
            changes,
        }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(
            HealthThresholds::new(config.memory_threshold_mb),
            config.heartbeat_timeout(),
        )
    }

    /// Start tracking a worker; no-op if it is already tracked
    pub fn register_worker(&mut self, id: WorkerId) {
        if self.records.contains_key(&id) {
            return;
        }
        debug!(worker = %id, "Registering worker with health monitor");
        self.records.insert(id, HealthRecord::new(id, Instant::now()));
    }

    /// Ingest a heartbeat and re-derive the worker's status
    pub fn process_heartbeat(&mut self, id: WorkerId, metrics: HeartbeatMetrics) {
        let now = Instant::now();
        let record = self
            .records
            .entry(id)
            .or_insert_with(|| HealthRecord::new(id, now));

        record.apply_heartbeat(metrics, now);
        let change = record.derive_status(&self.thresholds);
        if let Some(from) = change {
            let to = record.status;
            self.publish(id, from, to);
        }
    }

    /// Run one check cycle over every record
    ///
    /// Returns the workers that have missed enough consecutive cycles to be
    /// considered unhealthy.
    pub fn check_all_heartbeats(&mut self) -> Vec<WorkerId> {
        let now = Instant::now();
        let mut unhealthy = Vec::new();
        let mut changes = Vec::new();

        for (id, record) in self.records.iter_mut() {
            if record.heartbeat_overdue(self.heartbeat_timeout, now) {
                record.heartbeat_miss_count += 1;
                debug!(
                    worker = %id,
                    misses = record.heartbeat_miss_count,
                    "Worker missed a heartbeat"
                );

                if record.heartbeat_miss_count >= MISSED_CHECKS_BEFORE_UNHEALTHY {
                    if let Some(from) = record.set_status(HealthStatus::Unhealthy) {
                        changes.push((*id, from, HealthStatus::Unhealthy));
                    }
                    unhealthy.push(*id);
                }
            } else if let Some(from) = record.derive_status(&self.thresholds) {
                changes.push((*id, from, record.status));
            }
        }

        for (id, from, to) in changes {
            self.publish(id, from, to);
        }

        unhealthy.sort();
        unhealthy
    }

    /// Worst status among all tracked workers
    pub fn system_health(&self) -> HealthStatus {
        self.records
            .values()
            .map(|record| record.status)
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }

    /// Reset the record of a slot that received a replacement process
    pub fn record_restart(&mut self, id: WorkerId) {
        let now = Instant::now();
        let record = self
            .records
            .entry(id)
            .or_insert_with(|| HealthRecord::new(id, now));
        let previous = record.status;
        record.record_restart(now);
        if previous != HealthStatus::Healthy {
            self.publish(id, previous, HealthStatus::Healthy);
        }
    }

    /// Stop tracking a worker that exited for good
    pub fn remove_worker(&mut self, id: WorkerId) -> bool {
        self.records.remove(&id).is_some()
    }

    pub fn status(&self, id: WorkerId) -> Option<HealthStatus> {
        self.records.get(&id).map(|record| record.status)
    }

    pub fn worker_summary(&self, id: WorkerId) -> Option<WorkerSummary> {
        let now = Instant::now();
        self.records.get(&id).map(|record| record.summary(now))
    }

    /// Snapshot of every tracked worker, ordered by id
    pub fn all_worker_summaries(&self) -> Vec<WorkerSummary> {
        let now = Instant::now();
        let mut summaries: Vec<WorkerSummary> = self
            .records
            .values()
            .map(|record| record.summary(now))
            .collect();
        summaries.sort_by_key(|summary| summary.id);
        summaries
    }

    /// Ids of workers currently classified with `status`
    pub fn workers_with_status(&self, status: HealthStatus) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = self
            .records
            .values()
            .filter(|record| record.status == status)
            .map(|record| record.id)
            .collect();
        ids.sort();
        ids
    }

    pub fn worker_count(&self) -> usize {
        self.records.len()
    }

    /// Subscribe to status transitions
    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.changes.subscribe()
    }

    fn publish(&self, id: WorkerId, from: HealthStatus, to: HealthStatus) {
        match to {
            HealthStatus::Healthy => info!(worker = %id, "Worker health {} -> {}", from, to),
            _ => warn!(worker = %id, "Worker health {} -> {}", from, to),
        }
        // No subscribers is fine
        let _ = self.changes.send(StatusChange { id, from, to });
    }
}
