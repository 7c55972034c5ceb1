use crate::process::WorkerId;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::time::Instant;

/// Error rate above which a worker is degraded
pub const ERROR_RATE_THRESHOLD: f64 = 0.10;

/// Event-loop lag above which a worker is degraded
pub const EVENT_LOOP_LAG_THRESHOLD_MS: u64 = 100;

/// Consecutive missed check cycles that make a worker unhealthy
pub const MISSED_CHECKS_BEFORE_UNHEALTHY: u32 = 2;

/// Health classification, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Load metrics carried by a heartbeat
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatMetrics {
    pub memory_usage_mb: u64,
    pub event_loop_lag_ms: u64,
    pub error_count: u64,
    pub request_count: u64,
}

impl HeartbeatMetrics {
    /// Fraction of requests that failed, if any were served
    pub fn error_rate(&self) -> Option<f64> {
        if self.request_count == 0 {
            None
        } else {
            Some(self.error_count as f64 / self.request_count as f64)
        }
    }
}

/// Limits used to classify a worker from its metrics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthThresholds {
    pub memory_threshold_mb: u64,
    pub error_rate: f64,
    pub event_loop_lag_ms: u64,
}

impl HealthThresholds {
    pub fn new(memory_threshold_mb: u64) -> Self {
        Self {
            memory_threshold_mb,
            error_rate: ERROR_RATE_THRESHOLD,
            event_loop_lag_ms: EVENT_LOOP_LAG_THRESHOLD_MS,
        }
    }

    /// Classify metrics; the first matching rule wins
    pub fn classify(&self, metrics: &HeartbeatMetrics) -> HealthStatus {
        if metrics.memory_usage_mb > self.memory_threshold_mb {
            return HealthStatus::Unhealthy;
        }

        if let Some(rate) = metrics.error_rate() {
            if rate > self.error_rate {
                return HealthStatus::Degraded;
            }
        }

        if metrics.event_loop_lag_ms > self.event_loop_lag_ms {
            return HealthStatus::Degraded;
        }

        HealthStatus::Healthy
    }
}

/// Mutable health state of one live worker
#[derive(Debug, Clone)]
pub struct HealthRecord {
    pub id: WorkerId,
    pub status: HealthStatus,
    pub last_heartbeat_at: Instant,
    pub heartbeat_miss_count: u32,
    pub metrics: HeartbeatMetrics,
    pub restart_count: u32,
    pub last_restart_at: Option<Instant>,
}

impl HealthRecord {
    pub fn new(id: WorkerId, now: Instant) -> Self {
        Self {
            id,
            status: HealthStatus::Healthy,
            last_heartbeat_at: now,
            heartbeat_miss_count: 0,
            metrics: HeartbeatMetrics::default(),
            restart_count: 0,
            last_restart_at: None,
        }
    }

    /// Ingest a heartbeat: refresh the clock, clear misses, copy metrics
    pub fn apply_heartbeat(&mut self, metrics: HeartbeatMetrics, now: Instant) {
        self.last_heartbeat_at = now;
        self.heartbeat_miss_count = 0;
        self.metrics = metrics;
    }

    /// Re-derive status from the current metrics
    ///
    /// Returns the previous status when it changed.
    pub fn derive_status(&mut self, thresholds: &HealthThresholds) -> Option<HealthStatus> {
        let next = thresholds.classify(&self.metrics);
        self.set_status(next)
    }

    pub(crate) fn set_status(&mut self, next: HealthStatus) -> Option<HealthStatus> {
        if self.status == next {
            return None;
        }
        let previous = self.status;
        self.status = next;
        Some(previous)
    }

    /// Whether the last heartbeat is older than `timeout`
    pub fn heartbeat_overdue(&self, timeout: std::time::Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_heartbeat_at) > timeout
    }

    /// Reset for a replacement process in the same slot
    pub fn record_restart(&mut self, now: Instant) {
        self.status = HealthStatus::Healthy;
        self.last_heartbeat_at = now;
        self.heartbeat_miss_count = 0;
        self.metrics = HeartbeatMetrics::default();
        self.restart_count += 1;
        self.last_restart_at = Some(now);
    }

    pub fn summary(&self, now: Instant) -> WorkerSummary {
        WorkerSummary {
            id: self.id,
            status: self.status,
            last_heartbeat_ms_ago: millis_since(self.last_heartbeat_at, now),
            heartbeat_miss_count: self.heartbeat_miss_count,
            metrics: self.metrics,
            restart_count: self.restart_count,
            last_restart_ms_ago: self.last_restart_at.map(|at| millis_since(at, now)),
        }
    }
}

fn millis_since(at: Instant, now: Instant) -> u64 {
    now.saturating_duration_since(at).as_millis() as u64
}

/// Read-only snapshot of one worker's health, for reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub id: WorkerId,
    pub status: HealthStatus,
    pub last_heartbeat_ms_ago: u64,
    pub heartbeat_miss_count: u32,
    pub metrics: HeartbeatMetrics,
    pub restart_count: u32,
    pub last_restart_ms_ago: Option<u64>,
}
