// Health module - per-worker health records and their aggregation

mod monitor;
mod record;

pub use monitor::{HealthMonitor, StatusChange};
pub use record::{
    HealthRecord, HealthStatus, HealthThresholds, HeartbeatMetrics, WorkerSummary,
    ERROR_RATE_THRESHOLD, EVENT_LOOP_LAG_THRESHOLD_MS, MISSED_CHECKS_BEFORE_UNHEALTHY,
};
