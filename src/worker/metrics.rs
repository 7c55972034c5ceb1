use crate::health::HeartbeatMetrics;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::time::Instant;

/// Period of the event-loop lag probe
pub const LAG_PROBE_INTERVAL: Duration = Duration::from_millis(100);

/// Load counters shared between request handlers and the heartbeat loop
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    requests: AtomicU64,
    errors: AtomicU64,
    in_flight: AtomicUsize,
    /// Worst lag seen since the last heartbeat
    max_lag_ms: AtomicU64,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark one request in flight without counting it yet
    pub(crate) fn enter(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    /// Count a request admitted by [`WorkerMetrics::enter`]
    pub(crate) fn count_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of requests still in flight
    pub(crate) fn request_finished(&self) -> usize {
        self.in_flight.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lag(&self, lag: Duration) {
        self.max_lag_ms
            .fetch_max(lag.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Heartbeat payload; resets the lag high-water mark
    pub fn snapshot(&self, memory_usage_mb: u64) -> HeartbeatMetrics {
        HeartbeatMetrics {
            memory_usage_mb,
            event_loop_lag_ms: self.max_lag_ms.swap(0, Ordering::Relaxed),
            error_count: self.errors.load(Ordering::Relaxed),
            request_count: self.requests.load(Ordering::Relaxed),
        }
    }
}

/// Measure scheduler lag as the overshoot of a fixed sleep, forever
pub async fn run_lag_probe(metrics: std::sync::Arc<WorkerMetrics>) {
    loop {
        let started = Instant::now();
        tokio::time::sleep(LAG_PROBE_INTERVAL).await;
        let overshoot = started.elapsed().saturating_sub(LAG_PROBE_INTERVAL);
        metrics.record_lag(overshoot);
    }
}

/// Resident memory of the current process
pub struct MemorySampler {
    system: System,
    pid: Option<Pid>,
}

impl MemorySampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    pub fn sample_mb(&mut self) -> u64 {
        let pid = match self.pid {
            Some(pid) => pid,
            None => return 0,
        };

        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );

        self.system
            .process(pid)
            .map(|process| process.memory() / (1024 * 1024))
            .unwrap_or(0)
    }
}

impl Default for MemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_are_cumulative() {
        let metrics = WorkerMetrics::new();
        for _ in 0..2 {
            metrics.enter();
            metrics.count_request();
        }
        metrics.record_error();
        assert_eq!(metrics.request_finished(), 1);

        let first = metrics.snapshot(10);
        let second = metrics.snapshot(10);
        assert_eq!(first.request_count, 2);
        assert_eq!(second.request_count, 2);
        assert_eq!(second.error_count, 1);
        assert_eq!(metrics.in_flight(), 1);
    }

    #[test]
    fn test_lag_resets_after_snapshot() {
        let metrics = WorkerMetrics::new();
        metrics.record_lag(Duration::from_millis(40));
        metrics.record_lag(Duration::from_millis(180));
        metrics.record_lag(Duration::from_millis(20));

        assert_eq!(metrics.snapshot(0).event_loop_lag_ms, 180);
        assert_eq!(metrics.snapshot(0).event_loop_lag_ms, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lag_probe_on_idle_loop() {
        let metrics = Arc::new(WorkerMetrics::new());
        let probe = tokio::spawn(run_lag_probe(Arc::clone(&metrics)));

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        probe.abort();

        assert_eq!(metrics.snapshot(0).event_loop_lag_ms, 0);
    }

    #[test]
    fn test_memory_sampler_tracks_own_pid() {
        let mut sampler = MemorySampler::new();
        assert_eq!(
            sampler.pid.map(|pid| pid.as_u32()),
            Some(std::process::id())
        );
        let _ = sampler.sample_mb();
    }
}
