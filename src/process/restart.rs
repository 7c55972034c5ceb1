use crate::config::SupervisorConfig;
use std::time::Duration;
use tokio::time::Instant;

/// Crash-loop policy applied to every worker exit
#[derive(Debug, Clone)]
pub struct CrashLoopPolicy {
    /// Maximum number of restarts of one slot within the window
    pub threshold: usize,
    /// Sliding window for counting restarts
    pub window: Duration,
}

/// Outcome of consulting the crash-loop policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Respawn is allowed; `recent` restarts were already inside the window
    Respawn { recent: usize },
    /// Slot is crash-looping; respawn must be suppressed
    CrashLoop { recent: usize },
}

impl CrashLoopPolicy {
    pub fn new(threshold: usize, window: Duration) -> Self {
        Self { threshold, window }
    }

    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self::new(config.restart_threshold, config.restart_window())
    }

    /// Prune stale entries, then decide whether this slot may restart
    ///
    /// An allowed restart is recorded in the window at `now`.
    pub fn evaluate(&self, window: &mut RestartWindow, now: Instant) -> RestartDecision {
        window.prune(self.window, now);
        let recent = window.len();

        if recent >= self.threshold {
            return RestartDecision::CrashLoop { recent };
        }

        window.record(now);
        RestartDecision::Respawn { recent }
    }
}

impl Default for CrashLoopPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

/// Append-only restart history of one worker slot
#[derive(Debug, Clone, Default)]
pub struct RestartWindow {
    restart_times: Vec<Instant>,
}

impl RestartWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a restart at the given instant
    pub fn record(&mut self, at: Instant) {
        self.restart_times.push(at);
    }

    /// Number of restarts currently held
    pub fn len(&self) -> usize {
        self.restart_times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.restart_times.is_empty()
    }

    pub fn last(&self) -> Option<Instant> {
        self.restart_times.last().copied()
    }

    /// Drop entries older than `window`
    pub fn prune(&mut self, window: Duration, now: Instant) {
        self.restart_times
            .retain(|&time| now.saturating_duration_since(time) < window);
    }

    pub fn clear(&mut self) {
        self.restart_times.clear();
    }
}
