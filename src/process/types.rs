use crate::health::HeartbeatMetrics;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supervisor-assigned identifier of one worker slot
///
/// Unique while the worker is live. A replacement worker spawned into the
/// same slot reuses the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub u32);

impl WorkerId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a worker slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Starting,
    Running,
    Draining,
    Dead,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Starting => write!(f, "starting"),
            WorkerState::Running => write!(f, "running"),
            WorkerState::Draining => write!(f, "draining"),
            WorkerState::Dead => write!(f, "dead"),
        }
    }
}

/// Why a worker process went away
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Process exited on its own with a status code
    Exited(i32),
    /// Process was terminated by a signal
    Signaled(i32),
    /// The process could not be started at all
    SpawnFailed(String),
    /// Exit status could not be determined
    Unknown,
}

impl ExitReason {
    pub fn from_status(status: std::process::ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitReason::Exited(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitReason::Signaled(signal);
            }
        }

        ExitReason::Unknown
    }

    /// Whether this exit is a clean, voluntary one
    pub fn is_clean(&self) -> bool {
        matches!(self, ExitReason::Exited(0))
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Exited(code) => write!(f, "exited with code {}", code),
            ExitReason::Signaled(signal) => write!(f, "killed by signal {}", signal),
            ExitReason::SpawnFailed(msg) => write!(f, "spawn failed: {}", msg),
            ExitReason::Unknown => write!(f, "unknown exit"),
        }
    }
}

/// Inbound, asynchronous signals from the worker runtime
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Ready {
        id: WorkerId,
        pid: u32,
    },
    Heartbeat {
        id: WorkerId,
        metrics: HeartbeatMetrics,
    },
    CrashReport {
        id: WorkerId,
        message: String,
    },
    Exited {
        id: WorkerId,
        /// Process that exited; `None` when the spawn itself failed
        pid: Option<u32>,
        reason: ExitReason,
    },
}

/// A processed worker exit, broadcast to anyone awaiting it
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerExit {
    pub id: WorkerId,
    pub pid: Option<u32>,
    pub reason: ExitReason,
    /// Whether the orchestrator spawned a replacement on its own
    pub respawned: bool,
}
