// Supervisor <-> worker protocol: one JSON object per line over the
// worker's stdin (commands) and stdout (reports)

use crate::error::{Result, VigilError};
use crate::health::HeartbeatMetrics;
use serde::{Deserialize, Serialize};

/// Environment variable carrying the worker's slot id
pub const WORKER_ID_ENV: &str = "VIGIL_WORKER_ID";

/// Environment variable carrying the heartbeat period in milliseconds
pub const HEARTBEAT_INTERVAL_ENV: &str = "VIGIL_HEARTBEAT_INTERVAL_MS";

/// Commands sent from the supervisor to a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorMessage {
    /// Stop accepting work and exit once in-flight work reaches zero
    Drain,
}

/// Reports sent from a worker to the supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Worker finished starting up
    Ready { pid: u32 },
    /// Periodic liveness and load report
    Heartbeat(HeartbeatMetrics),
    /// Worker hit a fatal error and is about to die
    CrashReport { message: String },
    /// Worker acknowledged a drain command
    Draining { in_flight: usize },
}

/// Encode a message as a single newline-terminated line
pub fn encode_line<T: Serialize>(message: &T) -> Result<String> {
    let mut line = serde_json::to_string(message)
        .map_err(|e| VigilError::ProtocolError(format!("Failed to encode message: {}", e)))?;
    line.push('\n');
    Ok(line)
}

/// Decode a worker report from one line of its stdout
pub fn decode_worker_message(line: &str) -> Result<WorkerMessage> {
    serde_json::from_str(line.trim())
        .map_err(|e| VigilError::ProtocolError(format!("Invalid worker message: {}", e)))
}

/// Decode a supervisor command from one line of the worker's stdin
pub fn decode_supervisor_message(line: &str) -> Result<SupervisorMessage> {
    serde_json::from_str(line.trim())
        .map_err(|e| VigilError::ProtocolError(format!("Invalid supervisor message: {}", e)))
}
