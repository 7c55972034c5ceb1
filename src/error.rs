use crate::process::WorkerId;
use thiserror::Error;

/// Main error type for the vigil supervisor
#[derive(Debug, Error)]
pub enum VigilError {
    // Worker-related errors
    #[error("Worker not found: {0}")]
    WorkerNotFound(WorkerId),

    #[error("Failed to spawn worker: {0}")]
    SpawnError(String),

    #[error("Worker {0} is in invalid state for this operation: {1}")]
    InvalidWorkerState(WorkerId, String),

    #[error("Command channel to worker {0} is closed")]
    ChannelClosed(WorkerId),

    #[error("Signal error: {0}")]
    SignalError(String),

    // Protocol errors
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // Persisted state errors (maintenance state, status snapshot, pid file)
    #[error("State error: {0}")]
    StateError(String),

    #[error("Failed to load state: {0}")]
    StateLoadError(String),

    #[error("Failed to save state: {0}")]
    StateSaveError(String),

    // Supervisor lifecycle errors
    #[error("Supervisor is shutting down")]
    ShuttingDown,

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    // IO errors (automatically converted from std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for vigil operations
pub type Result<T> = std::result::Result<T, VigilError>;
