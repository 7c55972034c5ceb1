use crate::config::WorkerConfig;
use crate::error::{Result, VigilError};
use crate::ipc::{HEARTBEAT_INTERVAL_ENV, WORKER_ID_ENV};
use crate::process::WorkerId;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

/// Handle returned when spawning a worker process
#[derive(Debug)]
pub struct SpawnedWorker {
    /// The child process handle, with stdin/stdout piped for the protocol
    pub child: Child,

    /// Process ID assigned by the OS
    pub pid: u32,

    /// Slot the process was spawned into
    pub id: WorkerId,
}

/// Spawn one worker process for the given slot
///
/// The worker's stdin and stdout carry the supervisor protocol, stderr is
/// inherited so worker logs land next to the supervisor's. The slot id and
/// heartbeat interval are passed through the environment.
pub fn spawn_worker(
    config: &WorkerConfig,
    id: WorkerId,
    heartbeat_interval: Duration,
) -> Result<SpawnedWorker> {
    // Bare command names are resolved through PATH by the OS
    if config.script.components().count() > 1 && !config.script.exists() {
        return Err(VigilError::SpawnError(format!(
            "Worker executable does not exist: {}",
            config.script.display()
        )));
    }

    let mut command = Command::new(&config.script);

    if !config.args.is_empty() {
        command.args(&config.args);
    }

    if let Some(ref cwd) = config.cwd {
        command.current_dir(cwd);
    }

    for (key, value) in &config.env {
        command.env(key, value);
    }

    command.env(WORKER_ID_ENV, id.to_string());
    command.env(
        HEARTBEAT_INTERVAL_ENV,
        heartbeat_interval.as_millis().to_string(),
    );

    command.stdin(Stdio::piped());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::inherit());
    // Workers never outlive the runtime that waits on them
    command.kill_on_drop(true);

    let child = command.spawn().map_err(|e| {
        VigilError::SpawnError(format!(
            "Failed to spawn worker {} ({}): {}",
            id,
            config.script.display(),
            e
        ))
    })?;

    let pid = child
        .id()
        .ok_or_else(|| VigilError::SpawnError(format!("Failed to get PID for worker {}", id)))?;

    Ok(SpawnedWorker { child, pid, id })
}
