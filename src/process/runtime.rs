use crate::config::WorkerConfig;
use crate::error::{Result, VigilError};
use crate::ipc::{decode_worker_message, encode_line, SupervisorMessage, WorkerMessage};
use crate::process::spawner::spawn_worker;
use crate::process::types::{ExitReason, WorkerEvent, WorkerId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// How long an exit event waits for the worker's last stdout lines
const STDOUT_FLUSH_GRACE: Duration = Duration::from_secs(1);

/// Operations the supervisor needs from whatever hosts its workers
///
/// Inbound traffic (ready, heartbeats, crash reports, exits) is delivered
/// asynchronously on the event channel the implementation was built with.
#[async_trait]
pub trait WorkerRuntime: Send + Sync {
    /// Start a worker process in the given slot and return its pid
    async fn spawn(&self, id: WorkerId) -> Result<u32>;

    /// Terminate a worker: politely (SIGTERM) or forcibly (SIGKILL)
    async fn terminate(&self, id: WorkerId, forcible: bool) -> Result<()>;

    /// Ask a worker to drain
    async fn send_drain(&self, id: WorkerId) -> Result<()>;
}

struct WorkerHandle {
    pid: u32,
    commands: mpsc::UnboundedSender<SupervisorMessage>,
}

/// Worker runtime backed by real OS processes
pub struct ProcessRuntime {
    config: WorkerConfig,
    heartbeat_interval: Duration,
    events: mpsc::UnboundedSender<WorkerEvent>,
    workers: Arc<Mutex<HashMap<WorkerId, WorkerHandle>>>,
}

impl ProcessRuntime {
    pub fn new(
        config: WorkerConfig,
        heartbeat_interval: Duration,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        Self {
            config,
            heartbeat_interval,
            events,
            workers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Pid of the process currently occupying a slot
    pub async fn pid_of(&self, id: WorkerId) -> Option<u32> {
        self.workers.lock().await.get(&id).map(|handle| handle.pid)
    }

    async fn write_commands(
        id: WorkerId,
        mut stdin: ChildStdin,
        mut commands: mpsc::UnboundedReceiver<SupervisorMessage>,
    ) {
        while let Some(message) = commands.recv().await {
            let line = match encode_line(&message) {
                Ok(line) => line,
                Err(e) => {
                    warn!(worker = %id, "Dropping command: {}", e);
                    continue;
                }
            };

            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                debug!(worker = %id, "Command channel closed: {}", e);
                break;
            }
            if let Err(e) = stdin.flush().await {
                debug!(worker = %id, "Command channel closed: {}", e);
                break;
            }
        }
    }

    async fn read_reports(
        id: WorkerId,
        stdout: ChildStdout,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) {
        let mut lines = BufReader::new(stdout).lines();

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    debug!(worker = %id, "Failed to read worker output: {}", e);
                    break;
                }
            };

            let event = match decode_worker_message(&line) {
                Ok(WorkerMessage::Ready { pid }) => WorkerEvent::Ready { id, pid },
                Ok(WorkerMessage::Heartbeat(metrics)) => WorkerEvent::Heartbeat { id, metrics },
                Ok(WorkerMessage::CrashReport { message }) => {
                    WorkerEvent::CrashReport { id, message }
                }
                Ok(WorkerMessage::Draining { in_flight }) => {
                    debug!(worker = %id, in_flight, "Worker is draining");
                    continue;
                }
                Err(_) => {
                    debug!(worker = %id, "stdout: {}", line);
                    continue;
                }
            };

            if events.send(event).is_err() {
                break;
            }
        }
    }
}

#[async_trait]
impl WorkerRuntime for ProcessRuntime {
    async fn spawn(&self, id: WorkerId) -> Result<u32> {
        let mut spawned = spawn_worker(&self.config, id, self.heartbeat_interval)?;
        let pid = spawned.pid;

        let stdin = spawned.child.stdin.take().ok_or_else(|| {
            VigilError::SpawnError(format!("Worker {} has no stdin pipe", id))
        })?;
        let stdout = spawned.child.stdout.take().ok_or_else(|| {
            VigilError::SpawnError(format!("Worker {} has no stdout pipe", id))
        })?;

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        self.workers.lock().await.insert(
            id,
            WorkerHandle {
                pid,
                commands: commands_tx,
            },
        );

        tokio::spawn(Self::write_commands(id, stdin, commands_rx));
        let reader = tokio::spawn(Self::read_reports(id, stdout, self.events.clone()));

        let mut child = spawned.child;
        let workers = Arc::clone(&self.workers);
        let events = self.events.clone();
        tokio::spawn(async move {
            let reason = match child.wait().await {
                Ok(status) => ExitReason::from_status(status),
                Err(e) => {
                    warn!(worker = %id, pid, "Failed to wait for worker: {}", e);
                    ExitReason::Unknown
                }
            };

            // Deliver whatever the worker printed last (crash reports) first
            let _ = tokio::time::timeout(STDOUT_FLUSH_GRACE, reader).await;

            {
                let mut workers = workers.lock().await;
                if workers.get(&id).map(|handle| handle.pid) == Some(pid) {
                    workers.remove(&id);
                }
            }

            let _ = events.send(WorkerEvent::Exited {
                id,
                pid: Some(pid),
                reason,
            });
        });

        debug!(worker = %id, pid, "Spawned worker process");
        Ok(pid)
    }

    #[cfg(unix)]
    async fn terminate(&self, id: WorkerId, forcible: bool) -> Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let pid = self
            .pid_of(id)
            .await
            .ok_or(VigilError::WorkerNotFound(id))?;

        let sig = if forcible {
            Signal::SIGKILL
        } else {
            Signal::SIGTERM
        };

        match signal::kill(Pid::from_raw(pid as i32), sig) {
            Ok(()) => Ok(()),
            // Already gone; its exit event is on the way
            Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(VigilError::SignalError(format!(
                "Failed to send {} to worker {} (PID: {}): {}",
                sig, id, pid, e
            ))),
        }
    }

    #[cfg(not(unix))]
    async fn terminate(&self, _id: WorkerId, _forcible: bool) -> Result<()> {
        Err(VigilError::SignalError(
            "Terminating workers is only supported on Unix systems".to_string(),
        ))
    }

    async fn send_drain(&self, id: WorkerId) -> Result<()> {
        let workers = self.workers.lock().await;
        let handle = workers.get(&id).ok_or(VigilError::WorkerNotFound(id))?;
        handle
            .commands
            .send(SupervisorMessage::Drain)
            .map_err(|_| VigilError::ChannelClosed(id))
    }
}
