// Worker module - the worker side of the supervisor protocol
//
// A worker process builds a `WorkerShell`, wraps each unit of work in
// `begin_request()`, and runs `run()` until the supervisor asks it to drain.

pub mod metrics;

pub use metrics::{MemorySampler, WorkerMetrics};

use crate::error::{Result, VigilError};
use crate::ipc::{
    decode_supervisor_message, encode_line, SupervisorMessage, WorkerMessage,
    HEARTBEAT_INTERVAL_ENV, WORKER_ID_ENV,
};
use crate::process::WorkerId;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(5000);

/// Runtime shell every worker process runs inside
#[derive(Clone)]
pub struct WorkerShell {
    id: WorkerId,
    heartbeat_interval: Duration,
    metrics: Arc<WorkerMetrics>,
    draining: Arc<AtomicBool>,
    idle: Arc<Notify>,
}

/// Marks one request as in flight until dropped
#[must_use = "the request is finished as soon as the guard is dropped"]
pub struct RequestGuard {
    metrics: Arc<WorkerMetrics>,
    idle: Arc<Notify>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        if self.metrics.request_finished() == 0 {
            self.idle.notify_one();
        }
    }
}

impl WorkerShell {
    pub fn new(id: WorkerId, heartbeat_interval: Duration) -> Self {
        Self {
            id,
            heartbeat_interval,
            metrics: Arc::new(WorkerMetrics::new()),
            draining: Arc::new(AtomicBool::new(false)),
            idle: Arc::new(Notify::new()),
        }
    }

    /// Build the shell from the environment set up by the supervisor
    pub fn from_env() -> Result<Self> {
        let id = std::env::var(WORKER_ID_ENV)
            .map_err(|_| VigilError::MissingConfigField(WORKER_ID_ENV.to_string()))?;
        let id = id.parse::<u32>().map_err(|e| {
            VigilError::ConfigError(format!("Invalid {} '{}': {}", WORKER_ID_ENV, id, e))
        })?;

        let heartbeat_interval = match std::env::var(HEARTBEAT_INTERVAL_ENV) {
            Ok(raw) => {
                let ms = raw.parse::<u64>().map_err(|e| {
                    VigilError::ConfigError(format!(
                        "Invalid {} '{}': {}",
                        HEARTBEAT_INTERVAL_ENV, raw, e
                    ))
                })?;
                Duration::from_millis(ms.max(1))
            }
            Err(_) => DEFAULT_HEARTBEAT_INTERVAL,
        };

        Ok(Self::new(WorkerId::new(id), heartbeat_interval))
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Accept a new request, or `None` once the worker is draining
    pub fn begin_request(&self) -> Option<RequestGuard> {
        // Entering before the flag check means a drain either waits for this
        // request or this request sees the drain
        self.metrics.enter();
        let guard = RequestGuard {
            metrics: Arc::clone(&self.metrics),
            idle: Arc::clone(&self.idle),
        };
        if self.is_draining() {
            drop(guard);
            return None;
        }

        self.metrics.count_request();
        Some(guard)
    }

    /// Count a failed request
    pub fn record_error(&self) {
        self.metrics.record_error();
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.metrics.in_flight()
    }

    pub fn metrics(&self) -> &Arc<WorkerMetrics> {
        &self.metrics
    }

    /// Speak the protocol over this process's stdin and stdout
    pub async fn run(&self) -> Result<()> {
        self.run_with(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Speak the protocol over arbitrary streams
    ///
    /// Announces readiness, heartbeats every interval and returns once a drain
    /// was requested (or `input` closed) and no request is in flight.
    pub async fn run_with<R, W>(&self, input: R, mut output: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        send(
            &mut output,
            &WorkerMessage::Ready {
                pid: std::process::id(),
            },
        )
        .await?;
        info!(worker = %self.id, "Worker ready");

        let probe = tokio::spawn(metrics::run_lag_probe(Arc::clone(&self.metrics)));
        let mut sampler = MemorySampler::new();
        let mut ticker = tokio::time::interval(self.heartbeat_interval);
        let mut lines = BufReader::new(input).lines();

        let result = async {
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.heartbeat(&mut output, &mut sampler).await?;
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => match decode_supervisor_message(&line) {
                            Ok(SupervisorMessage::Drain) => {
                                info!(worker = %self.id, "Drain requested");
                                break;
                            }
                            Err(e) => warn!(worker = %self.id, "{}", e),
                        },
                        Ok(None) => {
                            info!(worker = %self.id, "Supervisor closed the channel; draining");
                            break;
                        }
                        Err(e) => {
                            warn!(worker = %self.id, "Failed to read supervisor command: {}; draining", e);
                            break;
                        }
                    }
                }
            }

            self.draining.store(true, Ordering::SeqCst);
            send(
                &mut output,
                &WorkerMessage::Draining {
                    in_flight: self.in_flight(),
                },
            )
            .await?;

            // Keep heartbeating until the last request finishes
            while self.in_flight() > 0 {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.heartbeat(&mut output, &mut sampler).await?;
                    }
                    _ = self.idle.notified() => {}
                }
            }

            debug!(worker = %self.id, "Drain complete");
            Ok::<(), VigilError>(())
        }
        .await;

        probe.abort();
        result
    }

    async fn heartbeat<W>(&self, output: &mut W, sampler: &mut MemorySampler) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let snapshot = self.metrics.snapshot(sampler.sample_mb());
        send(output, &WorkerMessage::Heartbeat(snapshot)).await
    }
}

async fn send<W>(output: &mut W, message: &WorkerMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = encode_line(message)?;
    output.write_all(line.as_bytes()).await?;
    output.flush().await?;
    Ok(())
}

/// Tell the supervisor this worker is about to die
///
/// Writes synchronously so it also works from a panic hook.
pub fn report_crash(message: &str) {
    let line = match encode_line(&WorkerMessage::CrashReport {
        message: message.to_string(),
    }) {
        Ok(line) => line,
        Err(_) => return,
    };

    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    let _ = handle.write_all(line.as_bytes());
    let _ = handle.flush();
}

/// Report panics as crash reports before the default hook runs
pub fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        report_crash(&info.to_string());
        previous(info);
    }));
}
