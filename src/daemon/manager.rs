// Control of a running supervisor from another process

use super::pid::PidFile;
use crate::error::{Result, VigilError};
use std::time::{Duration, Instant};

#[cfg(unix)]
use nix::sys::signal::{kill, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How a stop request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The supervisor drained its pool and exited after SIGTERM
    Graceful,
    /// SIGKILL was needed
    Forced,
}

/// Sends control signals to the supervisor named by a PID file
pub struct DaemonManager {
    pid_file: PidFile,
}

impl DaemonManager {
    pub fn new(pid_file: PidFile) -> Self {
        Self { pid_file }
    }

    pub fn is_running(&self) -> bool {
        self.pid_file.running_pid().is_some()
    }

    pub fn pid(&self) -> Result<u32> {
        self.pid_file.running_pid().ok_or_else(|| {
            VigilError::StateError(format!(
                "Supervisor is not running (PID file: {})",
                self.pid_file.path().display()
            ))
        })
    }

    /// Ask the supervisor for a graceful rolling restart (SIGHUP)
    pub fn reload(&self) -> Result<u32> {
        let pid = self.pid()?;
        send(pid, SignalRequest::Reload)?;
        Ok(pid)
    }

    /// Ask the supervisor to print its status table (SIGUSR1)
    pub fn dump_status(&self) -> Result<u32> {
        let pid = self.pid()?;
        send(pid, SignalRequest::DumpStatus)?;
        Ok(pid)
    }

    /// Send SIGTERM and wait for the supervisor to exit, then SIGKILL
    ///
    /// `timeout` should cover the supervisor's own graceful shutdown budget.
    pub fn stop(&self, timeout: Duration) -> Result<StopOutcome> {
        let pid = self.pid()?;
        send(pid, SignalRequest::Terminate)?;

        if self.wait_for_exit(timeout) {
            return Ok(StopOutcome::Graceful);
        }

        send(pid, SignalRequest::Kill)?;
        if self.wait_for_exit(Duration::from_secs(1)) {
            // A killed supervisor cannot clean up after itself
            self.pid_file.release_stale()?;
            return Ok(StopOutcome::Forced);
        }

        Err(VigilError::TimeoutError(format!(
            "Supervisor (PID: {}) did not stop even after SIGKILL",
            pid
        )))
    }

    fn wait_for_exit(&self, timeout: Duration) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if !self.is_running() {
                return true;
            }
            std::thread::sleep(STOP_POLL_INTERVAL);
        }
        !self.is_running()
    }
}

#[derive(Debug, Clone, Copy)]
enum SignalRequest {
    Reload,
    DumpStatus,
    Terminate,
    Kill,
}

#[cfg(unix)]
fn send(pid: u32, request: SignalRequest) -> Result<()> {
    let signal = match request {
        SignalRequest::Reload => Signal::SIGHUP,
        SignalRequest::DumpStatus => Signal::SIGUSR1,
        SignalRequest::Terminate => Signal::SIGTERM,
        SignalRequest::Kill => Signal::SIGKILL,
    };

    kill(Pid::from_raw(pid as i32), signal)
        .map_err(|e| VigilError::SignalError(format!("Failed to send {} to {}: {}", signal, pid, e)))
}

#[cfg(not(unix))]
fn send(_pid: u32, request: SignalRequest) -> Result<()> {
    Err(VigilError::SignalError(format!(
        "{:?} is only supported on Unix systems",
        request
    )))
}
