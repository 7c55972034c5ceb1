// PID file of the running supervisor

use crate::error::{Result, VigilError};
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_PID_FILE: &str = "/tmp/vigil.pid";

pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new() -> Self {
        Self::with_path(DEFAULT_PID_FILE)
    }

    pub fn with_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Claim the file for the current process
    ///
    /// Fails if another live supervisor owns it; a stale file is replaced.
    pub fn acquire(&self) -> Result<()> {
        if let Some(pid) = self.running_pid() {
            return Err(VigilError::StateError(format!(
                "Supervisor is already running (PID: {}, PID file: {})",
                pid,
                self.path.display()
            )));
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    VigilError::StateError(format!("Failed to create PID file directory: {}", e))
                })?;
            }
        }

        fs::write(&self.path, std::process::id().to_string())
            .map_err(|e| VigilError::StateError(format!("Failed to write PID file: {}", e)))
    }

    pub fn read(&self) -> Result<u32> {
        let content = fs::read_to_string(&self.path)
            .map_err(|e| VigilError::StateError(format!("Failed to read PID file: {}", e)))?;

        content
            .trim()
            .parse::<u32>()
            .map_err(|e| VigilError::StateError(format!("Invalid PID in file: {}", e)))
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Remove the file, but only while it still names this process
    pub fn release(&self) -> Result<()> {
        match self.read() {
            Ok(pid) if pid == std::process::id() => fs::remove_file(&self.path)
                .map_err(|e| VigilError::StateError(format!("Failed to remove PID file: {}", e))),
            _ => Ok(()),
        }
    }

    /// Remove the file if the process it names is gone
    pub fn release_stale(&self) -> Result<()> {
        if self.exists() && self.running_pid().is_none() {
            fs::remove_file(&self.path)
                .map_err(|e| VigilError::StateError(format!("Failed to remove PID file: {}", e)))?;
        }
        Ok(())
    }

    /// PID recorded in the file, if that process is still alive
    pub fn running_pid(&self) -> Option<u32> {
        if !self.exists() {
            return None;
        }

        self.read().ok().filter(|pid| is_process_alive(*pid))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for PidFile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // No signal is sent; only existence and permission are checked
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    true
}
