use crate::error::{Result, VigilError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Upper bound on the size of the worker pool
pub const MAX_WORKER_COUNT: usize = 256;

/// Upper bound on every `*_ms` timing (one week)
pub const MAX_TIMING_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Upper bound on `maintenance_duration_minutes` (one week)
pub const MAX_MAINTENANCE_DURATION_MINUTES: u64 = 7 * 24 * 60;

/// Command used to launch one worker process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Path to the worker executable
    #[serde(default = "default_worker_script")]
    pub script: PathBuf,

    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the worker
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Extra environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            script: default_worker_script(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
        }
    }
}

/// Supervisor configuration with every tunable of the worker pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Number of worker processes kept alive
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Reported memory above which a worker is unhealthy
    #[serde(default = "default_memory_threshold_mb")]
    pub memory_threshold_mb: u64,

    /// How often workers report a heartbeat
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Silence after which a check cycle counts a missed heartbeat
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    /// Period of the watchdog health-check cycle
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,

    /// Exits of one slot tolerated within the restart window
    #[serde(default = "default_restart_threshold")]
    pub restart_threshold: usize,

    /// Sliding window for crash-loop detection
    #[serde(default = "default_restart_window_ms")]
    pub restart_window_ms: u64,

    /// Overall budget for draining the pool at shutdown
    #[serde(default = "default_graceful_shutdown_timeout_ms")]
    pub graceful_shutdown_timeout_ms: u64,

    /// Time a draining worker gets before it is force-killed
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Pause between workers during a rolling restart
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Duration of maintenance mode enabled by the watchdog
    #[serde(default = "default_maintenance_duration_minutes")]
    pub maintenance_duration_minutes: u64,

    /// Where the maintenance state is persisted
    #[serde(default = "default_maintenance_state_path")]
    pub maintenance_state_path: PathBuf,

    /// Where the status snapshot is written after each cycle
    #[serde(default = "default_status_file")]
    pub status_file: PathBuf,

    /// PID file of the running supervisor
    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    /// Worker command
    #[serde(default)]
    pub worker: WorkerConfig,
}

// Default value functions for serde
fn default_worker_script() -> PathBuf {
    PathBuf::from("vigil-worker")
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(MAX_WORKER_COUNT)
}

fn default_memory_threshold_mb() -> u64 {
    512
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    15_000
}

fn default_check_interval_ms() -> u64 {
    2_000
}

fn default_restart_threshold() -> usize {
    5
}

fn default_restart_window_ms() -> u64 {
    60_000
}

fn default_graceful_shutdown_timeout_ms() -> u64 {
    30_000
}

fn default_drain_timeout_ms() -> u64 {
    10_000
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_maintenance_duration_minutes() -> u64 {
    30
}

fn default_maintenance_state_path() -> PathBuf {
    PathBuf::from("/tmp/vigil_maintenance.json")
}

fn default_status_file() -> PathBuf {
    PathBuf::from("/tmp/vigil_status.json")
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("/tmp/vigil.pid")
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            memory_threshold_mb: default_memory_threshold_mb(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            check_interval_ms: default_check_interval_ms(),
            restart_threshold: default_restart_threshold(),
            restart_window_ms: default_restart_window_ms(),
            graceful_shutdown_timeout_ms: default_graceful_shutdown_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            maintenance_duration_minutes: default_maintenance_duration_minutes(),
            maintenance_state_path: default_maintenance_state_path(),
            status_file: default_status_file(),
            pid_file: default_pid_file(),
            worker: WorkerConfig::default(),
        }
    }
}

impl SupervisorConfig {
    /// Load the configuration from a file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<SupervisorConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| VigilError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let mut config = match extension {
            "toml" => Self::parse_toml(&contents)?,
            "json" => Self::parse_json(&contents)?,
            _ => {
                return Err(VigilError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        config.expand_env_vars();
        config.validate()?;

        Ok(config)
    }

    fn parse_toml(contents: &str) -> Result<SupervisorConfig> {
        toml::from_str(contents)
            .map_err(|e| VigilError::InvalidConfig(format!("Failed to parse TOML: {}", e)))
    }

    fn parse_json(contents: &str) -> Result<SupervisorConfig> {
        serde_json::from_str(contents)
            .map_err(|e| VigilError::InvalidConfig(format!("Failed to parse JSON: {}", e)))
    }

    /// Apply `VIGIL_*` environment overrides on top of the loaded values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = env_override("VIGIL_WORKER_COUNT")? {
            self.worker_count = v;
        }
        if let Some(v) = env_override("VIGIL_MEMORY_THRESHOLD_MB")? {
            self.memory_threshold_mb = v;
        }
        if let Some(v) = env_override("VIGIL_HEARTBEAT_INTERVAL_MS")? {
            self.heartbeat_interval_ms = v;
        }
        if let Some(v) = env_override("VIGIL_HEARTBEAT_TIMEOUT_MS")? {
            self.heartbeat_timeout_ms = v;
        }
        if let Some(v) = env_override("VIGIL_CHECK_INTERVAL_MS")? {
            self.check_interval_ms = v;
        }
        if let Some(v) = env_override("VIGIL_RESTART_THRESHOLD")? {
            self.restart_threshold = v;
        }
        if let Some(v) = env_override("VIGIL_RESTART_WINDOW_MS")? {
            self.restart_window_ms = v;
        }
        if let Some(v) = env_override("VIGIL_GRACEFUL_SHUTDOWN_TIMEOUT_MS")? {
            self.graceful_shutdown_timeout_ms = v;
        }
        if let Some(v) = env_override("VIGIL_DRAIN_TIMEOUT_MS")? {
            self.drain_timeout_ms = v;
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(VigilError::ConfigValidationError(
                "worker_count must be at least 1".to_string(),
            ));
        }

        if self.worker_count > MAX_WORKER_COUNT {
            return Err(VigilError::ConfigValidationError(format!(
                "worker_count cannot exceed {}",
                MAX_WORKER_COUNT
            )));
        }

        if self.restart_threshold == 0 {
            return Err(VigilError::ConfigValidationError(
                "restart_threshold must be at least 1".to_string(),
            ));
        }

        let timings = [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("heartbeat_timeout_ms", self.heartbeat_timeout_ms),
            ("check_interval_ms", self.check_interval_ms),
            ("restart_window_ms", self.restart_window_ms),
            ("graceful_shutdown_timeout_ms", self.graceful_shutdown_timeout_ms),
            ("drain_timeout_ms", self.drain_timeout_ms),
        ];
        for (name, value) in timings {
            if value == 0 {
                return Err(VigilError::ConfigValidationError(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        let bounded = timings
            .into_iter()
            .chain([("settle_delay_ms", self.settle_delay_ms)]);
        for (name, value) in bounded {
            if value > MAX_TIMING_MS {
                return Err(VigilError::ConfigValidationError(format!(
                    "{} cannot exceed {}",
                    name, MAX_TIMING_MS
                )));
            }
        }

        if self.maintenance_duration_minutes > MAX_MAINTENANCE_DURATION_MINUTES {
            return Err(VigilError::ConfigValidationError(format!(
                "maintenance_duration_minutes cannot exceed {}",
                MAX_MAINTENANCE_DURATION_MINUTES
            )));
        }

        if self.heartbeat_timeout_ms <= self.heartbeat_interval_ms {
            return Err(VigilError::ConfigValidationError(format!(
                "heartbeat_timeout_ms ({}) must exceed heartbeat_interval_ms ({})",
                self.heartbeat_timeout_ms, self.heartbeat_interval_ms
            )));
        }

        if self.worker.script.as_os_str().is_empty() {
            return Err(VigilError::MissingConfigField("worker.script".to_string()));
        }

        if let Some(ref cwd) = self.worker.cwd {
            if !cwd.exists() {
                return Err(VigilError::ConfigValidationError(format!(
                    "Working directory does not exist: {}",
                    cwd.display()
                )));
            }
            if !cwd.is_dir() {
                return Err(VigilError::ConfigValidationError(format!(
                    "Working directory is not a directory: {}",
                    cwd.display()
                )));
            }
        }

        Ok(())
    }

    /// Expand environment variables in the worker command
    fn expand_env_vars(&mut self) {
        let worker = &mut self.worker;
        worker.script = expand_env_in_path(&worker.script);

        if let Some(ref cwd) = worker.cwd {
            worker.cwd = Some(expand_env_in_path(cwd));
        }

        worker.args = worker
            .args
            .iter()
            .map(|arg| expand_env_in_string(arg))
            .collect();

        worker.env = worker
            .env
            .iter()
            .map(|(k, v)| (k.clone(), expand_env_in_string(v)))
            .collect();
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    pub fn restart_window(&self) -> Duration {
        Duration::from_millis(self.restart_window_ms)
    }

    pub fn graceful_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.graceful_shutdown_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Read and parse one environment override, if present
fn env_override<T: FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            VigilError::ConfigError(format!("Invalid value for {}: '{}'", key, raw))
        }),
        Err(_) => Ok(None),
    }
}

/// Expand `$VAR` and `${VAR}` references from the current environment
fn expand_env_in_string(s: &str) -> String {
    let mut result = s.to_string();

    for (key, value) in std::env::vars() {
        result = result.replace(&format!("${{{}}}", key), &value);
        result = result.replace(&format!("${}", key), &value);
    }

    result
}

fn expand_env_in_path(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();
    PathBuf::from(expand_env_in_string(&path_str))
}
