// Maintenance module - the system-wide maintenance-mode flag

use crate::config::SupervisorConfig;
use crate::error::{Result, VigilError};
use crate::state::JsonStore;
use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Who switched maintenance mode on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggeredBy {
    Admin,
    System,
    Watchdog,
}

impl fmt::Display for TriggeredBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggeredBy::Admin => write!(f, "admin"),
            TriggeredBy::System => write!(f, "system"),
            TriggeredBy::Watchdog => write!(f, "watchdog"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceState {
    pub enabled: bool,
    pub reason: Option<String>,
    pub triggered_by: Option<TriggeredBy>,
    pub enabled_at: Option<DateTime<Utc>>,
    pub auto_disable_at: Option<DateTime<Utc>>,
}

impl MaintenanceState {
    /// Whether the auto-disable deadline has passed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.auto_disable_at.is_some_and(|at| now >= at)
    }
}

/// A request to switch maintenance mode on
///
/// Only code inside this crate can build a watchdog-triggered request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnableRequest {
    reason: String,
    duration_minutes: Option<u64>,
    triggered_by: TriggeredBy,
}

impl EnableRequest {
    /// Operator request; `None` keeps maintenance on until disabled by hand
    pub fn admin(reason: impl Into<String>, duration_minutes: Option<u64>) -> Self {
        Self {
            reason: reason.into(),
            duration_minutes,
            triggered_by: TriggeredBy::Admin,
        }
    }

    pub fn system(reason: impl Into<String>, duration_minutes: Option<u64>) -> Self {
        Self {
            reason: reason.into(),
            duration_minutes,
            triggered_by: TriggeredBy::System,
        }
    }

    pub(crate) fn watchdog(reason: impl Into<String>, duration_minutes: u64) -> Self {
        Self {
            reason: reason.into(),
            duration_minutes: Some(duration_minutes),
            triggered_by: TriggeredBy::Watchdog,
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn duration_minutes(&self) -> Option<u64> {
        self.duration_minutes
    }

    pub fn triggered_by(&self) -> TriggeredBy {
        self.triggered_by
    }
}

/// Read/write access to maintenance mode
///
/// Implementations own their internal consistency; callers treat `enable` as
/// fire-and-forget.
#[async_trait]
pub trait MaintenanceControl: Send + Sync {
    async fn enable(&self, request: EnableRequest) -> Result<MaintenanceState>;

    async fn disable(&self) -> Result<()>;

    async fn state(&self) -> MaintenanceState;

    /// Disable maintenance if its deadline has passed
    ///
    /// Returns `true` only on the call that actually disabled it.
    async fn check_auto_disable(&self) -> Result<bool>;
}

/// Maintenance state kept in memory and optionally mirrored to a JSON file
pub struct MaintenanceStore {
    state: Mutex<MaintenanceState>,
    file: Option<JsonStore<MaintenanceState>>,
}

impl MaintenanceStore {
    pub fn in_memory() -> Self {
        Self {
            state: Mutex::new(MaintenanceState::default()),
            file: None,
        }
    }

    /// Open a file-backed store, picking up any previously persisted state
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file: JsonStore<MaintenanceState> = JsonStore::new(path);
        let state = file.load()?.unwrap_or_default();

        if state.enabled {
            info!(
                reason = state.reason.as_deref().unwrap_or(""),
                "Maintenance mode is enabled from persisted state"
            );
        }

        Ok(Self {
            state: Mutex::new(state),
            file: Some(file),
        })
    }

    pub fn from_config(config: &SupervisorConfig) -> Result<Self> {
        Self::open(&config.maintenance_state_path)
    }

    fn persist(&self, state: &MaintenanceState) -> Result<()> {
        match &self.file {
            Some(file) => file.save(state),
            None => Ok(()),
        }
    }
}

fn auto_disable_deadline(now: DateTime<Utc>, minutes: u64) -> Result<DateTime<Utc>> {
    i64::try_from(minutes)
        .ok()
        .and_then(TimeDelta::try_minutes)
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| {
            VigilError::StateError(format!(
                "Maintenance duration of {} minutes is out of range",
                minutes
            ))
        })
}

#[async_trait]
impl MaintenanceControl for MaintenanceStore {
    async fn enable(&self, request: EnableRequest) -> Result<MaintenanceState> {
        let now = Utc::now();
        let auto_disable_at = match request.duration_minutes {
            Some(minutes) => Some(auto_disable_deadline(now, minutes)?),
            None => None,
        };

        let mut state = self.state.lock().await;
        // A watchdog request never overrides maintenance that is already on
        if state.enabled && request.triggered_by == TriggeredBy::Watchdog {
            debug!("Maintenance mode already enabled; watchdog request ignored");
            return Ok(state.clone());
        }

        let next = MaintenanceState {
            enabled: true,
            reason: Some(request.reason),
            triggered_by: Some(request.triggered_by),
            enabled_at: Some(now),
            auto_disable_at,
        };

        self.persist(&next)?;
        *state = next.clone();

        match request.triggered_by {
            TriggeredBy::Watchdog => warn!(
                reason = next.reason.as_deref().unwrap_or(""),
                "Maintenance mode enabled by watchdog"
            ),
            by => info!(
                triggered_by = %by,
                reason = next.reason.as_deref().unwrap_or(""),
                "Maintenance mode enabled"
            ),
        }

        Ok(next)
    }

    async fn disable(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.enabled {
            return Ok(());
        }

        let next = MaintenanceState::default();
        self.persist(&next)?;
        *state = next;

        info!("Maintenance mode disabled");
        Ok(())
    }

    async fn state(&self) -> MaintenanceState {
        self.state.lock().await.clone()
    }

    async fn check_auto_disable(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        if !state.is_expired(Utc::now()) {
            return Ok(false);
        }

        let next = MaintenanceState::default();
        self.persist(&next)?;
        *state = next;

        info!("Maintenance mode auto-disabled");
        Ok(true)
    }
}
