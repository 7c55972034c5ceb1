use crate::process::WorkerId;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Reentrancy guard and work queue of the rolling restart
///
/// At most one session is in progress at a time.
#[derive(Debug, Default)]
pub struct RollingRestartSession {
    in_progress: AtomicBool,
    pending: Mutex<VecDeque<WorkerId>>,
}

impl RollingRestartSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the session for `workers`, or `None` if one is already running
    pub fn try_begin(&self, workers: Vec<WorkerId>) -> Option<SessionGuard<'_>> {
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return None;
        }

        *self.lock_pending() = workers.into();
        Some(SessionGuard { session: self })
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Workers the running session has not reached yet
    pub fn pending(&self) -> Vec<WorkerId> {
        self.lock_pending().iter().copied().collect()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, VecDeque<WorkerId>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Proof of owning the session; dropping it releases the session
#[derive(Debug)]
pub struct SessionGuard<'a> {
    session: &'a RollingRestartSession,
}

impl SessionGuard<'_> {
    /// Take the next worker to restart
    pub fn next_worker(&self) -> Option<WorkerId> {
        self.session.lock_pending().pop_front()
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.session.lock_pending().clear();
        self.session.in_progress.store(false, Ordering::Release);
    }
}
