//! Single source of truth for the public execution status.
//!
//! The script status is derived, never stored: `Paused` while the pause flag
//! is set, else `Running` while the script lock is held or a synchronous
//! command is in flight, else `Idle`. Every mutator computes the combined
//! status before and after its change under one write lock, then notifies
//! observers only on a real transition, with no lock held.

use std::sync::{Arc, RwLock};

use bcs_core::{ObserverList, ScanStatus, ScriptStatus, ServerEvent, ServerStatus};

#[derive(Default)]
struct StatusState {
    script_lock: bool,
    sync_commands: u32,
    paused: bool,
    scan: ScanStatus,
}

impl StatusState {
    fn derived(&self) -> ServerStatus {
        let script = if self.paused {
            ScriptStatus::Paused
        } else if self.script_lock || self.sync_commands > 0 {
            ScriptStatus::Running
        } else {
            ScriptStatus::Idle
        };
        ServerStatus::new(script, self.scan)
    }
}

pub struct StatusTracker {
    state: RwLock<StatusState>,
    observers: Arc<ObserverList>,
}

impl StatusTracker {
    pub fn new(observers: Arc<ObserverList>) -> Self {
        Self {
            state: RwLock::new(StatusState::default()),
            observers,
        }
    }

    /// Claims the script lock. Exactly one script runs at a time; a refusal
    /// has no side effects.
    pub fn try_acquire_script_lock(&self) -> bool {
        self.transition(|state| {
            if state.script_lock {
                false
            } else {
                state.script_lock = true;
                true
            }
        })
    }

    pub fn release_script_lock(&self) {
        self.transition(|state| state.script_lock = false);
    }

    pub fn begin_synchronous_command(&self) {
        self.transition(|state| state.sync_commands += 1);
    }

    pub fn end_synchronous_command(&self) {
        self.transition(|state| {
            if state.sync_commands == 0 {
                tracing::warn!("synchronous command counter already at zero");
            } else {
                state.sync_commands -= 1;
            }
        });
    }

    /// `Paused` sets the pause flag, `Running` clears it. `Idle` is ignored:
    /// idleness follows from the lock and counter, it cannot be requested.
    pub fn set_script_status(&self, status: ScriptStatus) {
        self.transition(|state| match status {
            ScriptStatus::Paused => state.paused = true,
            ScriptStatus::Running => state.paused = false,
            ScriptStatus::Idle => {
                tracing::debug!("request to set script status to idle ignored");
            }
        });
    }

    pub fn update_scan_status(&self, status: ScanStatus) {
        self.transition(|state| state.scan = status);
    }

    pub fn script_status(&self) -> ScriptStatus {
        self.state.read().unwrap().derived().script
    }

    pub fn scan_status(&self) -> ScanStatus {
        self.state.read().unwrap().scan
    }

    /// Pause-protocol fast path; reads the raw flag, not the derived status.
    pub fn is_paused(&self) -> bool {
        self.state.read().unwrap().paused
    }

    pub fn snapshot(&self) -> ServerStatus {
        self.state.read().unwrap().derived()
    }

    /// Runs `mutate` under the write lock, then notifies observers after
    /// releasing it if the combined status actually changed. Observers are
    /// free to call back into the tracker.
    fn transition<R>(&self, mutate: impl FnOnce(&mut StatusState) -> R) -> R {
        let (result, changed) = {
            let mut state = self.state.write().unwrap();
            let before = state.derived();
            let result = mutate(&mut state);
            let after = state.derived();
            (result, (before != after).then_some(after))
        };
        if let Some(status) = changed {
            tracing::debug!(script = ?status.script, scan = ?status.scan, "status changed");
            self.observers.notify(&ServerEvent::Status(status));
        }
        result
    }
}

/// Brackets a synchronous command so the counter is decremented on every
/// exit path, panics included.
pub(crate) struct SyncCommandGuard<'a> {
    tracker: &'a StatusTracker,
}

impl<'a> SyncCommandGuard<'a> {
    pub fn new(tracker: &'a StatusTracker) -> Self {
        tracker.begin_synchronous_command();
        Self { tracker }
    }
}

impl Drop for SyncCommandGuard<'_> {
    fn drop(&mut self) {
        self.tracker.end_synchronous_command();
    }
}
