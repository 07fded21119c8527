//! Cooperative cancellation token shared between a worker thread and the
//! registry that may need to stop it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

/// Signal raised when a worker honors a pending interrupt at one of its
/// cancellation points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("execution interrupted")]
pub struct Interrupted;

#[derive(Debug, Default)]
struct FlagState {
    pending: AtomicBool,
    tripped: AtomicBool,
}

/// Per-worker interrupt token with check-and-clear delivery.
///
/// Raising the flag is a request, not a guarantee: the owning thread must
/// poll it at its cancellation points (or block on an interruptible call)
/// for the request to take effect. Delivery consumes the pending request,
/// so one raise produces one `Interrupted`, but the token remembers having
/// been raised for status reporting. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<FlagState>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request interruption of the owning worker.
    pub fn raise(&self) {
        self.0.tripped.store(true, Ordering::SeqCst);
        self.0.pending.store(true, Ordering::SeqCst);
    }

    /// Whether an interrupt was ever requested, delivered or not.
    pub fn is_raised(&self) -> bool {
        self.0.tripped.load(Ordering::SeqCst)
    }

    /// Consume a pending interrupt, clearing it for the next check.
    pub fn take(&self) -> bool {
        self.0.pending.swap(false, Ordering::SeqCst)
    }

    /// Error out if an interrupt is pending, consuming it.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.take() { Err(Interrupted) } else { Ok(()) }
    }
}
