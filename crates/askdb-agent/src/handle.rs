//! A cloneable handle for poking the agent from external code.

use parking_lot::Mutex;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio_util::sync::CancellationToken;

/// A cloneable handle for poking the agent from external code.
///
/// All fields are `Arc`-wrapped, so cloning is cheap. Cancellation is
/// observed at step boundaries and while waiting on the model; a tool that
/// is already running is allowed to finish.
#[derive(Clone)]
pub struct AgentHandle {
    pub(crate) cancel: Arc<Mutex<CancellationToken>>,
    pub(crate) is_running: Arc<AtomicBool>,
}

impl AgentHandle {
    pub(crate) fn new() -> Self {
        Self {
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            is_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Abort the current run.
    pub fn abort(&self) {
        self.cancel.lock().cancel();
    }

    /// Fresh token for a new run
    pub(crate) fn reset(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();
        token
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.is_running.store(running, Ordering::Release);
    }

    /// Whether a run is in progress.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_replaces_cancelled_token() {
        let handle = AgentHandle::new();
        let first = handle.reset();
        handle.abort();
        assert!(first.is_cancelled());

        let second = handle.reset();
        assert!(!second.is_cancelled());
    }

    #[test]
    fn test_running_flag_shared_by_clones() {
        let handle = AgentHandle::new();
        let other = handle.clone();
        assert!(!other.is_running());

        handle.set_running(true);
        assert!(other.is_running());
        handle.set_running(false);
        assert!(!other.is_running());
    }
}
