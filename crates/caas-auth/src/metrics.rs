//! Dependency-injected metrics.
//!
//! Each service instance constructs its own collectors and passes them to
//! the components that report into them, so tests can assert against an
//! isolated instance instead of process-wide state.

use std::sync::atomic::{AtomicI64, Ordering};

/// Session gauge shared between the session store (increments on create,
/// decrements on explicit deletion) and the background cleanup, which
/// alone accounts for expired sessions.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    active_sessions: AtomicI64,
}

impl SessionMetrics {
    /// Creates a zeroed gauge.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a created session.
    pub fn increment_active(&self) {
        self.active_sessions.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a deleted session. The gauge never goes below zero.
    pub fn decrement_active(&self) {
        let _ = self
            .active_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                (current > 0).then_some(current - 1)
            });
    }

    /// Current number of live sessions.
    #[must_use]
    pub fn active_sessions(&self) -> i64 {
        self.active_sessions.load(Ordering::Relaxed)
    }
}
