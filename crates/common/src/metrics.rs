//! In-process pipeline counters.
//!
//! One [`Metrics`] instance is built in `main` and shared by `Arc` with the
//! workers and the scheduler loops. The janitor logs a [`MetricsSnapshot`]
//! on every tick.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Pipeline counters.
#[derive(Debug, Default)]
pub struct Metrics {
    /// Tasks claimed from the task queue.
    pub tasks_claimed: AtomicU64,
    /// Tasks marked COMPLETED.
    pub tasks_completed: AtomicU64,
    /// Tasks moved to the dead-letter state.
    pub tasks_dead_lettered: AtomicU64,
    /// Successful parser calls.
    pub parses_succeeded: AtomicU64,
    /// Failed parser calls, retried or not.
    pub parses_failed: AtomicU64,
    /// Successful pushes.
    pub pushes_succeeded: AtomicU64,
    /// Failed pushes, retried or not.
    pub pushes_failed: AtomicU64,
    /// Pushes skipped because the content was already delivered.
    pub pushes_deduplicated: AtomicU64,
}

/// Point-in-time copy of [`Metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub tasks_claimed: u64,
    pub tasks_completed: u64,
    pub tasks_dead_lettered: u64,
    pub parses_succeeded: u64,
    pub parses_failed: u64,
    pub pushes_succeeded: u64,
    pub pushes_failed: u64,
    pub pushes_deduplicated: u64,
}

impl Metrics {
    /// Create a new metrics instance with all counters at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tasks_claimed: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            tasks_dead_lettered: AtomicU64::new(0),
            parses_succeeded: AtomicU64::new(0),
            parses_failed: AtomicU64::new(0),
            pushes_succeeded: AtomicU64::new(0),
            pushes_failed: AtomicU64::new(0),
            pushes_deduplicated: AtomicU64::new(0),
        }
    }

    /// Record a task claim.
    pub fn record_task_claimed(&self) {
        self.tasks_claimed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task reaching a terminal state.
    pub fn record_task_finished(&self, dead_lettered: bool) {
        if dead_lettered {
            self.tasks_dead_lettered.fetch_add(1, Ordering::Relaxed);
        } else {
            self.tasks_completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a parser outcome.
    pub fn record_parse(&self, success: bool) {
        if success {
            self.parses_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.parses_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a push outcome.
    pub fn record_push(&self, success: bool) {
        if success {
            self.pushes_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.pushes_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a push skipped as a duplicate.
    pub fn record_push_deduplicated(&self) {
        self.pushes_deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_claimed: self.tasks_claimed.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_dead_lettered: self.tasks_dead_lettered.load(Ordering::Relaxed),
            parses_succeeded: self.parses_succeeded.load(Ordering::Relaxed),
            parses_failed: self.parses_failed.load(Ordering::Relaxed),
            pushes_succeeded: self.pushes_succeeded.load(Ordering::Relaxed),
            pushes_failed: self.pushes_failed.load(Ordering::Relaxed),
            pushes_deduplicated: self.pushes_deduplicated.load(Ordering::Relaxed),
        }
    }
}
