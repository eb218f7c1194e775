//! Background Scheduling
//!
//! Thin abstraction over periodic task execution. The engine registers its
//! sync, decay, and queue-drain timers through [`Scheduler`], so tests can
//! substitute a manual implementation and drive ticks deterministically.
//!
//! Missed ticks are skipped, not replayed: a slow run is followed by the
//! next scheduled tick, never a burst of catch-up runs.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Boxed future produced by a scheduled task
pub type TaskFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Factory invoked once per tick
pub type TaskFn = Box<dyn Fn() -> TaskFuture + Send + Sync>;

/// Periodic task registration
pub trait Scheduler: Send + Sync {
    /// Run `task` every `period`, starting one period from now
    fn every(&self, name: &str, period: Duration, task: TaskFn) -> TaskHandle;
}

/// Handle to a running periodic task; aborts the task when dropped
pub struct TaskHandle {
    name: String,
    handle: JoinHandle<()>,
}

impl TaskHandle {
    /// Stop the task
    pub fn cancel(&self) {
        tracing::debug!(task = %self.name, "Cancelling periodic task");
        self.handle.abort();
    }

    /// Task name, for logs
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

// ============================================================================
// TOKIO SCHEDULER
// ============================================================================

/// Interval-based scheduler on the current tokio runtime
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn every(&self, name: &str, period: Duration, task: TaskFn) -> TaskHandle {
        let name = name.to_string();
        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick of a tokio interval completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                tracing::trace!(task = %task_name, "Periodic task tick");
                task().await;
            }
        });
        TaskHandle { name, handle }
    }
}

// ============================================================================
// TESTS
// ============================================================================
