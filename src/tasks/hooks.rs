//! Task lifecycle instrumentation.
//!
//! The runner drives an explicit, ordered list of hooks around every
//! attempt; the per-attempt [`TaskContext`] carries the correlation state
//! (including the start instant), so nothing leaks across invocations.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::metrics::Metrics;
use crate::tasks::runner::{TaskError, TaskOutput};

/// Correlation object for a single task attempt.
pub struct TaskContext {
    pub invocation_id: Uuid,
    pub task_name: &'static str,
    pub attempt: u32,
    pub started_at: Option<Instant>,
}

impl TaskContext {
    pub fn new(task_name: &'static str, attempt: u32) -> Self {
        Self {
            invocation_id: Uuid::new_v4(),
            task_name,
            attempt,
            started_at: None,
        }
    }
}

/// Observer invoked deterministically around every task attempt.
///
/// `on_complete` fires on any non-error return, including logical failure
/// payloads; `on_failure` fires only when an attempt ends in a terminal
/// error.
pub trait TaskHook: Send + Sync {
    fn on_start(&self, _cx: &mut TaskContext) {}
    fn on_complete(&self, _cx: &mut TaskContext, _output: &TaskOutput) {}
    fn on_failure(&self, _cx: &mut TaskContext, _error: &TaskError) {}
}

/// Records the started/succeeded/failed counters and the runtime histogram,
/// all keyed by task name.
pub struct MetricsHook {
    metrics: Arc<Metrics>,
}

impl MetricsHook {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

impl TaskHook for MetricsHook {
    fn on_start(&self, cx: &mut TaskContext) {
        self.metrics
            .tasks_started
            .with_label_values(&[cx.task_name])
            .inc();
        cx.started_at = Some(Instant::now());
    }

    fn on_complete(&self, cx: &mut TaskContext, _output: &TaskOutput) {
        if let Some(started) = cx.started_at.take() {
            self.metrics
                .task_runtime_seconds
                .with_label_values(&[cx.task_name])
                .observe(started.elapsed().as_secs_f64());
        }
        self.metrics
            .tasks_succeeded
            .with_label_values(&[cx.task_name])
            .inc();
    }

    fn on_failure(&self, cx: &mut TaskContext, _error: &TaskError) {
        self.metrics
            .tasks_failed
            .with_label_values(&[cx.task_name])
            .inc();
    }
}

pub struct LoggingHook;

impl TaskHook for LoggingHook {
    fn on_start(&self, cx: &mut TaskContext) {
        debug!(
            task = cx.task_name,
            invocation = %cx.invocation_id,
            attempt = cx.attempt,
            "task started"
        );
    }

    fn on_complete(&self, cx: &mut TaskContext, output: &TaskOutput) {
        info!(
            task = cx.task_name,
            invocation = %cx.invocation_id,
            result = %output.to_json(),
            "task completed"
        );
    }

    fn on_failure(&self, cx: &mut TaskContext, error: &TaskError) {
        warn!(
            task = cx.task_name,
            invocation = %cx.invocation_id,
            attempt = cx.attempt,
            error = %error,
            "task failed"
        );
    }
}
