//! Task queue, worker pool and executor.
//!
//! Units of work are submitted fire-and-forget onto an unbounded channel and
//! drained by a pool of worker threads. The executor drives each task through
//! the hook chain, retrying retryable tasks with exponential backoff inside
//! the invocation.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::metrics::Metrics;
use crate::repository::database::{Database, StoreError};
use crate::tasks::hooks::{LoggingHook, MetricsHook, TaskContext, TaskHook};
use crate::tasks::reminders;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    CreateTodoReminder { todo_uid: String },
    MarkDueTodos,
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::CreateTodoReminder { .. } => "create_todo_reminder",
            Task::MarkDueTodos => "mark_due_todos",
        }
    }

    /// Only the per-todo reminder task is safe to re-run on transient
    /// failure; the sweep simply waits for its next scheduled firing.
    fn retryable(&self) -> bool {
        matches!(self, Task::CreateTodoReminder { .. })
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("store: {0}")]
    Store(#[from] StoreError),
}

/// Structured result of a completed task body. `TodoMissing` is a logical
/// failure: the task still completed normally, it just had nothing to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutput {
    ReminderCreated {
        reminder_uid: String,
    },
    TodoMissing {
        todo_uid: String,
    },
    DueSweep {
        new_reminders_count: usize,
        reminder_uids: Vec<String>,
    },
}

impl TaskOutput {
    pub fn to_json(&self) -> Value {
        match self {
            TaskOutput::ReminderCreated { reminder_uid } => {
                json!({"status": "success", "reminder_id": reminder_uid})
            }
            TaskOutput::TodoMissing { .. } => {
                json!({"status": "failed", "reason": "Todo not found"})
            }
            TaskOutput::DueSweep {
                new_reminders_count,
                reminder_uids,
            } => json!({
                "status": "success",
                "new_reminders_count": new_reminders_count,
                "reminder_ids": reminder_uids,
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff before re-running `attempt` (1-based): base, 2x, 4x, ...
    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Runs task bodies against the store with metrics and lifecycle hooks.
pub struct Executor {
    db: Database,
    metrics: Arc<Metrics>,
    hooks: Vec<Box<dyn TaskHook>>,
    retry: RetryPolicy,
    due_window: chrono::Duration,
}

impl Executor {
    pub fn new(
        db: Database,
        metrics: Arc<Metrics>,
        retry: RetryPolicy,
        due_window: chrono::Duration,
    ) -> Self {
        let hooks: Vec<Box<dyn TaskHook>> = vec![
            Box::new(MetricsHook::new(metrics.clone())),
            Box::new(LoggingHook),
        ];
        Self {
            db,
            metrics,
            hooks,
            retry,
            due_window,
        }
    }

    /// Run one task to its terminal outcome. Every attempt passes through
    /// `on_start`; completion and failure hooks fire once, on the attempt
    /// that settles the invocation.
    pub fn execute(&self, task: &Task) -> Result<TaskOutput, TaskError> {
        let max_attempts = if task.retryable() {
            self.retry.max_retries + 1
        } else {
            1
        };
        let mut attempt = 1;
        loop {
            let mut cx = TaskContext::new(task.name(), attempt);
            for hook in &self.hooks {
                hook.on_start(&mut cx);
            }
            match self.run_once(task) {
                Ok(output) => {
                    for hook in &self.hooks {
                        hook.on_complete(&mut cx, &output);
                    }
                    return Ok(output);
                }
                Err(err) if attempt < max_attempts => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        task = task.name(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "task attempt failed, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => {
                    for hook in &self.hooks {
                        hook.on_failure(&mut cx, &err);
                    }
                    return Err(err);
                }
            }
        }
    }

    fn run_once(&self, task: &Task) -> Result<TaskOutput, TaskError> {
        match task {
            Task::CreateTodoReminder { todo_uid } => {
                reminders::create_todo_reminder(&self.db, &self.metrics, todo_uid)
            }
            Task::MarkDueTodos => {
                let now = chrono::Utc::now().naive_utc();
                reminders::mark_due_todos(&self.db, &self.metrics, now, self.due_window)
            }
        }
    }
}

/// Cheap handle for submitting work; held by the API layer and the
/// scheduler. Enqueue failures are logged, never surfaced to the caller.
#[derive(Clone)]
pub struct TaskQueue {
    tx: Sender<Task>,
}

impl TaskQueue {
    pub fn submit(&self, task: Task) {
        let name = task.name();
        if self.tx.send(task).is_err() {
            warn!(task = name, "task queue closed, dropping task");
        }
    }
}

pub struct TaskRunner {
    queue: TaskQueue,
    workers: Vec<JoinHandle<()>>,
}

impl TaskRunner {
    pub fn start(executor: Arc<Executor>, workers: usize) -> Self {
        let (tx, rx) = unbounded::<Task>();
        let workers = (0..workers.max(1))
            .map(|i| {
                let rx = rx.clone();
                let executor = executor.clone();
                thread::Builder::new()
                    .name(format!("task-worker-{i}"))
                    .spawn(move || worker_loop(rx, executor))
                    .expect("failed to spawn task worker")
            })
            .collect();
        info!("task workers started");
        Self {
            queue: TaskQueue { tx },
            workers,
        }
    }

    pub fn queue(&self) -> TaskQueue {
        self.queue.clone()
    }

    /// Close the queue and wait for the workers to drain it. Outstanding
    /// clones of the queue handle keep the channel open until dropped.
    pub fn shutdown(self) {
        drop(self.queue);
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

fn worker_loop(rx: Receiver<Task>, executor: Arc<Executor>) {
    while let Ok(task) = rx.recv() {
        if let Err(err) = executor.execute(&task) {
            error!(task = task.name(), error = %err, "task ended in terminal failure");
        }
    }
}
