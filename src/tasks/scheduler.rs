//! Periodic trigger for the due sweep.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Sender};
use tracing::{debug, info};

use crate::tasks::runner::{Task, TaskQueue};

/// Ticker thread that submits `mark_due_todos` to the queue on a fixed
/// interval, standing in for an external periodic trigger.
pub struct Scheduler {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    pub fn start(queue: TaskQueue, interval: Duration) -> Self {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("due-sweep-scheduler".to_string())
            .spawn(move || {
                info!(interval_secs = interval.as_secs(), "due sweep scheduler started");
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(ticker) -> _ => {
                            debug!("submitting due sweep");
                            queue.submit(Task::MarkDueTodos);
                        }
                        recv(stop_rx) -> _ => {
                            info!("due sweep scheduler stopped");
                            break;
                        }
                    }
                }
            })
            .expect("failed to spawn scheduler thread");
        Self { stop_tx, handle }
    }

    pub fn stop(self) {
        let _ = self.stop_tx.send(());
        let _ = self.handle.join();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use crate::repository::database::test_support::test_db;
    use crate::tasks::runner::{Executor, RetryPolicy, TaskRunner};
    use std::sync::Arc;

    #[test]
    fn ticks_submit_the_sweep_until_stopped() {
        let (db, _dir) = test_db();
        let metrics = Arc::new(Metrics::new().expect("metrics"));
        let executor = Arc::new(Executor::new(
            db,
            metrics.clone(),
            RetryPolicy::default(),
            chrono::Duration::minutes(15),
        ));
        let runner = TaskRunner::start(executor, 1);

        let scheduler = Scheduler::start(runner.queue(), Duration::from_millis(10));
        thread::sleep(Duration::from_millis(120));
        scheduler.stop();
        runner.shutdown();

        let swept = metrics
            .tasks_started
            .with_label_values(&["mark_due_todos"])
            .get();
        assert!(swept >= 1, "expected at least one sweep, saw {swept}");
    }
}
