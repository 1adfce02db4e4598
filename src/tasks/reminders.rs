//! The two reminder task bodies.

use chrono::{Duration, NaiveDateTime};
use tracing::{info, warn};

use crate::metrics::Metrics;
use crate::repository::database::Database;
use crate::tasks::runner::{TaskError, TaskOutput};

/// Create a reminder row for a freshly persisted todo.
///
/// A missing todo is an expected race (it may have been deleted before the
/// queue drained) and yields a logical failure, never a retry.
pub fn create_todo_reminder(
    db: &Database,
    metrics: &Metrics,
    todo_uid: &str,
) -> Result<TaskOutput, TaskError> {
    let Some(todo) = db.find_todo(todo_uid)? else {
        warn!(todo_uid, "todo not found, skipping reminder");
        return Ok(TaskOutput::TodoMissing {
            todo_uid: todo_uid.to_string(),
        });
    };
    let message = format!("Background reminder: Todo '{}' created", todo.todo_title);
    let reminder = db.insert_reminder(&todo.uid, &message)?;
    metrics.reminders_created.inc();
    info!(todo_uid, reminder_uid = %reminder.uid, "reminder created");
    Ok(TaskOutput::ReminderCreated {
        reminder_uid: reminder.uid,
    })
}

/// Sweep timing entries due inside [now, now + window) and create a reminder
/// for each one that does not already have a reminder with the same message
/// text. Dedup is by the literal (todo, message) pair: editing a start time
/// after a reminder exists produces a second reminder for the new text.
pub fn mark_due_todos(
    db: &Database,
    metrics: &Metrics,
    now: NaiveDateTime,
    window: Duration,
) -> Result<TaskOutput, TaskError> {
    let window_start = now;
    let window_end = now + window;

    let upcoming = db.due_timings(window_start, window_end)?;
    metrics.due_todos_checked.inc_by(upcoming.len() as u64);
    info!(
        count = upcoming.len(),
        %window_start,
        %window_end,
        "checking upcoming timing entries"
    );

    let mut created = Vec::new();
    for (timing, todo) in upcoming {
        let Some(start_time) = timing.start_time else {
            continue;
        };
        let message = format!("Your task '{}' is due at {}", todo.todo_title, start_time);
        let (reminder, inserted) = db.get_or_create_reminder(&todo.uid, &message)?;
        if inserted {
            metrics.new_due_reminders.inc();
            created.push(reminder.uid);
        }
    }

    info!(new_reminders = created.len(), "due sweep finished");
    Ok(TaskOutput::DueSweep {
        new_reminders_count: created.len(),
        reminder_uids: created,
    })
}
