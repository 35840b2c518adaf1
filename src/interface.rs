use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Local};
use humantime::format_duration;
use log::{info, warn};
use prettytable::Table;
use rusqlite::Connection;
use std::time::Duration as StdDuration;

use crate::estimator::{ClaudeEstimator, Estimator};
use crate::model::{self, NewTask, TaskStatus};
use crate::notify::Notifier;
use crate::reminder;

/// Minimum reminder lead when the user does not pick one.
const MIN_REMINDER_BUFFER_HOURS: i64 = 4;

/// Width of the description column in the task table.
const DESCRIPTION_WIDTH: usize = 40;

/// Create a task. A missing estimate is filled in by the estimator (or the
/// one hour default without one); a missing due time comes from --in or is
/// derived from the estimate; a missing reminder lead gets the default
/// buffer policy.
pub fn add(
    db: &Connection,
    estimator: Option<&dyn Estimator>,
    description: String,
    estimate: Option<StdDuration>,
    due: Option<DateTime<Local>>,
    due_in: Option<StdDuration>,
    remind_before: Option<StdDuration>,
) -> Result<()> {
    let now = Local::now();

    let estimate = match estimate {
        Some(d) => to_chrono(d)?,
        None => match estimator {
            Some(estimator) => estimator.estimate(&description).unwrap_or_else(|e| {
                warn!("Estimation failed ({:#}), defaulting to 1 hour.", e);
                Duration::hours(1)
            }),
            None => {
                warn!("No estimator configured, defaulting to 1 hour.");
                Duration::hours(1)
            }
        },
    };

    let due_at = match due {
        Some(due_at) => Some(due_at),
        None => match due_in {
            Some(d) => Some(now + to_chrono(d)?),
            None => None,
        },
    };

    let reminder_buffer = match remind_before {
        Some(d) => to_chrono(d)?,
        None => default_buffer(estimate),
    };

    let task = model::add_task(
        db,
        NewTask {
            description,
            created_at: now,
            due_at,
            estimated_duration: Some(estimate),
            reminder_buffer: Some(reminder_buffer),
        },
    )?;

    println!(
        "{}. {} ({})",
        task.id,
        task.description,
        format_duration(estimate.to_std()?)
    );
    if let Some(due_at) = task.due_at {
        println!(
            "due {}, reminder {} before",
            due_at.format("%a %b %d %H:%M"),
            format_duration(reminder_buffer.to_std()?)
        );
    }
    Ok(())
}

/// The default reminder lead: at least a few hours, more for big tasks.
fn default_buffer(estimate: Duration) -> Duration {
    std::cmp::max(Duration::hours(MIN_REMINDER_BUFFER_HOURS), estimate * 3 / 2)
}

/// Print the task table, optionally narrowed to one state.
pub fn list(db: &Connection, status: Option<TaskStatus>) -> Result<()> {
    let tasks = match status {
        Some(status) => model::tasks_with_status(db, status)?,
        None => model::tasks(db)?,
    };

    let now = Local::now();
    let mut table = Table::new();
    table.add_row(row!["id", "status", "task", "estimate", "due", "time left"]);

    for task in &tasks {
        let estimate = task
            .estimated_duration
            .and_then(|d| d.to_std().ok())
            .map(|d| format_duration(d).to_string())
            .unwrap_or_else(|| "-".to_string());
        let due = task
            .due_at
            .map(|d| d.format("%a %b %d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        let left = match task.due_at {
            Some(due_at) if task.status == TaskStatus::InProgress => {
                reminder::remaining_phrase(due_at, now)
            }
            _ => "-".to_string(),
        };

        table.add_row(row![
            task.id,
            task.status,
            textwrap::fill(&task.description, DESCRIPTION_WIDTH),
            estimate,
            due,
            left
        ]);
    }

    table.printstd();

    let pending = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::InProgress)
        .count();
    println!("{} task(s), {} in progress.", tasks.len(), pending);
    Ok(())
}

/// Mark a task completed.
pub fn done(db: &Connection, id: u32) -> Result<()> {
    if model::complete_task(db, id)? {
        println!("Task {} completed.", id);
        return Ok(());
    }

    match model::get_task(db, id)? {
        Some(task) => println!("Task {} is already {}.", id, task.status),
        None => println!("No task with id {}.", id),
    }
    Ok(())
}

/// Remove a task.
pub fn remove(db: &Connection, id: u32) -> Result<()> {
    if model::delete_task(db, id)? {
        println!("Task {} removed.", id);
    } else {
        println!("No task with id {}.", id);
    }
    Ok(())
}

/// Change the stored fields of a task.
pub fn edit(
    db: &Connection,
    id: u32,
    description: Option<String>,
    due: Option<DateTime<Local>>,
    estimate: Option<StdDuration>,
    remind_before: Option<StdDuration>,
) -> Result<()> {
    let estimate = match estimate {
        Some(d) => Some(to_chrono(d)?),
        None => None,
    };
    let remind_before = match remind_before {
        Some(d) => Some(to_chrono(d)?),
        None => None,
    };

    let task = model::update_task(db, id, description, due, estimate, remind_before)?;
    println!("{}. {}", task.id, task.description);
    if let Some(due_at) = task.due_at {
        println!("due {}", due_at.format("%a %b %d %H:%M"));
    }
    Ok(())
}

/// Print an estimate for a description without storing a task.
pub fn estimate(estimator: &dyn Estimator, description: &str) -> Result<()> {
    let duration = estimator.estimate(description)?;
    println!(
        "Estimated duration: {}",
        format_duration(duration.to_std()?)
    );
    Ok(())
}

/// Run one reminder pass at the given instant: persist the past due
/// transitions and the reminder flags, then hand the selected reminders to
/// the notifier. A failed delivery clears the flag again so the next pass
/// retries it. Returns the number of reminders delivered.
pub fn remind(
    db: &Connection,
    notifier: &dyn Notifier,
    destination: &str,
    now: DateTime<Local>,
) -> Result<usize> {
    let mut tasks = model::tasks(db)?;
    let evaluation = reminder::evaluate(&mut tasks, now);

    for id in &evaluation.newly_past_due {
        model::set_status(db, *id, TaskStatus::PastDue)?;
        info!("Task {} is now past due.", id);
    }

    let mut delivered = 0;
    for selected in &evaluation.reminders {
        model::set_reminder_sent(db, selected.task_id, true)?;
        match notifier.send(destination, selected) {
            Ok(()) => {
                info!("Reminder sent for task {}.", selected.task_id);
                delivered += 1;
            }
            Err(e) => {
                warn!(
                    "Failed to deliver reminder for task {} ({:#}), will retry on the next pass.",
                    selected.task_id, e
                );
                model::set_reminder_sent(db, selected.task_id, false)?;
            }
        }
    }

    if delivered > 0 {
        info!("Sent {} task reminder(s).", delivered);
    }
    Ok(delivered)
}

/// Keep running reminder passes until interrupted. A failing pass is
/// logged and retried at the next tick rather than killing the loop.
pub fn watch(
    db: &Connection,
    notifier: &dyn Notifier,
    destination: &str,
    every: StdDuration,
) -> Result<()> {
    info!(
        "Watching for due reminders every {}.",
        format_duration(every)
    );
    loop {
        if let Err(e) = remind(db, notifier, destination, Local::now()) {
            warn!("Reminder pass failed: {:#}", e);
        }
        std::thread::sleep(every);
    }
}

/// Print a model written summary of the current task list.
pub fn summary(db: &Connection, claude: &ClaudeEstimator) -> Result<()> {
    let tasks = model::tasks(db)?;
    let text = claude.summarize_day(&tasks)?;
    println!("{}", text);
    Ok(())
}

fn to_chrono(duration: StdDuration) -> Result<Duration> {
    Duration::from_std(duration).context("Duration is too large.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use chrono::TimeZone;
    use std::cell::RefCell;

    use crate::reminder::Reminder;

    fn test_db() -> Connection {
        let db = Connection::open_in_memory().unwrap();
        model::init_store(&db).unwrap();
        db
    }

    fn local(h: u32, mi: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 8, 7, h, mi, 0).unwrap()
    }

    fn seed_task(db: &Connection, due: DateTime<Local>, buffer: Duration) -> u32 {
        model::add_task(
            db,
            NewTask {
                description: "write report".to_string(),
                created_at: local(8, 0),
                due_at: Some(due),
                estimated_duration: Some(Duration::hours(1)),
                reminder_buffer: Some(buffer),
            },
        )
        .unwrap()
        .id
    }

    /// Records deliveries; fails them all while `failing` is set.
    struct RecordingNotifier {
        sent: RefCell<Vec<(String, u32)>>,
        failing: RefCell<bool>,
    }

    impl RecordingNotifier {
        fn new() -> RecordingNotifier {
            RecordingNotifier {
                sent: RefCell::new(Vec::new()),
                failing: RefCell::new(false),
            }
        }
    }

    impl Notifier for RecordingNotifier {
        fn send(&self, destination: &str, reminder: &Reminder) -> Result<()> {
            if *self.failing.borrow() {
                return Err(anyhow!("delivery down"));
            }
            self.sent
                .borrow_mut()
                .push((destination.to_string(), reminder.task_id));
            Ok(())
        }
    }

    #[test]
    fn remind_pass_delivers_and_persists_the_flag() {
        let db = test_db();
        let id = seed_task(&db, local(14, 0), Duration::minutes(30));
        let notifier = RecordingNotifier::new();

        let delivered = remind(&db, &notifier, "me@example.com", local(13, 31)).unwrap();
        assert_eq!(delivered, 1);
        assert_eq!(
            *notifier.sent.borrow(),
            vec![("me@example.com".to_string(), id)]
        );
        assert!(model::get_task(&db, id).unwrap().unwrap().reminder_sent);

        // same instant again: nothing new to send
        let delivered = remind(&db, &notifier, "me@example.com", local(13, 31)).unwrap();
        assert_eq!(delivered, 0);
        assert_eq!(notifier.sent.borrow().len(), 1);
    }

    #[test]
    fn remind_pass_marks_overdue_tasks_past_due() {
        let db = test_db();
        let id = seed_task(&db, local(9, 0), Duration::minutes(30));
        let notifier = RecordingNotifier::new();

        let delivered = remind(&db, &notifier, "", local(10, 0)).unwrap();
        assert_eq!(delivered, 1); // the late reminder still goes out

        let task = model::get_task(&db, id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::PastDue);
        assert!(task.reminder_sent);
    }

    #[test]
    fn failed_delivery_is_retried_on_the_next_pass() {
        let db = test_db();
        let id = seed_task(&db, local(14, 0), Duration::minutes(30));
        let notifier = RecordingNotifier::new();

        *notifier.failing.borrow_mut() = true;
        let delivered = remind(&db, &notifier, "me@example.com", local(13, 31)).unwrap();
        assert_eq!(delivered, 0);
        // the flag was cleared again so the reminder is not lost
        assert!(!model::get_task(&db, id).unwrap().unwrap().reminder_sent);

        *notifier.failing.borrow_mut() = false;
        let delivered = remind(&db, &notifier, "me@example.com", local(13, 32)).unwrap();
        assert_eq!(delivered, 1);
        assert!(model::get_task(&db, id).unwrap().unwrap().reminder_sent);
    }

    #[test]
    fn completed_tasks_stay_quiet() {
        let db = test_db();
        let id = seed_task(&db, local(14, 0), Duration::minutes(30));
        model::complete_task(&db, id).unwrap();
        let notifier = RecordingNotifier::new();

        let delivered = remind(&db, &notifier, "", local(15, 0)).unwrap();
        assert_eq!(delivered, 0);
        assert_eq!(
            model::get_task(&db, id).unwrap().unwrap().status,
            TaskStatus::Completed
        );
    }

    #[test]
    fn default_buffer_scales_with_the_estimate() {
        assert_eq!(default_buffer(Duration::hours(1)), Duration::hours(4));
        assert_eq!(default_buffer(Duration::hours(4)), Duration::hours(6));
    }
}
