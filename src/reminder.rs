use chrono::{DateTime, Datelike, Duration, Local};
use humantime::format_duration;

use crate::model::{Task, TaskStatus};

/// A reminder selected by an evaluation pass, ready to hand to a notifier.
#[derive(Debug, Clone)]
pub struct Reminder {
    pub task_id: u32,
    pub subject: String,
    pub body: String,
}

/// The outcome of one evaluation pass: the reminders to dispatch and the
/// ids of tasks that just went past due. The caller persists both.
#[derive(Debug, Default)]
pub struct Evaluation {
    pub reminders: Vec<Reminder>,
    pub newly_past_due: Vec<u32>,
}

/// The instant a reminder becomes eligible, or None when the task has no
/// due time or no reminder buffer configured.
pub fn trigger_at(task: &Task) -> Option<DateTime<Local>> {
    match (task.due_at, task.reminder_buffer) {
        (Some(due_at), Some(buffer)) => Some(due_at - buffer),
        _ => None,
    }
}

/// Run one reminder pass over the tasks.
///
/// Every task still in progress whose trigger time has been reached and
/// that has not been reminded yet is selected and flagged, at most once.
/// Every task still in progress whose due time has elapsed goes past due;
/// a task crossing that line in this very pass is still selected, late
/// reminders beat no reminders. Tasks already in a terminal state are
/// never touched. Incomplete tasks (no due time, no buffer) never trigger.
///
/// Dispatching is the caller's job; if delivery fails the caller may clear
/// reminder_sent again to retry on the next pass.
pub fn evaluate(tasks: &mut [Task], now: DateTime<Local>) -> Evaluation {
    let mut evaluation = Evaluation::default();

    for task in tasks.iter_mut() {
        if task.status != TaskStatus::InProgress {
            continue;
        }

        // the reminder flag may only be raised while the task is still in
        // progress, so selection happens before the past due transition
        if !task.reminder_sent {
            if let (Some(trigger), Some(due_at)) = (trigger_at(task), task.due_at) {
                if now >= trigger {
                    task.reminder_sent = true;
                    evaluation.reminders.push(render_reminder(task, due_at, now));
                }
            }
        }

        if let Some(due_at) = task.due_at {
            if now > due_at {
                task.status = TaskStatus::PastDue;
                evaluation.newly_past_due.push(task.id);
            }
        }
    }

    evaluation
}

const REMINDER_TEMPLATES: [&str; 7] = [
    "⏰ Don't forget! '{task}' is due {due}.",
    "👋 Hey there! Just a friendly reminder about '{task}', due {due}.",
    "⚡ Time is ticking for '{task}', it's due {due}!",
    "🚀 Ready to tackle '{task}'? It's coming up {due}.",
    "📝 Your to-do list is calling! '{task}' needs attention by {due}.",
    "🌟 You've got this! '{task}' is scheduled for completion {due}.",
    "🔔 Reminder alert! '{task}' is due {due}.",
];

/// Build the message for a selected task.
fn render_reminder(task: &Task, due_at: DateTime<Local>, now: DateTime<Local>) -> Reminder {
    // rotate through the templates per task rather than at random, so a
    // pass is reproducible
    let template = REMINDER_TEMPLATES[task.id as usize % REMINDER_TEMPLATES.len()];
    let headline = template
        .replace("{task}", &task.description)
        .replace("{due}", &due_phrase(due_at, now));

    let mut body = headline;
    body.push('\n');
    body.push_str(&format!("Due: {}\n", due_at.format("%A, %B %d at %H:%M")));
    body.push_str(&format!("Time left: {}\n", remaining_phrase(due_at, now)));
    if let Some(estimate) = task.estimated_duration {
        if let Ok(estimate) = estimate.to_std() {
            body.push_str(&format!("Estimated effort: {}\n", format_duration(estimate)));
        }
    }

    Reminder {
        task_id: task.id,
        subject: format!("Reminder: {}", truncate(&task.description, 40)),
        body,
    }
}

/// "today", "tomorrow", or the weekday for anything further out.
fn due_phrase(due_at: DateTime<Local>, now: DateTime<Local>) -> String {
    if due_at.date_naive() == now.date_naive() {
        "today".to_string()
    } else if due_at.date_naive() == (now + Duration::days(1)).date_naive() {
        "tomorrow".to_string()
    } else if due_at.year() == now.year() {
        due_at.format("on %A, %B %d").to_string()
    } else {
        due_at.format("on %B %d, %Y").to_string()
    }
}

/// Human readable time left until the due date, with minute precision.
/// Overdue tasks get told how late they are.
pub fn remaining_phrase(due_at: DateTime<Local>, now: DateTime<Local>) -> String {
    let left = due_at - now;
    let whole_minutes = Duration::minutes((left.num_minutes()).abs());
    let formatted = match whole_minutes.to_std() {
        Ok(d) if !d.is_zero() => format_duration(d).to_string(),
        _ => "less than a minute".to_string(),
    };
    if left < Duration::zero() {
        format!("overdue by {}", formatted)
    } else {
        formatted
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}
