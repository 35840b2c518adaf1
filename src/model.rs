use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Local};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::fmt;
use std::str::FromStr;

/// A single task, saved as an entry in the task table.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: u32,
    pub description: String,
    pub created_at: DateTime<Local>,
    pub due_at: Option<DateTime<Local>>,
    pub finished_at: Option<DateTime<Local>>,
    pub estimated_duration: Option<Duration>, // in seconds
    pub reminder_buffer: Option<Duration>,    // in seconds
    pub status: TaskStatus,
    pub reminder_sent: bool,
}

/// The state of a task. A task starts in progress; completion is a user
/// action, past due is automatic once the due time has elapsed. Both are
/// terminal, only deletion gets rid of a completed or past due task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    InProgress,
    Completed,
    PastDue,
}

impl TaskStatus {
    pub fn as_sql(&self) -> &'static str {
        match self {
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::PastDue => "past_due",
        }
    }

    fn from_sql(value: &str) -> Option<TaskStatus> {
        match value {
            "in_progress" => Some(TaskStatus::InProgress),
            "completed" => Some(TaskStatus::Completed),
            "past_due" => Some(TaskStatus::PastDue),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::InProgress)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            TaskStatus::InProgress => "in progress",
            TaskStatus::Completed => "completed",
            TaskStatus::PastDue => "past due",
        };
        write!(f, "{}", label)
    }
}

impl FromStr for TaskStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<TaskStatus> {
        TaskStatus::from_sql(s).ok_or_else(|| {
            anyhow!(
                "Unknown status '{}', expected in_progress, completed or past_due.",
                s
            )
        })
    }
}

/// Initialize the task database.
pub fn init_store(db: &Connection) -> Result<()> {
    db.execute(
        "CREATE TABLE if not exists task (
                  id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                  description         TEXT NOT NULL,
                  created_at          TEXT NOT NULL,
                  due_at              TEXT,
                  finished_at         TEXT,
                  estimated_duration  INTEGER,
                  reminder_buffer     INTEGER,
                  status              TEXT NOT NULL DEFAULT 'in_progress',
                  reminder_sent       INTEGER NOT NULL DEFAULT 0
                  )",
        [],
    )
    .context("Failed to create task table.")?;

    db.execute("CREATE INDEX status_index ON task (status)", [])
        .context("Failed to create index on task table.")?;

    Ok(())
}

/// Everything needed to create a task. The caller supplies the creation
/// timestamp so derived fields stay consistent with it.
pub struct NewTask {
    pub description: String,
    pub created_at: DateTime<Local>,
    pub due_at: Option<DateTime<Local>>,
    pub estimated_duration: Option<Duration>,
    pub reminder_buffer: Option<Duration>,
}

/// Add a task to the store. If no due time is given but an estimate is,
/// the due time is derived as creation time plus the estimate.
pub fn add_task(db: &Connection, new: NewTask) -> Result<Task> {
    let due_at = new.due_at.or_else(|| {
        new.estimated_duration
            .map(|estimate| new.created_at + estimate)
    });

    db.execute(
        "INSERT INTO task (description, created_at, due_at, estimated_duration, reminder_buffer)
         VALUES(?1, ?2, ?3, ?4, ?5)",
        params![
            new.description,
            new.created_at,
            due_at,
            new.estimated_duration.map(|d| d.num_seconds()),
            new.reminder_buffer.map(|d| d.num_seconds()),
        ],
    )
    .context("Failed to insert task to database.")?;

    let id = db.last_insert_rowid() as u32;
    get_task(db, id)?.ok_or_else(|| anyhow!("Task {} vanished right after insert.", id))
}

const SELECT_TASK: &str = "SELECT id, description, created_at, due_at, finished_at, \
     estimated_duration, reminder_buffer, status, reminder_sent FROM task";

/// Get all tasks, ordered by due time, tasks without one last.
pub fn tasks(db: &Connection) -> Result<Vec<Task>> {
    let mut stmt = db
        .prepare(&format!(
            "{} ORDER BY due_at IS NULL, datetime(due_at), id",
            SELECT_TASK
        ))
        .context("Failed to fetch tasks from database.")?;
    let mapped_rows = stmt.query_map([], |row| task_from_row(row))?;

    let mut tasks = Vec::new();
    for task in mapped_rows {
        tasks.push(task?);
    }

    Ok(tasks)
}

/// Get all tasks in a given state, ordered like [tasks].
pub fn tasks_with_status(db: &Connection, status: TaskStatus) -> Result<Vec<Task>> {
    let mut stmt = db
        .prepare(&format!(
            "{} WHERE status = ?1 ORDER BY due_at IS NULL, datetime(due_at), id",
            SELECT_TASK
        ))
        .context("Failed to fetch tasks from database.")?;
    let mapped_rows = stmt.query_map(params![status.as_sql()], |row| task_from_row(row))?;

    let mut tasks = Vec::new();
    for task in mapped_rows {
        tasks.push(task?);
    }

    Ok(tasks)
}

/// Get the task with the given id, if any.
pub fn get_task(db: &Connection, id: u32) -> Result<Option<Task>> {
    let task = db
        .query_row(
            &format!("{} WHERE id = ?1", SELECT_TASK),
            params![id],
            |row| task_from_row(row),
        )
        .optional()
        .context("Failed to obtain task from database.")?;
    Ok(task)
}

/// Overwrite the editable fields of a task. Fields left at None keep
/// their stored value.
pub fn update_task(
    db: &Connection,
    id: u32,
    description: Option<String>,
    due_at: Option<DateTime<Local>>,
    estimated_duration: Option<Duration>,
    reminder_buffer: Option<Duration>,
) -> Result<Task> {
    let task = get_task(db, id)?.ok_or_else(|| anyhow!("No task with id {}.", id))?;

    let description = description.unwrap_or(task.description);
    let due_at = due_at.or(task.due_at);
    let estimated_duration = estimated_duration.or(task.estimated_duration);
    let reminder_buffer = reminder_buffer.or(task.reminder_buffer);

    db.execute(
        "UPDATE task SET description = ?1, due_at = ?2, estimated_duration = ?3, reminder_buffer = ?4
         WHERE id = ?5",
        params![
            description,
            due_at,
            estimated_duration.map(|d| d.num_seconds()),
            reminder_buffer.map(|d| d.num_seconds()),
            id,
        ],
    )
    .context("Failed to update task in database.")?;

    get_task(db, id)?.ok_or_else(|| anyhow!("No task with id {}.", id))
}

/// Mark a task completed. Only an in progress task can be completed;
/// returns false if the task was already in a terminal state.
pub fn complete_task(db: &Connection, id: u32) -> Result<bool> {
    let changed = db
        .execute(
            "UPDATE task SET status = 'completed', finished_at = CURRENT_TIMESTAMP
             WHERE id = ?1 AND status = 'in_progress'",
            params![id],
        )
        .context("Failed to complete task in database.")?;
    Ok(changed > 0)
}

/// Move a task to a new state. The transition is only applied to tasks
/// still in progress, terminal states never revert.
pub fn set_status(db: &Connection, id: u32, status: TaskStatus) -> Result<()> {
    db.execute(
        "UPDATE task SET status = ?1 WHERE id = ?2 AND status = 'in_progress'",
        params![status.as_sql(), id],
    )
    .context("Failed to update task status in database.")?;
    Ok(())
}

/// Record whether a reminder has been dispatched for a task.
pub fn set_reminder_sent(db: &Connection, id: u32, sent: bool) -> Result<()> {
    db.execute(
        "UPDATE task SET reminder_sent = ?1 WHERE id = ?2",
        params![sent, id],
    )
    .context("Failed to update reminder flag in database.")?;
    Ok(())
}

/// Remove a task from the database.
pub fn delete_task(db: &Connection, id: u32) -> Result<bool> {
    let changed = db
        .execute("DELETE FROM task WHERE id = ?1", params![id])
        .context("Failed to remove task from database.")?;
    Ok(changed > 0)
}

/// Return a task from a row in this order: [id, description, created_at,
/// due_at, finished_at, estimated_duration, reminder_buffer, status,
/// reminder_sent]
fn task_from_row(row: &Row) -> rusqlite::Result<Task> {
    let status: String = row.get(7)?;
    let task = Task {
        id: row.get(0)?,
        description: row.get(1)?,
        created_at: row.get::<_, DateTime<Local>>(2)?,
        due_at: row.get::<_, DateTime<Local>>(3).ok(),
        finished_at: row.get::<_, DateTime<Local>>(4).ok(),
        estimated_duration: row.get::<_, Option<i64>>(5)?.map(Duration::seconds),
        reminder_buffer: row.get::<_, Option<i64>>(6)?.map(Duration::seconds),
        status: TaskStatus::from_sql(&status).unwrap_or(TaskStatus::InProgress),
        reminder_sent: row.get(8)?,
    };
    Ok(task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_db() -> Connection {
        let db = Connection::open_in_memory().unwrap();
        init_store(&db).unwrap();
        db
    }

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn plain_task(db: &Connection, description: &str) -> Task {
        add_task(
            db,
            NewTask {
                description: description.to_string(),
                created_at: local(2026, 8, 7, 9, 0),
                due_at: None,
                estimated_duration: None,
                reminder_buffer: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn add_and_get_round_trip() {
        let db = test_db();
        let created = local(2026, 8, 7, 9, 0);
        let task = add_task(
            &db,
            NewTask {
                description: "write report".to_string(),
                created_at: created,
                due_at: Some(local(2026, 8, 7, 17, 0)),
                estimated_duration: Some(Duration::hours(2)),
                reminder_buffer: Some(Duration::minutes(30)),
            },
        )
        .unwrap();

        assert_eq!(task.description, "write report");
        assert_eq!(task.status, TaskStatus::InProgress);
        assert!(!task.reminder_sent);
        assert_eq!(task.estimated_duration, Some(Duration::hours(2)));
        assert_eq!(task.reminder_buffer, Some(Duration::minutes(30)));
        assert_eq!(task.due_at, Some(local(2026, 8, 7, 17, 0)));

        let fetched = get_task(&db, task.id).unwrap().unwrap();
        assert_eq!(fetched.due_at, task.due_at);
        assert_eq!(fetched.created_at, created);
    }

    #[test]
    fn due_time_derived_from_estimate() {
        let db = test_db();
        let created = local(2026, 8, 7, 9, 0);
        let task = add_task(
            &db,
            NewTask {
                description: "quick fix".to_string(),
                created_at: created,
                due_at: None,
                estimated_duration: Some(Duration::minutes(90)),
                reminder_buffer: None,
            },
        )
        .unwrap();
        assert_eq!(task.due_at, Some(created + Duration::minutes(90)));
    }

    #[test]
    fn task_without_estimate_has_no_due_time() {
        let db = test_db();
        let task = plain_task(&db, "someday");
        assert_eq!(task.due_at, None);
        assert_eq!(task.estimated_duration, None);
    }

    #[test]
    fn tasks_ordered_by_due_time_nulls_last() {
        let db = test_db();
        let created = local(2026, 8, 7, 9, 0);
        for (description, due) in vec![
            ("later", Some(local(2026, 8, 8, 12, 0))),
            ("no due", None),
            ("sooner", Some(local(2026, 8, 7, 12, 0))),
        ] {
            add_task(
                &db,
                NewTask {
                    description: description.to_string(),
                    created_at: created,
                    due_at: due,
                    estimated_duration: None,
                    reminder_buffer: None,
                },
            )
            .unwrap();
        }

        let all: Vec<String> = tasks(&db)
            .unwrap()
            .into_iter()
            .map(|t| t.description)
            .collect();
        assert_eq!(all, vec!["sooner", "later", "no due"]);
    }

    #[test]
    fn complete_is_terminal() {
        let db = test_db();
        let task = plain_task(&db, "finish me");

        assert!(complete_task(&db, task.id).unwrap());
        assert!(!complete_task(&db, task.id).unwrap());
        assert_eq!(
            get_task(&db, task.id).unwrap().unwrap().status,
            TaskStatus::Completed
        );

        // terminal states never revert, not even to past due
        set_status(&db, task.id, TaskStatus::PastDue).unwrap();
        assert_eq!(
            get_task(&db, task.id).unwrap().unwrap().status,
            TaskStatus::Completed
        );
    }

    #[test]
    fn update_keeps_unset_fields() {
        let db = test_db();
        let task = add_task(
            &db,
            NewTask {
                description: "old text".to_string(),
                created_at: local(2026, 8, 7, 9, 0),
                due_at: Some(local(2026, 8, 7, 17, 0)),
                estimated_duration: Some(Duration::hours(1)),
                reminder_buffer: Some(Duration::minutes(15)),
            },
        )
        .unwrap();

        let updated =
            update_task(&db, task.id, Some("new text".to_string()), None, None, None).unwrap();
        assert_eq!(updated.description, "new text");
        assert_eq!(updated.due_at, task.due_at);
        assert_eq!(updated.estimated_duration, Some(Duration::hours(1)));
        assert_eq!(updated.reminder_buffer, Some(Duration::minutes(15)));
    }

    #[test]
    fn reminder_flag_round_trip() {
        let db = test_db();
        let task = plain_task(&db, "ping me");

        set_reminder_sent(&db, task.id, true).unwrap();
        assert!(get_task(&db, task.id).unwrap().unwrap().reminder_sent);
        set_reminder_sent(&db, task.id, false).unwrap();
        assert!(!get_task(&db, task.id).unwrap().unwrap().reminder_sent);
    }

    #[test]
    fn delete_task_removes_row() {
        let db = test_db();
        let task = plain_task(&db, "begone");

        assert!(delete_task(&db, task.id).unwrap());
        assert!(get_task(&db, task.id).unwrap().is_none());
        assert!(!delete_task(&db, task.id).unwrap());
    }

    #[test]
    fn status_filter() {
        let db = test_db();
        let first = plain_task(&db, "a");
        plain_task(&db, "b");
        complete_task(&db, first.id).unwrap();

        let completed = tasks_with_status(&db, TaskStatus::Completed).unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].description, "a");
        let in_progress = tasks_with_status(&db, TaskStatus::InProgress).unwrap();
        assert_eq!(in_progress.len(), 1);
        assert_eq!(in_progress[0].description, "b");
    }
}
