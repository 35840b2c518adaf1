use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use humantime::parse_duration;
use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;

use crate::model::TaskStatus;

/// Parse a due timestamp in the local timezone. Accepts "2021-05-30 17:00"
/// (with or without seconds, space or T separator) and a bare date, which
/// means end of that day.
pub fn parse_local_datetime(s: &str) -> Result<DateTime<Local>> {
    let naive = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(23, 59, 0))
        })
        .ok_or_else(|| anyhow!("Failed to parse '{}' as a date or date-time.", s))?;

    Local
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| anyhow!("'{}' is not a valid local time.", s))
}

#[derive(Debug, StructOpt)]
pub enum Command {
    /// Add a new task. Without --estimate the duration is estimated for
    /// you; without --due or --in the due time is derived from it.
    Add {
        /// The task description text.
        #[structopt()]
        description: String,

        /// The task estimated duration (e.g. "1h 30m").
        #[structopt(long, parse(try_from_str = parse_duration))]
        estimate: Option<Duration>,

        /// When the task is due (e.g. "2021-05-30 17:00").
        #[structopt(long, parse(try_from_str = parse_local_datetime))]
        due: Option<DateTime<Local>>,

        /// Due this long from now (e.g. "4h"). Alternative to --due.
        #[structopt(name = "in", long = "in", parse(try_from_str = parse_duration), conflicts_with = "due")]
        due_in: Option<Duration>,

        /// How long before the due time the reminder should fire.
        #[structopt(long = "remind-before", parse(try_from_str = parse_duration))]
        remind_before: Option<Duration>,
    },
    /// List tasks, optionally only those in a given state.
    List {
        /// One of in_progress, completed, past_due.
        #[structopt(long)]
        status: Option<TaskStatus>,
    },
    /// Mark a task as completed.
    Done {
        #[structopt()]
        id: u32,
    },
    /// Remove a task.
    Rm {
        #[structopt()]
        id: u32,
    },
    /// Change the text, due time, estimate or reminder lead of a task.
    Edit {
        #[structopt()]
        id: u32,

        #[structopt(long)]
        description: Option<String>,

        #[structopt(long, parse(try_from_str = parse_local_datetime))]
        due: Option<DateTime<Local>>,

        #[structopt(long, parse(try_from_str = parse_duration))]
        estimate: Option<Duration>,

        #[structopt(long = "remind-before", parse(try_from_str = parse_duration))]
        remind_before: Option<Duration>,
    },
    /// Print a duration estimate for a task without saving anything.
    Estimate {
        #[structopt()]
        description: String,
    },
    /// Run one reminder pass: mark overdue tasks and deliver due reminders.
    Remind {
        /// Where reminders go. Falls back to the NUDGE_EMAIL variable.
        #[structopt(long)]
        email: Option<String>,
    },
    /// Keep running reminder passes until interrupted.
    Watch {
        /// Time between passes.
        #[structopt(long, parse(try_from_str = parse_duration), default_value = "60s")]
        every: Duration,

        /// Where reminders go. Falls back to the NUDGE_EMAIL variable.
        #[structopt(long)]
        email: Option<String>,
    },
    /// Ask for a short summary of the day's tasks.
    Summary,
}

#[derive(Debug, StructOpt)]
#[structopt(
    name = "nudge",
    about = "A to-do list planner with time estimates and reminders."
)]
pub struct CommandLineArgs {
    #[structopt(subcommand)]
    pub action: Command,

    /// Use a different task database file.
    #[structopt(parse(from_os_str), short, long)]
    pub db_file: Option<PathBuf>,
}
