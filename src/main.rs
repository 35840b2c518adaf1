#[macro_use]
extern crate prettytable;

use anyhow::{anyhow, Context};
use chrono::Local;
use directories::ProjectDirs;
use log::warn;
use std::path::PathBuf;
use structopt::StructOpt;

mod cli;
mod estimator;
mod interface;
mod model;
mod notify;
mod reminder;

use crate::estimator::{ClaudeEstimator, Estimator};
use crate::model::init_store;
use cli::{Command::*, CommandLineArgs};
use rusqlite::Connection;

fn find_default_db_file() -> Option<PathBuf> {
    if let Some(base_dirs) = ProjectDirs::from("org", "nudge", "nudge") {
        let root_dir = base_dirs.data_dir();
        if !root_dir.exists() {
            std::fs::create_dir_all(root_dir).ok()?;
        }
        let mut path = PathBuf::from(root_dir);
        path.push("db.sqlite");
        Some(path)
    } else {
        None
    }
}

/// Get a connection to the task database, creating it if it does not
/// exist.
pub fn get_task_db(db_path: PathBuf) -> anyhow::Result<Connection> {
    let db_exists = db_path.exists();
    let db = Connection::open(&db_path)?;
    if !db_exists {
        init_store(&db)?;
    }
    Ok(db)
}

/// The estimator, if an API key is around; estimation degrades to the
/// default otherwise.
fn optional_estimator() -> Option<ClaudeEstimator> {
    match ClaudeEstimator::from_env() {
        Ok(estimator) => Some(estimator),
        Err(e) => {
            warn!("{:#} Estimates fall back to the default.", e);
            None
        }
    }
}

fn reminder_destination(email: Option<String>) -> Option<String> {
    email.or_else(|| std::env::var("NUDGE_EMAIL").ok())
}

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    // Get the command-line arguments.
    let CommandLineArgs { action, db_file } = CommandLineArgs::from_args();

    // Unpack the database file.
    let db_file = db_file
        .or_else(find_default_db_file)
        .ok_or(anyhow!("Failed to find database file."))?;

    let database = get_task_db(db_file)?;

    // Perform the action.
    match action {
        Add {
            description,
            estimate,
            due,
            due_in,
            remind_before,
        } => {
            let estimator = optional_estimator();
            interface::add(
                &database,
                estimator.as_ref().map(|e| e as &dyn Estimator),
                description,
                estimate,
                due,
                due_in,
                remind_before,
            )
        }
        List { status } => interface::list(&database, status),
        Done { id } => interface::done(&database, id),
        Rm { id } => interface::remove(&database, id),
        Edit {
            id,
            description,
            due,
            estimate,
            remind_before,
        } => interface::edit(&database, id, description, due, estimate, remind_before),
        Estimate { description } => {
            let estimator = ClaudeEstimator::from_env()
                .context("Estimation needs an Anthropic API key.")?;
            interface::estimate(&estimator, &description)
        }
        Remind { email } => {
            let destination = reminder_destination(email);
            let notifier = notify::from_env(destination.as_deref());
            interface::remind(
                &database,
                notifier.as_ref(),
                destination.as_deref().unwrap_or(""),
                Local::now(),
            )
            .map(|_| ())
        }
        Watch { every, email } => {
            let destination = reminder_destination(email);
            let notifier = notify::from_env(destination.as_deref());
            interface::watch(
                &database,
                notifier.as_ref(),
                destination.as_deref().unwrap_or(""),
                every,
            )
        }
        Summary => {
            let claude = ClaudeEstimator::from_env()
                .context("The daily summary needs an Anthropic API key.")?;
            interface::summary(&database, &claude)
        }
    }?;
    Ok(())
}
