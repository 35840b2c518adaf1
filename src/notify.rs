use anyhow::{Context, Result};
use log::{info, warn};
use serde::Serialize;

use crate::reminder::Reminder;

/// Delivery seam for reminders. Implementations report success or failure
/// and nothing else; retry policy lives with the caller.
pub trait Notifier {
    fn send(&self, destination: &str, reminder: &Reminder) -> Result<()>;
}

/// Prints reminders to the terminal. The default when no delivery channel
/// is configured.
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn send(&self, destination: &str, reminder: &Reminder) -> Result<()> {
        if destination.is_empty() {
            println!("{}", reminder.body);
        } else {
            println!("[to {}] {}", destination, reminder.body);
        }
        Ok(())
    }
}

/// Posts reminders as JSON to an HTTP endpoint, typically a mail relay.
/// What happens behind the endpoint is the deployment's business.
pub struct WebhookNotifier {
    client: reqwest::blocking::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> WebhookNotifier {
        WebhookNotifier {
            client: reqwest::blocking::Client::new(),
            url,
        }
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    destination: &'a str,
    subject: &'a str,
    body: &'a str,
}

impl Notifier for WebhookNotifier {
    fn send(&self, destination: &str, reminder: &Reminder) -> Result<()> {
        let payload = WebhookPayload {
            destination,
            subject: &reminder.subject,
            body: &reminder.body,
        };

        self.client
            .post(&self.url)
            .json(&payload)
            .send()
            .context("Failed to reach the notification endpoint.")?
            .error_for_status()
            .context("The notification endpoint rejected the reminder.")?;

        info!("Reminder for task {} delivered to {}.", reminder.task_id, destination);
        Ok(())
    }
}

/// Pick the notifier for this run: the webhook when NUDGE_WEBHOOK_URL is
/// set and a destination is known, the console otherwise.
pub fn from_env(destination: Option<&str>) -> Box<dyn Notifier> {
    match std::env::var("NUDGE_WEBHOOK_URL") {
        Ok(url) if !url.trim().is_empty() => {
            if destination.is_some() {
                Box::new(WebhookNotifier::new(url))
            } else {
                warn!(
                    "NUDGE_WEBHOOK_URL is set but no destination email is configured \
                     (set NUDGE_EMAIL or pass --email); printing reminders to the console."
                );
                Box::new(ConsoleNotifier)
            }
        }
        _ => Box::new(ConsoleNotifier),
    }
}
