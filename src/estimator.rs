use anyhow::{anyhow, Context, Result};
use chrono::Duration;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::model::Task;

/// Anything that can turn a task description into a duration estimate.
/// Keeps the reminder and storage logic decoupled from any provider.
pub trait Estimator {
    fn estimate(&self, description: &str) -> Result<Duration>;
}

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MODEL: &str = "claude-3-opus-20240229";

/// Upper bound accepted for a single task estimate, in hours.
const MAX_ESTIMATE_HOURS: f64 = 4.0;

/// Fallback when the model never produces a compliant answer.
const DEFAULT_ESTIMATE_HOURS: f64 = 1.0;

const ESTIMATE_SYSTEM: &str = "You are a helpful assistant that estimates how long tasks take \
     to complete. Respond only with the number of hours.";

const SUMMARY_SYSTEM: &str = "You are a helpful assistant that writes a short, encouraging \
     summary of the user's day based on their task list. Two or three sentences, plain text.";

/// Task duration estimator backed by the Anthropic messages API.
pub struct ClaudeEstimator {
    client: reqwest::blocking::Client,
    api_key: String,
}

impl ClaudeEstimator {
    pub fn new(api_key: String) -> ClaudeEstimator {
        ClaudeEstimator {
            client: reqwest::blocking::Client::new(),
            api_key,
        }
    }

    /// Build an estimator from the ANTHROPIC_API_KEY environment variable.
    pub fn from_env() -> Result<ClaudeEstimator> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| anyhow!("ANTHROPIC_API_KEY is not set."))?;
        if api_key.trim().is_empty() {
            return Err(anyhow!("ANTHROPIC_API_KEY is empty."));
        }
        Ok(ClaudeEstimator::new(api_key))
    }

    fn complete(&self, system: &str, prompt: &str, max_tokens: u32) -> Result<String> {
        let request = MessagesRequest {
            model: MODEL,
            max_tokens,
            temperature: 0.0,
            system,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .context("Failed to reach the Anthropic API.")?
            .error_for_status()
            .context("The Anthropic API rejected the request.")?;

        let response: MessagesResponse = response
            .json()
            .context("Failed to decode the Anthropic API response.")?;

        let text = response
            .content
            .into_iter()
            .find(|block| block.kind == "text")
            .map(|block| block.text)
            .ok_or_else(|| anyhow!("The Anthropic API returned no text content."))?;

        Ok(text.trim().to_string())
    }

    /// Write a short summary of the day from the current task list.
    pub fn summarize_day(&self, tasks: &[Task]) -> Result<String> {
        if tasks.is_empty() {
            return Ok("Nothing on the list today. Enjoy the quiet!".to_string());
        }

        let mut prompt = String::from("Here is my task list for today:\n");
        for task in tasks {
            prompt.push_str(&format!("- [{}] {}", task.status, task.description));
            if let Some(due_at) = task.due_at {
                prompt.push_str(&format!(" (due {})", due_at.format("%H:%M")));
            }
            prompt.push('\n');
        }
        prompt.push_str("\nPlease summarize how my day looks.");

        self.complete(SUMMARY_SYSTEM, &prompt, 300)
    }
}

impl Estimator for ClaudeEstimator {
    /// Ask the model for a numeric estimate and audit the reply against the
    /// instructions it was given. A non compliant reply gets one retry with
    /// a stricter prompt before falling back to the default estimate.
    fn estimate(&self, description: &str) -> Result<Duration> {
        let mut prompt = format!(
            "Based on the following task description, estimate how many hours it would take \
             an average person to complete.\nPlease respond with just a number representing \
             hours (can be a decimal).\n\nTask: {}\n\nEstimated hours:",
            description
        );

        for attempt in 0..2 {
            debug!("Estimating time for task (attempt {}): {:?}", attempt + 1, description);
            let reply = self.complete(ESTIMATE_SYSTEM, &prompt, 50)?;
            debug!("Model reply: {:?}", reply);

            let violations = audit_estimate(&reply);
            if violations.is_empty() {
                // the audit guarantees the reply parses
                if let Some(hours) = parse_hours(&reply) {
                    return Ok(hours_to_duration(hours));
                }
            }

            for violation in &violations {
                warn!("Estimate for {:?} flagged: {}", description, violation);
            }

            prompt = format!(
                "{}\n\nPLEASE ONLY OUTPUT a numeric estimate of the hours, at most {}. \
                 No text, units, or commentary.",
                description, MAX_ESTIMATE_HOURS
            );
        }

        warn!(
            "No compliant estimate for {:?}, defaulting to {} hour(s).",
            description, DEFAULT_ESTIMATE_HOURS
        );
        Ok(hours_to_duration(DEFAULT_ESTIMATE_HOURS))
    }
}

/// Check a model reply against the estimation instructions: a bare number,
/// no units or commentary, within the accepted range. Returns one entry
/// per violated instruction.
pub fn audit_estimate(reply: &str) -> Vec<String> {
    let mut violations = Vec::new();

    match parse_hours(reply) {
        None => {
            violations.push(format!(
                "reply is not a bare numeric value: {:?}",
                reply
            ));
        }
        Some(hours) => {
            if hours < 0.0 || hours > MAX_ESTIMATE_HOURS {
                violations.push(format!(
                    "estimate {} is outside the accepted range 0 to {} hours",
                    hours, MAX_ESTIMATE_HOURS
                ));
            }
        }
    }

    violations
}

/// Parse a reply that should contain nothing but a number of hours.
pub fn parse_hours(reply: &str) -> Option<f64> {
    reply.trim().parse::<f64>().ok().filter(|h| h.is_finite())
}

fn hours_to_duration(hours: f64) -> Duration {
    Duration::seconds((hours * 3600.0).round() as i64)
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}
