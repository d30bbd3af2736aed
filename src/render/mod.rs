//! Output rendering for human and JSON modes.

pub mod error;
pub mod human;
pub mod robot;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cli::args::OutputFormat;
use crate::core::models::CyclePayload;
use crate::error::{Result, ScrapeAttemptError};
use crate::storage::cache::Staleness;

pub use robot::{RobotOutput, render_json};

/// Payload plus the staleness it is shown with.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadView<'a> {
    #[serde(flatten)]
    pub payload: &'a CyclePayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staleness: Option<&'static str>,
}

/// Render a payload for `poll`, `status` and the watch loop.
///
/// # Errors
/// JSON serialization failures.
pub fn render_payload(
    command: &'static str,
    payload: &CyclePayload,
    staleness: Option<Staleness>,
    format: OutputFormat,
    pretty: bool,
    no_color: bool,
) -> Result<String> {
    let now = Utc::now();
    match format {
        OutputFormat::Human => Ok(human::render_payload(payload, staleness, now, no_color)),
        OutputFormat::Json => {
            let view = PayloadView {
                payload,
                staleness: staleness.map(|s| s.label()),
            };
            render_json(&RobotOutput::new(command, view, now), pretty)
        }
    }
}

/// Render a surfaced scrape error.
///
/// # Errors
/// JSON serialization failures.
pub fn render_attempt_error(
    command: &'static str,
    error: &ScrapeAttemptError,
    format: OutputFormat,
    pretty: bool,
    no_color: bool,
) -> Result<String> {
    match format {
        OutputFormat::Human => Ok(human::render_attempt_error(error, no_color)),
        OutputFormat::Json => render_json(&RobotOutput::new(command, error, Utc::now()), pretty),
    }
}

/// Render any serializable document, using `human` for the terminal form.
///
/// # Errors
/// JSON serialization failures.
pub fn render_document<T: Serialize>(
    command: &'static str,
    data: &T,
    format: OutputFormat,
    pretty: bool,
    now: DateTime<Utc>,
    human: impl FnOnce() -> String,
) -> Result<String> {
    match format {
        OutputFormat::Human => Ok(human()),
        OutputFormat::Json => render_json(&RobotOutput::new(command, data, now), pretty),
    }
}
