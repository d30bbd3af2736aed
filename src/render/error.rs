//! Rendering of crate errors with fix suggestions.

use colored::Colorize;
use serde::Serialize;

use crate::cli::args::OutputFormat;
use crate::error::{FixSuggestion, WatchError};

/// Render an error for stderr in the requested format.
#[must_use]
pub fn render_error(error: &WatchError, format: OutputFormat, no_color: bool, pretty: bool) -> String {
    match format {
        OutputFormat::Json => render_error_json(error, pretty),
        OutputFormat::Human => render_human(error, no_color),
    }
}

/// Structured JSON form of an error.
#[must_use]
pub fn render_error_json(error: &WatchError, pretty: bool) -> String {
    let doc = ErrorJson::from_error(error);
    let rendered = if pretty {
        serde_json::to_string_pretty(&doc)
    } else {
        serde_json::to_string(&doc)
    };
    rendered.unwrap_or_else(|_| render_human(error, true))
}

fn render_human(error: &WatchError, no_color: bool) -> String {
    let header = format!("Error [{}]: {error}", error.error_code());
    let mut lines = vec![if no_color {
        header
    } else {
        header.red().bold().to_string()
    }];

    let suggestions = error.fix_suggestions();
    if let Some(first) = suggestions.first() {
        if let Some(command) = first_runnable(first) {
            lines.push(format!("Fix: {command}"));
        }
        if !first.context.is_empty() {
            lines.push(String::new());
            lines.extend(wrap_text(&first.context, 76));
        }
        if let Some(prevention) = &first.prevention {
            lines.push(format!("Tip: {prevention}"));
        }
    }
    lines.join("\n")
}

fn first_runnable(suggestion: &FixSuggestion) -> Option<&str> {
    suggestion
        .commands
        .iter()
        .map(String::as_str)
        .find(|cmd| !cmd.starts_with('#'))
}

fn wrap_text(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + 1 + word.len() > width {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorJson {
    error_code: &'static str,
    kind: &'static str,
    category: String,
    message: String,
    is_retryable: bool,
    suggestions: Vec<FixSuggestion>,
}

impl ErrorJson {
    fn from_error(error: &WatchError) -> Self {
        Self {
            error_code: error.error_code(),
            kind: error.kind().as_str(),
            category: error.category().to_string(),
            message: error.to_string(),
            is_retryable: error.is_retryable(),
            suggestions: error.fix_suggestions(),
        }
    }
}
