//! Human-readable terminal output using `colored`.

use chrono::{DateTime, Utc};
use colored::{Color, Colorize};

use crate::core::events::UsageEvent;
use crate::core::models::{CapId, Confidence, CyclePayload, UsageReading};
use crate::core::scheduler::SchedulerState;
use crate::core::session::{SessionState, SessionStatus};
use crate::error::ScrapeAttemptError;
use crate::storage::cache::Staleness;
use crate::storage::history::StoredCycle;
use crate::util::{format_age, format_countdown, format_local, format_percent, format_tokens, usage_bar};

const BAR_WIDTH: usize = 20;
const LABEL_WIDTH: usize = 16;

/// Applies colors unless output is plain.
#[derive(Debug, Clone, Copy)]
struct Palette {
    plain: bool,
}

impl Palette {
    const fn new(no_color: bool) -> Self {
        Self { plain: no_color }
    }

    fn paint(self, text: &str, color: Color) -> String {
        if self.plain {
            text.to_string()
        } else {
            text.color(color).to_string()
        }
    }

    fn bold(self, text: &str) -> String {
        if self.plain {
            text.to_string()
        } else {
            text.bold().to_string()
        }
    }

    fn dim(self, text: &str) -> String {
        if self.plain {
            text.to_string()
        } else {
            text.dimmed().to_string()
        }
    }
}

fn usage_color(percent: f64) -> Color {
    if percent >= 90.0 {
        Color::Red
    } else if percent >= 75.0 {
        Color::Yellow
    } else {
        Color::Green
    }
}

/// Render a payload, one line per cap in display order.
#[must_use]
pub fn render_payload(
    payload: &CyclePayload,
    staleness: Option<Staleness>,
    now: DateTime<Utc>,
    no_color: bool,
) -> String {
    let palette = Palette::new(no_color);
    let mut lines = Vec::new();

    let mut header = format!(
        "{} {}",
        palette.bold("Usage"),
        palette.dim(&format!("(scraped {})", format_age(payload.scraped_at, now)))
    );
    if let Some(staleness) = staleness.filter(|s| *s != Staleness::Fresh) {
        header.push(' ');
        header.push_str(&palette.paint(&format!("[{}]", staleness.label()), Color::Yellow));
    }
    lines.push(header);

    for cap in CapId::ALL {
        match payload.reading(cap) {
            Some(reading) => lines.push(render_reading(reading, now, palette)),
            None => lines.push(format!(
                "  {:<LABEL_WIDTH$}{}",
                cap.display_name(),
                palette.dim("not shown on page")
            )),
        }
    }

    if payload.is_error() {
        lines.push(palette.paint("  No usage values could be read.", Color::Red));
    }
    lines.join("\n")
}

fn render_reading(reading: &UsageReading, now: DateTime<Utc>, palette: Palette) -> String {
    let color = usage_color(reading.usage_percent);
    let mut line = format!(
        "  {:<LABEL_WIDTH$}{} {:>6}",
        reading.id.display_name(),
        palette.paint(&usage_bar(reading.usage_percent, BAR_WIDTH), color),
        palette.paint(&format_percent(reading.usage_percent), color),
    );

    match (reading.reset_at, reading.reset_text.as_deref()) {
        (Some(at), _) => line.push_str(&format!("  resets {}", format_countdown(at, now))),
        (None, Some(text)) => line.push_str(&format!("  {}", palette.dim(text))),
        (None, None) => {}
    }

    if let (Some(used), Some(limit)) = (reading.tokens_used, reading.tokens_limit) {
        line.push_str(&palette.dim(&format!(
            "  [{} / {} tokens]",
            format_tokens(used),
            format_tokens(limit)
        )));
    }

    if reading.confidence != Confidence::Primary {
        line.push_str(&palette.dim(&format!("  ({})", reading.confidence.as_str())));
    }
    line
}

/// Render a surfaced scrape error with its explanation and remedy.
#[must_use]
pub fn render_attempt_error(error: &ScrapeAttemptError, no_color: bool) -> String {
    let palette = Palette::new(no_color);
    let mut lines = vec![
        format!(
            "{} [{}] {}",
            palette.paint("Error", Color::Red),
            error.code,
            error.message
        ),
        format!("  {}", error.explanation),
    ];
    if let Some(remedy) = &error.remedy {
        lines.push(format!("  {} {remedy}", palette.bold("Fix:")));
    }
    lines.push(palette.dim(&format!(
        "  kind: {}, attempts: {}",
        error.kind, error.attempt
    )));
    lines.join("\n")
}

/// Render one bus event.
#[must_use]
pub fn render_event(event: &UsageEvent, now: DateTime<Utc>, no_color: bool) -> String {
    match event {
        UsageEvent::Update(payload) => render_payload(payload, None, now, no_color),
        UsageEvent::Error(error) => render_attempt_error(error, no_color),
    }
}

/// Render session validity and credential age.
#[must_use]
pub fn render_session(status: &SessionStatus, now: DateTime<Utc>, no_color: bool) -> String {
    let palette = Palette::new(no_color);
    let state = match status.state {
        SessionState::Authenticated => palette.paint("valid", Color::Green),
        SessionState::Authenticating => palette.paint("logging in", Color::Yellow),
        SessionState::Expired => palette.paint("expired", Color::Red),
        SessionState::NoSession => palette.paint("none", Color::Red),
    };

    let mut lines = vec![format!("Session: {state}")];
    if let Some(saved_at) = status.saved_at {
        lines.push(format!(
            "  saved {} ({})",
            format_local(saved_at),
            format_age(saved_at, now)
        ));
    }
    if let Some(fingerprint) = &status.fingerprint {
        lines.push(palette.dim(&format!("  fingerprint {fingerprint}")));
    }
    if let Some(reason) = &status.reason {
        lines.push(format!("  reason: {reason}"));
    }
    if matches!(status.state, SessionState::NoSession | SessionState::Expired) {
        lines.push(format!("  Run {} to sign in.", palette.bold("usagewatch login")));
    }
    lines.join("\n")
}

/// One-line scheduler summary for the watch loop.
#[must_use]
pub fn render_scheduler_state(state: &SchedulerState, no_color: bool) -> String {
    let palette = Palette::new(no_color);
    let polling = if state.is_running {
        palette.paint(&format!("every {}s", state.interval_seconds), Color::Green)
    } else {
        palette.paint("stopped", Color::Yellow)
    };
    let mut line = format!(
        "Polling: {polling}, cycles completed: {}",
        state.cycles_completed
    );
    if state.is_cycle_in_flight {
        line.push_str(", cycle in flight");
    }
    if let Some(error) = &state.last_error {
        line.push_str(&palette.dim(&format!(", last error: {}", error.kind)));
    }
    line
}

/// Table of recent cycles, newest first.
#[must_use]
pub fn render_history(cycles: &[StoredCycle], now: DateTime<Utc>, no_color: bool) -> String {
    let palette = Palette::new(no_color);
    if cycles.is_empty() {
        return "No cycles recorded yet.".to_string();
    }

    let mut lines = vec![palette.bold(&format!(
        "{:<18} {:<9} {:>8} {:>8} {:>8}  {}",
        "When", "Status", "Session", "Weekly", "Opus", "Attempts"
    ))];
    for cycle in cycles {
        let pct = |cap: CapId| {
            cycle
                .payload
                .as_ref()
                .and_then(|p| p.reading(cap))
                .map_or_else(|| "-".to_string(), |r| format_percent(r.usage_percent))
        };
        let status = match cycle.error_kind.as_deref() {
            Some(kind) => palette.paint(&format!("{:<9}", truncate(kind, 9)), Color::Red),
            None => format!("{:<9}", cycle.status),
        };
        lines.push(format!(
            "{:<18} {status} {:>8} {:>8} {:>8}  {}",
            format_age(cycle.recorded_at, now),
            pct(CapId::ShortWindow),
            pct(CapId::LongWindowAll),
            pct(CapId::LongWindowRestricted),
            cycle.attempts
        ));
    }
    lines.join("\n")
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
