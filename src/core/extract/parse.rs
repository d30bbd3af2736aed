//! Text parsing for usage values.
//!
//! Number parsing is locale-stable: commas, spaces, non-breaking spaces and
//! apostrophes are grouping separators, a single `.` is the decimal point and
//! `k`/`M` suffixes scale the value.

use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;

use crate::core::models::RawReading;

// Calendar units come first so `months` is never read as `m` plus letters.
const UNIT: &str =
    r"(?:months?|mos?|years?|yrs?|y|weeks?|wks?|w|days?|d|hours?|hrs?|h|minutes?|mins?|m|seconds?|secs?|s)";
const COUNT: &str = r"\d[\d,.'\x{a0}\x{202f} ]*[kKmM]?\b";

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:[.,]\d{1,2})?)\s*%").expect("valid percent regex"));

static USED_PERCENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+(?:[.,]\d{1,2})?)\s*%\s*(?:used|consumed)").expect("valid used regex")
});

static TOKENS_OF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)({COUNT})\s*(?:of|/)\s*({COUNT})")).expect("valid tokens regex")
});

static USAGE_STATEMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\d+(?:[.,]\d{{1,2}})?\s*%\s*used|{COUNT}\s*of\s*{COUNT}\s*(?:tokens?\s*)?used"
    ))
    .expect("valid statement regex")
});

static RESET_PHRASE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)\bresets?\s+in\s+((?:\d+\s*{UNIT}[\s,]*(?:and\s+)?)+)"
    ))
    .expect("valid reset regex")
});

static BARE_DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)^\s*(?:resets?\s+)?(?:in\s+)?((?:\d+\s*{UNIT}[\s,]*(?:and\s+)?)+)\s*$"
    ))
    .expect("valid duration regex")
});

static DURATION_PART_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i)(\d+)\s*({UNIT})")).expect("valid part regex")
});

static RESET_SNIPPET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bresets?\b[^\n%·|]{0,48}").expect("valid snippet regex"));

static TRAILING_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\d+(?:[.,]\d+)?\s*$").expect("valid trailing regex"));

static TIMESTAMP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}(?::\d{2}(?:\.\d+)?)?(?:Z|[+-]\d{2}:\d{2})")
        .expect("valid timestamp regex")
});

/// Parse a grouped count such as `1,234,567`, `12 500` or `1.5M`.
#[must_use]
pub fn parse_count(text: &str) -> Option<u64> {
    let trimmed = text.trim();
    let (digits, scale) = match trimmed.chars().last()? {
        'k' | 'K' => (&trimmed[..trimmed.len() - 1], 1_000.0),
        'm' | 'M' => (&trimmed[..trimmed.len() - 1], 1_000_000.0),
        _ => (trimmed, 1.0),
    };
    let mut cleaned: String = digits
        .chars()
        .filter(|c| !matches!(c, ',' | ' ' | '\'' | '_' | '\u{a0}' | '\u{202f}'))
        .collect();
    let dots = cleaned.matches('.').count();
    let grouped_thousands = dots == 1
        && digits.len() == trimmed.len()
        && cleaned.rsplit('.').next().is_some_and(|tail| tail.len() == 3);
    if dots > 1 || grouped_thousands {
        cleaned.retain(|c| c != '.');
    }
    if cleaned.is_empty() || !cleaned.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    let value: f64 = cleaned.parse().ok()?;
    let scaled = (value * scale).round();
    if !scaled.is_finite() || scaled < 0.0 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Some(scaled as u64)
}

fn parse_decimal(text: &str) -> Option<f64> {
    text.replace(',', ".").parse::<f64>().ok()
}

/// First `N%` in the text, or the text itself when it is a bare number.
#[must_use]
pub fn parse_percent(text: &str) -> Option<f64> {
    if let Some(caps) = PERCENT_RE.captures(text) {
        return parse_decimal(&caps[1]);
    }
    let trimmed = text.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return trimmed.parse().ok();
    }
    None
}

/// `X of Y` / `X / Y` token counts.
#[must_use]
pub fn parse_token_pair(text: &str) -> Option<(u64, u64)> {
    let caps = TOKENS_OF_RE.captures(text)?;
    Some((parse_count(&caps[1])?, parse_count(&caps[2])?))
}

/// One `amount unit` term. Months and years have no fixed length and
/// out-of-range amounts do not fit a `Duration`; both give `None`.
fn duration_part(amount: i64, unit: &str) -> Option<Duration> {
    let unit = unit.to_ascii_lowercase();
    if unit.starts_with("mo") || unit.starts_with('y') {
        return None;
    }
    match unit.chars().next()? {
        'w' => Duration::try_weeks(amount),
        'd' => Duration::try_days(amount),
        'h' => Duration::try_hours(amount),
        'm' => Duration::try_minutes(amount),
        _ => Duration::try_seconds(amount),
    }
}

fn sum_duration_parts(text: &str) -> Option<Duration> {
    let mut total = Duration::zero();
    let mut matched = false;
    for caps in DURATION_PART_RE.captures_iter(text) {
        let amount: i64 = caps[1].parse().ok()?;
        total = total.checked_add(&duration_part(amount, &caps[2])?)?;
        matched = true;
    }
    matched.then_some(total)
}

/// Relative reset duration from text like `Resets in 4 hr 16 min`.
#[must_use]
pub fn parse_reset_duration(text: &str) -> Option<Duration> {
    if let Some(caps) = RESET_PHRASE_RE.captures(text) {
        return sum_duration_parts(&caps[1]);
    }
    let caps = BARE_DURATION_RE.captures(text)?;
    sum_duration_parts(&caps[1])
}

/// Absolute reset time: relative text anchored at `anchor`, or an embedded RFC 3339 timestamp.
#[must_use]
pub fn parse_reset_at(text: &str, anchor: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if let Some(duration) = parse_reset_duration(text) {
        return anchor.checked_add_signed(duration);
    }
    let found = TIMESTAMP_RE.find(text)?;
    DateTime::parse_from_rfc3339(found.as_str())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Everything readable from one cap's slice of page text.
#[must_use]
pub fn parse_segment(segment: &str) -> Option<RawReading> {
    let percent = USED_PERCENT_RE
        .captures(segment)
        .and_then(|caps| parse_decimal(&caps[1]))
        .or_else(|| {
            PERCENT_RE
                .captures(segment)
                .and_then(|caps| parse_decimal(&caps[1]))
        });
    let tokens = parse_token_pair(segment);
    let reset_text = reset_text_of(segment);

    let raw = RawReading {
        percent,
        tokens_used: tokens.map(|(used, _)| used),
        tokens_limit: tokens.map(|(_, limit)| limit),
        reset_text,
        ..RawReading::default()
    };
    raw.effective_percent().is_some().then_some(raw)
}

/// The reset phrase as shown on the page, without a trailing usage number.
fn reset_text_of(segment: &str) -> Option<String> {
    if let Some(found) = RESET_PHRASE_RE.find(segment) {
        return Some(found.as_str().trim().trim_end_matches(',').trim().to_string());
    }
    let found = RESET_SNIPPET_RE.find(segment)?;
    let mut text = found.as_str();
    if segment[found.end()..].starts_with('%') {
        text = TRAILING_NUMBER_RE
            .find(text)
            .map_or(text, |tail| &text[..tail.start()]);
    }
    let text = text.trim().trim_end_matches([',', ';']).trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Inputs for the free-text strategy.
#[derive(Debug, Clone, Copy)]
pub struct TextQuery<'a> {
    pub label: &'a str,
    pub other_labels: &'a [String],
    /// Position of the cap in page order.
    pub index: usize,
    pub window_chars: usize,
}

/// Locate one cap in the rendered page text.
///
/// With the cap's label present, the text after it (up to the next cap
/// label or the window size) is parsed. When no cap label appears at all,
/// unlabeled usage statements are attributed to caps in page order.
#[must_use]
pub fn text_heuristic(text: &str, query: &TextQuery<'_>) -> Option<RawReading> {
    let lower = text.to_ascii_lowercase();
    let label = query.label.to_ascii_lowercase();
    let others: Vec<String> = query
        .other_labels
        .iter()
        .map(|l| l.to_ascii_lowercase())
        .filter(|l| !l.is_empty())
        .collect();

    if !label.is_empty() && lower.contains(&label) {
        for (pos, _) in lower.match_indices(&label) {
            let start = pos + label.len();
            let mut end = (start + query.window_chars).min(text.len());
            for other in &others {
                if let Some(offset) = lower[start..].find(other.as_str()) {
                    end = end.min(start + offset);
                }
            }
            let end = floor_boundary(text, end);
            if let Some(raw) = parse_segment(&text[start..end]) {
                return Some(raw);
            }
        }
        return None;
    }

    if others.iter().any(|other| lower.contains(other.as_str())) {
        return None;
    }

    let statements: Vec<usize> = USAGE_STATEMENT_RE
        .find_iter(text)
        .map(|m| m.start())
        .collect();
    let start = *statements.get(query.index)?;
    let end = statements
        .get(query.index + 1)
        .copied()
        .unwrap_or(text.len())
        .min(start + query.window_chars);
    parse_segment(&text[start..floor_boundary(text, end)])
}

fn floor_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
