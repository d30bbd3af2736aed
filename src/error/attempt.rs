//! Terminal error snapshot published to the display layer.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ErrorKind, WatchError};

/// Longest value kept in a diagnostics entry.
const MAX_VALUE_LEN: usize = 200;

/// Key fragments whose values are never kept.
const SENSITIVE_KEYS: &[&str] = &[
    "cookie",
    "credential",
    "token",
    "password",
    "secret",
    "auth",
    "blob",
    "html",
    "page_text",
];

const REDACTED: &str = "[redacted]";

/// Sanitized key/value diagnostics attached to a surfaced error.
///
/// Values under credential-like keys are redacted, URLs lose their query string
/// and fragment, and everything is length-capped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics(BTreeMap<String, String>);

impl Diagnostics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value after sanitizing it.
    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        let key = key.into();
        let value = sanitize_value(&key, &value.to_string());
        self.0.insert(key, value);
    }

    /// Builder form of [`Diagnostics::insert`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.insert(key, value);
        self
    }

    /// Record a URL without query string or fragment.
    #[must_use]
    pub fn with_url(self, url: &str) -> Self {
        self.with("url", strip_url(url))
    }

    #[must_use]
    pub fn with_elapsed(self, elapsed: Duration) -> Self {
        self.with("elapsed_ms", elapsed.as_millis())
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn sanitize_value(key: &str, value: &str) -> String {
    let lower = key.to_ascii_lowercase();
    if SENSITIVE_KEYS.iter().any(|frag| lower.contains(frag)) {
        return REDACTED.to_string();
    }
    let value = if lower.contains("url") {
        strip_url(value)
    } else {
        value.to_string()
    };
    truncate(&value, MAX_VALUE_LEN)
}

/// Drop query string and fragment, which may carry tokens.
#[must_use]
pub fn strip_url(url: &str) -> String {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    url[..end].to_string()
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let mut out: String = value.chars().take(max).collect();
    out.push('…');
    out
}

/// A classified, terminal scrape error as seen by the display layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeAttemptError {
    pub kind: ErrorKind,
    /// Stable error code, e.g. `UW-N001`.
    pub code: String,
    pub message: String,
    /// Number of attempts made before giving up.
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Diagnostics::is_empty")]
    pub diagnostics: Diagnostics,
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remedy: Option<String>,
}

impl ScrapeAttemptError {
    #[must_use]
    pub fn from_error(error: &WatchError, attempt: u32, diagnostics: Diagnostics) -> Self {
        let kind = error.kind();
        Self {
            kind,
            code: error.error_code().to_string(),
            message: truncate(&error.to_string(), MAX_VALUE_LEN * 2),
            attempt,
            diagnostics,
            explanation: kind.description().to_string(),
            remedy: kind.remedy().map(str::to_string),
        }
    }

    /// Build an error that did not originate from a [`WatchError`].
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>, attempt: u32) -> Self {
        Self {
            kind,
            code: "UW-X999".to_string(),
            message: message.into(),
            attempt,
            diagnostics: Diagnostics::new(),
            explanation: kind.description().to_string(),
            remedy: kind.remedy().map(str::to_string),
        }
    }

    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self.kind, ErrorKind::Fatal)
    }
}

impl std::fmt::Display for ScrapeAttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} after {} attempt(s): {}",
            self.kind, self.attempt, self.message
        )
    }
}

impl std::error::Error for ScrapeAttemptError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_keys_are_redacted() {
        let diag = Diagnostics::new()
            .with("cookie_header", "sessionKey=abc")
            .with("auth_token", "xyz")
            .with("page_text", "Your usage is ...");
        assert_eq!(diag.get("cookie_header"), Some(REDACTED));
        assert_eq!(diag.get("auth_token"), Some(REDACTED));
        assert_eq!(diag.get("page_text"), Some(REDACTED));
    }

    #[test]
    fn urls_lose_query_and_fragment() {
        let diag = Diagnostics::new().with_url("https://example.com/usage?token=abc#frag");
        assert_eq!(diag.get("url"), Some("https://example.com/usage"));

        let diag = Diagnostics::new().with("redirect_url", "https://example.com/login?next=/x");
        assert_eq!(diag.get("redirect_url"), Some("https://example.com/login"));
    }

    #[test]
    fn long_values_are_truncated() {
        let diag = Diagnostics::new().with("note", "x".repeat(1000));
        assert_eq!(diag.get("note").unwrap().chars().count(), MAX_VALUE_LEN + 1);
    }

    #[test]
    fn from_error_carries_kind_and_remedy() {
        let err = WatchError::SessionExpired {
            reason: "redirected".into(),
        };
        let surfaced = ScrapeAttemptError::from_error(
            &err,
            1,
            Diagnostics::new().with_elapsed(Duration::from_millis(1500)),
        );
        assert_eq!(surfaced.kind, ErrorKind::SessionExpired);
        assert_eq!(surfaced.code, "UW-A002");
        assert_eq!(surfaced.diagnostics.get("elapsed_ms"), Some("1500"));
        assert!(surfaced.remedy.unwrap().contains("login"));
    }

    #[test]
    fn serializes_with_camel_case_and_kind_string() {
        let surfaced = ScrapeAttemptError::new(ErrorKind::Timeout, "slow", 3);
        let json = serde_json::to_value(&surfaced).unwrap();
        assert_eq!(json["kind"], "timeout");
        assert_eq!(json["attempt"], 3);
        assert!(json.get("diagnostics").is_none());
        assert!(json.get("explanation").is_some());
    }
}
