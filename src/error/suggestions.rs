//! Fix suggestion database for usagewatch errors.
//!
//! Provides actionable fix suggestions mapped to specific error types,
//! including commands, context explanations, and prevention tips.

use serde::Serialize;

// =============================================================================
// Fix Suggestion Types
// =============================================================================

/// A fix suggestion for an error.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixSuggestion {
    /// Fix commands in order of preference, copy-paste ready.
    pub commands: Vec<String>,

    /// Explanation of why this error occurred.
    pub context: String,

    /// Tips to prevent this error in the future.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prevention: Option<String>,

    /// Link to documentation for more information.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_url: Option<String>,

    /// Whether this can potentially be auto-fixed.
    pub auto_fixable: bool,
}

impl FixSuggestion {
    /// Creates a new fix suggestion with required fields.
    #[must_use]
    pub fn new(commands: Vec<String>, context: impl Into<String>) -> Self {
        Self {
            commands,
            context: context.into(),
            prevention: None,
            doc_url: None,
            auto_fixable: false,
        }
    }

    /// Builder: adds prevention tips.
    #[must_use]
    pub fn with_prevention(mut self, prevention: impl Into<String>) -> Self {
        self.prevention = Some(prevention.into());
        self
    }

    /// Builder: adds documentation URL.
    #[must_use]
    pub fn with_doc_url(mut self, url: impl Into<String>) -> Self {
        self.doc_url = Some(url.into());
        self
    }

    /// Builder: marks as auto-fixable.
    #[must_use]
    pub const fn auto_fixable(mut self) -> Self {
        self.auto_fixable = true;
        self
    }
}

const WEBDRIVER_DOC: &str = "https://www.w3.org/TR/webdriver2/";

// =============================================================================
// Suggestion Generators
// =============================================================================

/// Generates fix suggestions when no session has been saved.
#[must_use]
pub fn session_required_suggestions() -> Vec<FixSuggestion> {
    vec![
        FixSuggestion::new(
            vec!["usagewatch login".to_string()],
            "No saved login session was found. Usage can only be read from an \
             authenticated browser session, which is created by logging in manually once.",
        )
        .with_prevention("Sessions stay valid for 7 days; log in again when prompted."),
    ]
}

/// Generates fix suggestions for expired sessions.
#[must_use]
pub fn session_expired_suggestions(reason: &str) -> Vec<FixSuggestion> {
    vec![
        FixSuggestion::new(
            vec![
                "usagewatch login".to_string(),
                "usagewatch check-session".to_string(),
            ],
            format!(
                "The saved login session can no longer be used ({reason}). \
                 Sessions expire after 7 days or when the site redirects to its login page."
            ),
        )
        .with_prevention(
            "Run `usagewatch check-session` periodically to see how old the session is.",
        ),
    ]
}

/// Generates fix suggestions when manual login did not succeed.
#[must_use]
pub fn login_failed_suggestions(reason: &str) -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        vec!["usagewatch login".to_string()],
        format!(
            "The browser still showed a login prompt after you confirmed ({reason}). \
             Finish signing in inside the browser window before pressing Enter."
        ),
    )]
}

/// Generates fix suggestions when manual login was never confirmed.
#[must_use]
pub fn login_timeout_suggestions(seconds: u64) -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        vec![format!("usagewatch login --timeout {}", seconds * 2)],
        format!(
            "Login was not confirmed within {seconds}s. The login window is closed \
             automatically so polling can resume."
        ),
    )]
}

/// Generates fix suggestions for navigation failures.
#[must_use]
pub fn navigation_failed_suggestions(url: &str, reason: &str) -> Vec<FixSuggestion> {
    vec![
        FixSuggestion::new(
            vec![
                "usagewatch poll".to_string(),
                format!("curl -sI {url}"),
            ],
            format!(
                "The browser could not open {url}: {reason}. This is usually a network \
                 problem or a temporary outage of the site."
            ),
        )
        .with_prevention("Transient navigation failures are retried automatically."),
    ]
}

/// Generates fix suggestions for anti-bot challenges that never cleared.
#[must_use]
pub fn challenge_suggestions(url: &str, seconds: u64) -> Vec<FixSuggestion> {
    vec![
        FixSuggestion::new(
            vec!["usagewatch poll".to_string()],
            format!(
                "{url} kept showing a browser verification page for {seconds}s. \
                 Headless browsers are challenged more often."
            ),
        )
        .with_prevention(
            "Run without `--headless` and with a persistent profile (`browser.user_data_dir`).",
        ),
    ]
}

/// Generates fix suggestions for timeout errors.
#[must_use]
pub fn timeout_suggestions(operation: &str, seconds: u64) -> Vec<FixSuggestion> {
    vec![
        FixSuggestion::new(
            vec![
                format!("usagewatch --timeout {} poll", seconds * 2),
                "usagewatch poll".to_string(),
            ],
            format!(
                "The browser did not finish `{operation}` within {seconds}s. The page may be \
                 slow to load or the WebDriver server may be overloaded."
            ),
        )
        .with_prevention("Increase `browser.driver_timeout_seconds` in the config file."),
    ]
}

/// Generates fix suggestions when no usage values were found.
#[must_use]
pub fn extraction_failed_suggestions(reason: &str) -> Vec<FixSuggestion> {
    vec![
        FixSuggestion::new(
            vec![
                "usagewatch --verbose poll".to_string(),
                "usagewatch status".to_string(),
            ],
            format!(
                "The usage page loaded but none of the usage caps could be read ({reason}). \
                 The page layout may have changed."
            ),
        )
        .with_prevention(
            "Override selectors per cap in the `[extraction.caps]` config section.",
        ),
    ]
}

/// Generates fix suggestions for a crashed browser.
#[must_use]
pub fn driver_crashed_suggestions(message: &str) -> Vec<FixSuggestion> {
    vec![
        FixSuggestion::new(
            vec!["chromedriver --port=9515".to_string(), "usagewatch watch".to_string()],
            format!(
                "The browser automation session ended unexpectedly: {message}. \
                 Polling has been stopped."
            ),
        )
        .with_doc_url(WEBDRIVER_DOC),
    ]
}

/// Generates fix suggestions when the WebDriver server is unreachable.
#[must_use]
pub fn driver_unavailable_suggestions(endpoint: &str) -> Vec<FixSuggestion> {
    vec![
        FixSuggestion::new(
            vec![
                "chromedriver --port=9515".to_string(),
                format!("usagewatch --webdriver-url {endpoint} poll"),
            ],
            format!("No WebDriver server answered at {endpoint}."),
        )
        .with_prevention("Start the WebDriver server before starting usagewatch.")
        .with_doc_url(WEBDRIVER_DOC)
        .auto_fixable(),
    ]
}

/// Generates fix suggestions for config parse errors.
#[must_use]
pub fn config_parse_suggestions(path: &str, message: &str) -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        vec![format!("$EDITOR {path}")],
        format!("The config file at {path} is not valid TOML: {message}"),
    )]
}

/// Generates fix suggestions for invalid config values.
#[must_use]
pub fn config_invalid_suggestions(key: &str, value: &str, message: &str) -> Vec<FixSuggestion> {
    vec![FixSuggestion::new(
        vec![format!("# Fix '{key}' in your config file")],
        format!("Invalid value '{value}' for '{key}': {message}"),
    )]
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fix_suggestion_builder() {
        let suggestion = FixSuggestion::new(vec!["cmd1".to_string()], "Test context")
            .with_prevention("Prevent tip")
            .with_doc_url("https://example.com")
            .auto_fixable();

        assert_eq!(suggestion.commands, vec!["cmd1"]);
        assert_eq!(suggestion.context, "Test context");
        assert_eq!(suggestion.prevention, Some("Prevent tip".to_string()));
        assert_eq!(suggestion.doc_url, Some("https://example.com".to_string()));
        assert!(suggestion.auto_fixable);
    }

    #[test]
    fn session_suggestions_point_to_login() {
        for suggestions in [
            session_required_suggestions(),
            session_expired_suggestions("too old"),
        ] {
            assert!(suggestions[0].commands.iter().any(|c| c == "usagewatch login"));
        }
    }

    #[test]
    fn navigation_suggestions_include_url() {
        let suggestions = navigation_failed_suggestions("https://example.com/usage", "dns");
        assert!(suggestions[0].context.contains("https://example.com/usage"));
        assert!(suggestions[0].context.contains("dns"));
    }

    #[test]
    fn driver_unavailable_is_auto_fixable() {
        let suggestions = driver_unavailable_suggestions("http://localhost:9515");
        assert!(suggestions[0].auto_fixable);
        assert!(suggestions[0].doc_url.is_some());
    }

    #[test]
    fn login_timeout_doubles_timeout() {
        let suggestions = login_timeout_suggestions(120);
        assert_eq!(suggestions[0].commands[0], "usagewatch login --timeout 240");
    }
}
