//! Error types for usagewatch.
//!
//! Uses `thiserror` for structured error types that map to exit codes.
//!
//! ## Error Taxonomy
//!
//! Every error belongs to one of the canonical [`ErrorKind`]s consumed by the
//! display layer (`session_required`, `session_expired`, `navigation_failed`,
//! `extraction_failed`, `timeout`, `fatal`, `unknown`). Kinds drive retry
//! classification and the fixed explanation/remedy shown to the user.
//!
//! Errors are additionally grouped into categories for stable error codes
//! (e.g., `UW-A001`):
//! - **Authentication**: missing, expired or failed login sessions
//! - **Network**: navigation failures, anti-bot challenges, timeouts
//! - **Extraction**: the usage page loaded but could not be read
//! - **Driver**: the browser automation backend crashed or is unreachable
//! - **Configuration**: config file parsing or invalid values
//! - **Internal**: I/O, serialization and unclassified errors
//!
//! Terminal errors leave the crate as a [`ScrapeAttemptError`], a serializable
//! snapshot carrying the kind, the attempt count and sanitized diagnostics.

pub mod attempt;
pub mod suggestions;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use attempt::{Diagnostics, ScrapeAttemptError};
pub use suggestions::FixSuggestion;

// =============================================================================
// Error Kinds
// =============================================================================

/// Canonical error kinds with stable string identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SessionRequired,
    SessionExpired,
    NavigationFailed,
    ExtractionFailed,
    Timeout,
    Fatal,
    Unknown,
}

impl ErrorKind {
    pub const ALL: &'static [Self] = &[
        Self::SessionRequired,
        Self::SessionExpired,
        Self::NavigationFailed,
        Self::ExtractionFailed,
        Self::Timeout,
        Self::Fatal,
        Self::Unknown,
    ];

    /// Stable identifier used in events and JSON output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SessionRequired => "session_required",
            Self::SessionExpired => "session_expired",
            Self::NavigationFailed => "navigation_failed",
            Self::ExtractionFailed => "extraction_failed",
            Self::Timeout => "timeout",
            Self::Fatal => "fatal",
            Self::Unknown => "unknown",
        }
    }

    /// Fixed human-readable explanation for this kind.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::SessionRequired => "No saved login session exists.",
            Self::SessionExpired => "The saved login session is no longer accepted.",
            Self::NavigationFailed => "The usage page could not be loaded.",
            Self::ExtractionFailed => "The usage page loaded but no usage values could be read.",
            Self::Timeout => "The browser did not respond in time.",
            Self::Fatal => "The browser automation backend stopped working.",
            Self::Unknown => "An unexpected error occurred.",
        }
    }

    /// Suggested remedial action, where one applies.
    #[must_use]
    pub const fn remedy(self) -> Option<&'static str> {
        match self {
            Self::SessionRequired | Self::SessionExpired => {
                Some("Log in again with `usagewatch login`.")
            }
            Self::NavigationFailed => Some("Check your network connection and try again."),
            Self::ExtractionFailed => {
                Some("Wait a moment and refresh; the page layout may have changed.")
            }
            Self::Timeout => Some("Wait and retry, or raise the driver timeout with `--timeout`."),
            Self::Fatal => Some("Restart the WebDriver server and then restart polling."),
            Self::Unknown => None,
        }
    }

    /// Whether errors of this kind may be retried automatically.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::NavigationFailed | Self::ExtractionFailed | Self::Timeout
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Error Categories
// =============================================================================

/// High-level error categories used for error codes and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Missing, expired or failed login sessions.
    Authentication,
    /// Navigation, challenge and timeout issues.
    Network,
    /// Page loaded but could not be read.
    Extraction,
    /// Browser automation backend failures.
    Driver,
    /// Configuration issues (parse errors, invalid values).
    Configuration,
    /// Internal errors (I/O, serialization, unclassified).
    Internal,
}

impl ErrorCategory {
    /// Returns a human-readable description of the category.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Authentication => "Authentication error",
            Self::Network => "Network error",
            Self::Extraction => "Extraction error",
            Self::Driver => "Browser driver error",
            Self::Configuration => "Configuration error",
            Self::Internal => "Internal error",
        }
    }

    /// Returns a short code prefix for this category.
    #[must_use]
    pub const fn code_prefix(&self) -> &'static str {
        match self {
            Self::Authentication => "A",
            Self::Network => "N",
            Self::Extraction => "E",
            Self::Driver => "D",
            Self::Configuration => "C",
            Self::Internal => "X",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

// =============================================================================
// Exit Codes
// =============================================================================

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// Unexpected failure
    GeneralError = 1,
    /// No usable login session
    SessionRequired = 2,
    /// Extraction, parse or config errors
    ParseError = 3,
    /// Timeout
    Timeout = 4,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as Self
    }
}

impl ExitCode {
    /// Exit code for a surfaced scrape error.
    #[must_use]
    pub const fn for_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::SessionRequired | ErrorKind::SessionExpired => Self::SessionRequired,
            ErrorKind::ExtractionFailed => Self::ParseError,
            ErrorKind::Timeout => Self::Timeout,
            ErrorKind::NavigationFailed | ErrorKind::Fatal | ErrorKind::Unknown => {
                Self::GeneralError
            }
        }
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        Self::from(code as u8)
    }
}

/// Main error type for usagewatch operations.
#[derive(Error, Debug)]
pub enum WatchError {
    // ==========================================================================
    // Authentication errors (Category: Authentication)
    // ==========================================================================
    /// No credential has been saved yet.
    #[error("no login session; run `usagewatch login` first")]
    SessionRequired,

    /// The saved credential is too old or was rejected by the site.
    #[error("login session expired: {reason}")]
    SessionExpired { reason: String },

    /// Manual login finished but the browser still shows a login prompt.
    #[error("login failed: {reason}")]
    LoginFailed { reason: String },

    /// Nobody confirmed the manual login in time.
    #[error("login was not completed within {seconds}s")]
    LoginTimeout { seconds: u64 },

    // ==========================================================================
    // Network errors (Category: Network)
    // ==========================================================================
    /// Navigating to a page failed.
    #[error("navigation to {url} failed: {reason}")]
    NavigationFailed { url: String, reason: String },

    /// An anti-bot interstitial did not clear in time.
    #[error("anti-bot challenge on {url} did not clear within {seconds}s")]
    ChallengeNotCleared { url: String, seconds: u64 },

    /// A driver operation exceeded its hard timeout.
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    // ==========================================================================
    // Extraction errors (Category: Extraction)
    // ==========================================================================
    /// Zero usage caps could be read from the page.
    #[error("extraction failed: {reason}")]
    ExtractionFailed { reason: String },

    // ==========================================================================
    // Driver errors (Category: Driver)
    // ==========================================================================
    /// The browser crashed or the automation session vanished.
    #[error("browser driver crashed: {message}")]
    DriverCrashed { message: String },

    /// The WebDriver endpoint could not be reached.
    #[error("browser driver unavailable at {endpoint}: {message}")]
    DriverUnavailable { endpoint: String, message: String },

    // ==========================================================================
    // Configuration errors (Category: Configuration)
    // ==========================================================================
    /// Error parsing configuration file.
    #[error("config parse error at {path}: {message}")]
    ConfigParse { path: String, message: String },

    /// Invalid value in configuration.
    #[error("invalid config value for '{key}': {message}")]
    ConfigInvalid {
        key: String,
        value: String,
        message: String,
    },

    /// Generic configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    // ==========================================================================
    // Internal errors (Category: Internal)
    // ==========================================================================
    /// The operation was cancelled by stop or shutdown.
    #[error("operation cancelled")]
    Cancelled,

    /// The polling scheduler is no longer running.
    #[error("polling scheduler has shut down")]
    SchedulerClosed,

    /// Cycle history database error.
    #[error("history database error: {0}")]
    History(#[from] rusqlite::Error),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for other errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WatchError {
    /// Canonical kind consumed by the display layer.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::SessionRequired | Self::LoginFailed { .. } | Self::LoginTimeout { .. } => {
                ErrorKind::SessionRequired
            }
            Self::SessionExpired { .. } => ErrorKind::SessionExpired,
            Self::NavigationFailed { .. } | Self::ChallengeNotCleared { .. } => {
                ErrorKind::NavigationFailed
            }
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ExtractionFailed { .. } => ErrorKind::ExtractionFailed,
            Self::DriverCrashed { .. } | Self::DriverUnavailable { .. } => ErrorKind::Fatal,
            Self::ConfigParse { .. }
            | Self::ConfigInvalid { .. }
            | Self::Config(_)
            | Self::Cancelled
            | Self::SchedulerClosed
            | Self::History(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => ErrorKind::Unknown,
        }
    }

    /// Map error to process exit code.
    #[must_use]
    pub const fn exit_code(&self) -> ExitCode {
        match self {
            Self::SessionRequired
            | Self::SessionExpired { .. }
            | Self::LoginFailed { .. }
            | Self::LoginTimeout { .. } => ExitCode::SessionRequired,

            Self::ExtractionFailed { .. }
            | Self::ConfigParse { .. }
            | Self::ConfigInvalid { .. }
            | Self::Config(_)
            | Self::Json(_) => ExitCode::ParseError,

            Self::Timeout { .. } | Self::ChallengeNotCleared { .. } => ExitCode::Timeout,

            _ => ExitCode::GeneralError,
        }
    }

    /// Get the category for this error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::SessionRequired
            | Self::SessionExpired { .. }
            | Self::LoginFailed { .. }
            | Self::LoginTimeout { .. } => ErrorCategory::Authentication,

            Self::NavigationFailed { .. }
            | Self::ChallengeNotCleared { .. }
            | Self::Timeout { .. } => ErrorCategory::Network,

            Self::ExtractionFailed { .. } => ErrorCategory::Extraction,

            Self::DriverCrashed { .. } | Self::DriverUnavailable { .. } => ErrorCategory::Driver,

            Self::ConfigParse { .. } | Self::ConfigInvalid { .. } | Self::Config(_) => {
                ErrorCategory::Configuration
            }

            Self::Cancelled
            | Self::SchedulerClosed
            | Self::History(_)
            | Self::Io(_)
            | Self::Json(_)
            | Self::Other(_) => ErrorCategory::Internal,
        }
    }

    /// Get the stable error code for this error.
    ///
    /// Format: `UW-{category}{number}` (e.g., `UW-A001`).
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::SessionRequired => "UW-A001",
            Self::SessionExpired { .. } => "UW-A002",
            Self::LoginFailed { .. } => "UW-A003",
            Self::LoginTimeout { .. } => "UW-A004",

            Self::NavigationFailed { .. } => "UW-N001",
            Self::ChallengeNotCleared { .. } => "UW-N002",
            Self::Timeout { .. } => "UW-N003",

            Self::ExtractionFailed { .. } => "UW-E001",

            Self::DriverCrashed { .. } => "UW-D001",
            Self::DriverUnavailable { .. } => "UW-D002",

            Self::ConfigParse { .. } => "UW-C001",
            Self::ConfigInvalid { .. } => "UW-C002",
            Self::Config(_) => "UW-C003",

            Self::Cancelled => "UW-X001",
            Self::SchedulerClosed => "UW-X002",
            Self::History(_) => "UW-X003",
            Self::Io(_) => "UW-X004",
            Self::Json(_) => "UW-X005",
            Self::Other(_) => "UW-X999",
        }
    }

    /// Check if this error should be retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Get actionable fix suggestions for this error.
    #[must_use]
    pub fn fix_suggestions(&self) -> Vec<FixSuggestion> {
        match self {
            Self::SessionRequired => suggestions::session_required_suggestions(),
            Self::SessionExpired { reason } => suggestions::session_expired_suggestions(reason),
            Self::LoginFailed { reason } => suggestions::login_failed_suggestions(reason),
            Self::LoginTimeout { seconds } => suggestions::login_timeout_suggestions(*seconds),

            Self::NavigationFailed { url, reason } => {
                suggestions::navigation_failed_suggestions(url, reason)
            }
            Self::ChallengeNotCleared { url, seconds } => {
                suggestions::challenge_suggestions(url, *seconds)
            }
            Self::Timeout { operation, seconds } => {
                suggestions::timeout_suggestions(operation, *seconds)
            }

            Self::ExtractionFailed { reason } => suggestions::extraction_failed_suggestions(reason),

            Self::DriverCrashed { message } => suggestions::driver_crashed_suggestions(message),
            Self::DriverUnavailable { endpoint, .. } => {
                suggestions::driver_unavailable_suggestions(endpoint)
            }

            Self::ConfigParse { path, message } => {
                suggestions::config_parse_suggestions(path, message)
            }
            Self::ConfigInvalid {
                key,
                value,
                message,
            } => suggestions::config_invalid_suggestions(key, value, message),
            Self::Config(msg) => vec![FixSuggestion::new(
                vec!["usagewatch --help".to_string()],
                format!("Configuration error: {msg}"),
            )],

            Self::Cancelled | Self::SchedulerClosed => vec![FixSuggestion::new(
                vec!["usagewatch watch".to_string()],
                "Polling was stopped before the operation finished. Start it again to resume.",
            )],
            Self::History(err) => vec![
                FixSuggestion::new(
                    vec!["usagewatch history --prune".to_string()],
                    format!(
                        "The cycle history database reported an error: {err}. \
                         History is optional; polling keeps working without it."
                    ),
                )
                .with_prevention("Disable history in config with `[history] enabled = false`."),
            ],
            Self::Io(err) => vec![FixSuggestion::new(
                vec!["# Check file permissions and disk space".to_string()],
                format!("I/O error: {err}. Check file permissions and available disk space."),
            )],
            Self::Json(err) => vec![FixSuggestion::new(
                vec!["usagewatch status".to_string()],
                format!(
                    "JSON parsing error: {err}. A saved file may be corrupted; \
                     it will be rewritten on the next successful cycle."
                ),
            )],
            Self::Other(err) => vec![FixSuggestion::new(
                vec!["usagewatch --verbose poll".to_string()],
                format!("Unexpected error: {err}. Please report this issue."),
            )],
        }
    }
}

/// Result type alias for usagewatch operations.
pub type Result<T> = std::result::Result<T, WatchError>;

// =============================================================================
// Tests
// =============================================================================
