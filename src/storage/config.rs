//! Configuration file loading and management.
//!
//! Loads configuration from `<config dir>/config.toml` (see [`AppPaths`]).
//!
//! ## Precedence
//!
//! Settings are resolved with the following precedence (highest first):
//! 1. CLI flags
//! 2. Environment variables
//! 3. Config file
//! 4. Built-in defaults
//!
//! ## Environment Variables
//!
//! - `USAGEWATCH_CONFIG`: Override config file path
//! - `USAGEWATCH_INTERVAL`: Polling interval in seconds
//! - `USAGEWATCH_WEBDRIVER_URL`: WebDriver server endpoint
//! - `USAGEWATCH_TIMEOUT`: Hard timeout for a single browser call, in seconds
//! - `USAGEWATCH_HEADLESS`: Run the browser headless (1, true, yes)

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::cli::args::Cli;
use crate::core::extract::SelectorTier;
use crate::core::models::CapId;
use crate::error::{Result, WatchError};

// =============================================================================
// Environment Variable Names
// =============================================================================

pub const ENV_CONFIG: &str = "USAGEWATCH_CONFIG";
pub const ENV_INTERVAL: &str = "USAGEWATCH_INTERVAL";
pub const ENV_WEBDRIVER_URL: &str = "USAGEWATCH_WEBDRIVER_URL";
pub const ENV_TIMEOUT: &str = "USAGEWATCH_TIMEOUT";
pub const ENV_HEADLESS: &str = "USAGEWATCH_HEADLESS";

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_WEBDRIVER_URL: &str = "http://localhost:9515";
pub const DEFAULT_USAGE_URL: &str = "https://claude.ai/settings/usage";
pub const DEFAULT_LOGIN_URL: &str = "https://claude.ai/login";

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Fully resolved configuration after merging CLI, env vars, and config file.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// File configuration (defaults filled in).
    pub file: Config,
    /// Where the file configuration was read from.
    pub config_path: PathBuf,
    pub poll_interval: Duration,
    pub driver_timeout: Duration,
    pub webdriver_url: String,
    pub headless: bool,
    /// Source of each resolved setting for debugging.
    pub sources: ConfigSources,
}

/// Tracks the source of each resolved value.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub poll_interval: ConfigSource,
    pub driver_timeout: ConfigSource,
    pub webdriver_url: ConfigSource,
    pub headless: ConfigSource,
}

/// Where a configuration value came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Value from CLI flag.
    Cli,
    /// Value from environment variable.
    Env,
    /// Value from config file.
    ConfigFile,
    /// Built-in default.
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI flag"),
            Self::Env => write!(f, "environment variable"),
            Self::ConfigFile => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

impl ResolvedConfig {
    /// Resolve configuration for a command.
    ///
    /// `interval` is the command-level polling interval flag, if any.
    pub fn resolve(cli: &Cli, interval: Option<u64>, paths: &AppPaths) -> Result<Self> {
        let config_path = cli
            .config
            .clone()
            .or_else(|| env_value(ENV_CONFIG).map(PathBuf::from))
            .unwrap_or_else(|| paths.config_file());
        let file = Config::load_from(&config_path)?;
        Self::from_parts(file, config_path, cli, interval)
    }

    /// Resolve against an already loaded file configuration.
    pub fn from_parts(
        file: Config,
        config_path: PathBuf,
        cli: &Cli,
        interval: Option<u64>,
    ) -> Result<Self> {
        file.validate()?;
        let mut sources = ConfigSources::default();

        let poll_secs = resolve_u64(
            interval,
            ENV_INTERVAL,
            file.general.poll_interval_seconds,
            DEFAULT_POLL_INTERVAL_SECS,
            &mut sources.poll_interval,
        )?;
        validate_range("general.poll_interval_seconds", poll_secs, 10, 86_400)?;

        let timeout_secs = resolve_u64(
            cli.timeout,
            ENV_TIMEOUT,
            file.browser.driver_timeout_seconds,
            BrowserConfig::default().driver_timeout_seconds,
            &mut sources.driver_timeout,
        )?;
        validate_range("browser.driver_timeout_seconds", timeout_secs, 1, 300)?;

        let webdriver_url = if let Some(url) = &cli.webdriver_url {
            sources.webdriver_url = ConfigSource::Cli;
            url.clone()
        } else if let Some(url) = env_value(ENV_WEBDRIVER_URL) {
            sources.webdriver_url = ConfigSource::Env;
            url
        } else {
            sources.webdriver_url =
                source_of(file.browser.webdriver_url.as_str(), DEFAULT_WEBDRIVER_URL);
            file.browser.webdriver_url.clone()
        };
        validate_url("browser.webdriver_url", &webdriver_url)?;

        let headless = if cli.headless {
            sources.headless = ConfigSource::Cli;
            true
        } else if let Some(value) = env_value(ENV_HEADLESS) {
            sources.headless = ConfigSource::Env;
            is_truthy(&value)
        } else {
            sources.headless = source_of(&file.browser.headless, &false);
            file.browser.headless
        };

        Ok(Self {
            file,
            config_path,
            poll_interval: Duration::from_secs(poll_secs),
            driver_timeout: Duration::from_secs(timeout_secs),
            webdriver_url,
            headless,
            sources,
        })
    }
}

fn env_value(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn source_of<T: PartialEq + ?Sized>(file_value: &T, default: &T) -> ConfigSource {
    if file_value == default {
        ConfigSource::Default
    } else {
        ConfigSource::ConfigFile
    }
}

fn resolve_u64(
    cli: Option<u64>,
    env_var: &str,
    file_value: u64,
    default: u64,
    source: &mut ConfigSource,
) -> Result<u64> {
    if let Some(value) = cli {
        *source = ConfigSource::Cli;
        return Ok(value);
    }
    if let Some(raw) = env_value(env_var) {
        *source = ConfigSource::Env;
        return raw.parse::<u64>().map_err(|_| WatchError::ConfigInvalid {
            key: env_var.to_string(),
            value: raw.clone(),
            message: "expected a whole number of seconds".to_string(),
        });
    }
    *source = source_of(&file_value, &default);
    Ok(file_value)
}

fn validate_range(key: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if value < min || value > max {
        return Err(WatchError::ConfigInvalid {
            key: key.to_string(),
            value: value.to_string(),
            message: format!("must be between {min} and {max}"),
        });
    }
    Ok(())
}

fn validate_url(key: &str, value: &str) -> Result<()> {
    match reqwest::Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        Ok(_) => Err(WatchError::ConfigInvalid {
            key: key.to_string(),
            value: value.to_string(),
            message: "must be an http(s) URL".to_string(),
        }),
        Err(e) => Err(WatchError::ConfigInvalid {
            key: key.to_string(),
            value: value.to_string(),
            message: e.to_string(),
        }),
    }
}

// =============================================================================
// File Configuration
// =============================================================================

/// Application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub browser: BrowserConfig,
    pub session: SessionConfig,
    pub retry: RetryConfig,
    pub extraction: ExtractionConfig,
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Seconds between scheduled cycles.
    pub poll_interval_seconds: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// W3C WebDriver server (chromedriver, geckodriver, ...).
    pub webdriver_url: String,
    pub browser_name: String,
    pub headless: bool,
    /// Hard timeout for any single browser call.
    pub driver_timeout_seconds: u64,
    /// How long to wait for `document.readyState == "complete"`.
    pub load_timeout_seconds: u64,
    /// How long to wait for an anti-bot interstitial to clear.
    pub challenge_timeout_seconds: u64,
    /// Persistent browser profile; defaults to the data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data_dir: Option<PathBuf>,
    /// Extra browser command-line arguments.
    pub args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: DEFAULT_WEBDRIVER_URL.to_string(),
            browser_name: "chrome".to_string(),
            headless: false,
            driver_timeout_seconds: 30,
            load_timeout_seconds: 30,
            challenge_timeout_seconds: 60,
            user_data_dir: None,
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub usage_url: String,
    pub login_url: String,
    pub validity_days: i64,
    /// Upper bound for a manual login.
    pub login_timeout_seconds: u64,
    /// URL fragments that mean "this is a login page".
    pub login_url_markers: Vec<String>,
    /// Visible text that means "this is a login page".
    pub login_text_markers: Vec<String>,
    /// Visible text of anti-bot interstitials.
    pub challenge_markers: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            usage_url: DEFAULT_USAGE_URL.to_string(),
            login_url: DEFAULT_LOGIN_URL.to_string(),
            validity_days: 7,
            login_timeout_seconds: 300,
            login_url_markers: vec![
                "/login".to_string(),
                "/signin".to_string(),
                "/sign-in".to_string(),
                "/oauth".to_string(),
            ],
            login_text_markers: vec![
                "Continue with Google".to_string(),
                "Continue with email".to_string(),
                "Log in to continue".to_string(),
            ],
            challenge_markers: vec![
                "Just a moment".to_string(),
                "Checking your browser".to_string(),
                "Please enable JavaScript".to_string(),
                "Verify you are human".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Random extra delay as a fraction of the computed delay.
    pub jitter_ratio: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 60_000,
            jitter_ratio: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Characters of page text searched after a cap's label.
    pub text_window_chars: usize,
    /// Per-cap overrides keyed by cap name (`short_window`, `weekly`, `opus`, ...).
    pub caps: BTreeMap<String, CapOverride>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            text_window_chars: 600,
            caps: BTreeMap::new(),
        }
    }
}

/// Replaces parts of a cap's built-in extraction profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary: Option<SelectorTier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_based: Option<SelectorTier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<SelectorTier>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,
    pub retention_days: i64,
    pub max_rows: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            retention_days: crate::storage::history::DEFAULT_RETENTION_DAYS,
            max_rows: crate::storage::history::DEFAULT_MAX_ROWS,
        }
    }
}

impl Config {
    /// Load configuration from the default config file path.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().config_file())
    }

    /// Load configuration from a specific path; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(?path, "Config file not found, using defaults");
            return Ok(Self::default());
        }

        tracing::debug!(?path, "Loading config file");
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| WatchError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| WatchError::Config(format!("Failed to serialize config: {e}")))?;
        super::cache::write_atomic(path, content.as_bytes(), true)?;
        tracing::debug!(?path, "Config file saved");
        Ok(())
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        validate_range(
            "browser.load_timeout_seconds",
            self.browser.load_timeout_seconds,
            1,
            300,
        )?;
        validate_range(
            "browser.challenge_timeout_seconds",
            self.browser.challenge_timeout_seconds,
            0,
            600,
        )?;
        validate_range(
            "session.login_timeout_seconds",
            self.session.login_timeout_seconds,
            10,
            3_600,
        )?;
        validate_url("session.usage_url", &self.session.usage_url)?;
        validate_url("session.login_url", &self.session.login_url)?;

        if self.session.validity_days < 1 {
            return Err(WatchError::ConfigInvalid {
                key: "session.validity_days".to_string(),
                value: self.session.validity_days.to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        validate_range("retry.max_attempts", u64::from(self.retry.max_attempts), 1, 10)?;
        if self.retry.base_delay_ms == 0 || self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(WatchError::ConfigInvalid {
                key: "retry.max_delay_ms".to_string(),
                value: self.retry.max_delay_ms.to_string(),
                message: "base delay must be positive and not exceed the max delay".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_ratio) {
            return Err(WatchError::ConfigInvalid {
                key: "retry.jitter_ratio".to_string(),
                value: self.retry.jitter_ratio.to_string(),
                message: "must be between 0 and 1".to_string(),
            });
        }

        for name in self.extraction.caps.keys() {
            if CapId::from_name(name).is_none() {
                return Err(WatchError::ConfigInvalid {
                    key: format!("extraction.caps.{name}"),
                    value: name.clone(),
                    message: "unknown cap; expected short_window, long_window_all or long_window_restricted"
                        .to_string(),
                });
            }
        }

        if self.history.retention_days < 1 {
            return Err(WatchError::ConfigInvalid {
                key: "history.retention_days".to_string(),
                value: self.history.retention_days.to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
