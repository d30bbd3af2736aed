//! Diagnostic logging setup.
//!
//! Logs always go to stderr (or a file) so stdout stays reserved for usage
//! output. Level and format come from CLI flags, then `USAGEWATCH_LOG` /
//! `USAGEWATCH_LOG_FORMAT`; `RUST_LOG` overrides the filter entirely.

use std::fs::OpenOptions;
use std::path::PathBuf;

use tracing::Level;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

pub const LOG_LEVEL_ENV: &str = "USAGEWATCH_LOG";
pub const LOG_FORMAT_ENV: &str = "USAGEWATCH_LOG_FORMAT";
pub const LOG_FILE_ENV: &str = "USAGEWATCH_LOG_FILE";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Human,
    /// One JSON object per event.
    Json,
    Compact,
}

impl LogFormat {
    #[must_use]
    pub fn from_arg(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "human" | "pretty" => Some(Self::Human),
            "json" | "jsonl" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    #[default]
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn from_arg(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "verbose" | "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" | "critical" => Some(Self::Error),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_filter(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub const fn as_tracing_level(self) -> Level {
        match self {
            Self::Trace => Level::TRACE,
            Self::Debug => Level::DEBUG,
            Self::Info => Level::INFO,
            Self::Warn => Level::WARN,
            Self::Error => Level::ERROR,
        }
    }

    /// One step more verbose, saturating at trace.
    #[must_use]
    pub const fn louder(self) -> Self {
        match self {
            Self::Error => Self::Warn,
            Self::Warn => Self::Info,
            Self::Info => Self::Debug,
            Self::Debug | Self::Trace => Self::Trace,
        }
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Fully resolved logging settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings {
    pub level: LogLevel,
    pub format: LogFormat,
    pub file: Option<PathBuf>,
}

impl LogSettings {
    /// Merge CLI flags over environment variables over defaults.
    ///
    /// `verbose` raises the level by one step per occurrence.
    #[must_use]
    pub fn resolve(cli_level: Option<&str>, json_output: bool, verbose: u8) -> Self {
        let base = cli_level
            .and_then(LogLevel::from_arg)
            .or_else(|| env_value(LOG_LEVEL_ENV).as_deref().and_then(LogLevel::from_arg))
            .unwrap_or_default();
        let level = (0..verbose).fold(base, |level, _| level.louder());

        let format = if json_output {
            LogFormat::Json
        } else {
            env_value(LOG_FORMAT_ENV)
                .as_deref()
                .and_then(LogFormat::from_arg)
                .unwrap_or_default()
        };

        Self {
            level,
            format,
            file: env_value(LOG_FILE_ENV).map(PathBuf::from),
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("usagewatch={}", self.level.as_filter())))
    }

    fn writer(&self) -> BoxMakeWriter {
        let file = self.file.as_ref().and_then(|path| {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => Some(file),
                Err(e) => {
                    eprintln!("usagewatch: cannot open log file {}: {e}", path.display());
                    None
                }
            }
        });
        match file {
            Some(file) => BoxMakeWriter::new(std::sync::Mutex::new(file)),
            None => BoxMakeWriter::new(std::io::stderr),
        }
    }

    /// Install the global subscriber. A second call is a no-op.
    pub fn init(&self) {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(self.filter())
            .with_writer(self.writer());

        let installed = match self.format {
            LogFormat::Json => builder
                .json()
                .with_current_span(true)
                .with_span_events(FmtSpan::CLOSE)
                .try_init(),
            LogFormat::Compact => builder.compact().with_target(true).try_init(),
            LogFormat::Human => builder.with_target(false).try_init(),
        };
        if installed.is_ok() {
            tracing::debug!(level = self.level.as_filter(), format = ?self.format, "Logging initialised");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[allow(unsafe_code)]
    fn with_env_var(key: &str, value: &str, f: impl FnOnce()) {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let prior = std::env::var(key).ok();
        unsafe {
            std::env::set_var(key, value);
        }
        f();
        match prior {
            Some(val) => unsafe {
                std::env::set_var(key, val);
            },
            None => unsafe {
                std::env::remove_var(key);
            },
        }
    }

    #[test]
    fn cli_level_beats_env() {
        with_env_var(LOG_LEVEL_ENV, "trace", || {
            assert_eq!(LogSettings::resolve(Some("error"), false, 0).level, LogLevel::Error);
            assert_eq!(LogSettings::resolve(None, false, 0).level, LogLevel::Trace);
        });
    }

    #[test]
    fn verbose_steps_up() {
        let _guard = ENV_LOCK.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        assert_eq!(LogSettings::resolve(Some("warn"), false, 1).level, LogLevel::Info);
        assert_eq!(LogSettings::resolve(Some("warn"), false, 5).level, LogLevel::Trace);
    }

    #[test]
    fn json_flag_forces_json() {
        with_env_var(LOG_FORMAT_ENV, "compact", || {
            assert_eq!(LogSettings::resolve(None, true, 0).format, LogFormat::Json);
            assert_eq!(LogSettings::resolve(None, false, 0).format, LogFormat::Compact);
        });
    }

    #[test]
    fn parses_aliases() {
        assert_eq!(LogLevel::from_arg("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_arg("nope"), None);
        assert_eq!(LogFormat::from_arg("jsonl"), Some(LogFormat::Json));
    }
}
