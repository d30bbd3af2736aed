//! Browser automation capability.
//!
//! The orchestrator never talks to a browser directly; it goes through these
//! two traits. [`BrowserDriver`] is owned by the session controller alone and
//! [`PageHandle`] is lent to the extraction pipeline for the duration of one
//! extraction. Methods return boxed futures so both traits stay object safe.

use std::path::PathBuf;
use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::error::WatchError;

/// Failure reported by a browser driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The browser process or automation session is gone.
    #[error("browser session crashed: {0}")]
    Crashed(String),

    /// The driver endpoint cannot be reached.
    #[error("driver endpoint unreachable at {endpoint}: {message}")]
    Disconnected { endpoint: String, message: String },

    /// A method was called before `open`.
    #[error("browser is not open")]
    NotOpen,

    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    /// A DOM script or query failed.
    #[error("script error: {0}")]
    Script(String),

    /// The driver answered with something unexpected.
    #[error("driver protocol error: {0}")]
    Protocol(String),

    /// The driver itself gave up waiting.
    #[error("driver wait timed out: {0}")]
    Timeout(String),
}

impl DriverError {
    /// Whether the browser can no longer be used at all.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Crashed(_) | Self::Disconnected { .. } | Self::NotOpen
        )
    }
}

impl From<DriverError> for WatchError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Crashed(message) => Self::DriverCrashed { message },
            DriverError::NotOpen => Self::DriverCrashed {
                message: "browser is not open".to_string(),
            },
            DriverError::Disconnected { endpoint, message } => {
                Self::DriverUnavailable { endpoint, message }
            }
            DriverError::Navigation { url, message } => Self::NavigationFailed {
                url,
                reason: message,
            },
            DriverError::Timeout(operation) => Self::Timeout {
                operation,
                seconds: 0,
            },
            DriverError::Script(message) | DriverError::Protocol(message) => {
                Self::NavigationFailed {
                    url: String::new(),
                    reason: message,
                }
            }
        }
    }
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

/// How to start the browser.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    pub headless: bool,
    /// Persistent profile directory, keeps anti-bot state between runs.
    pub user_data_dir: Option<PathBuf>,
    pub args: Vec<String>,
}

/// Read-only view of the currently loaded page.
pub trait PageHandle: Send {
    fn current_url(&mut self) -> BoxFuture<'_, DriverResult<String>>;

    /// Trimmed text of the first element matching `selector`.
    fn query_text<'a>(
        &'a mut self,
        selector: &'a str,
    ) -> BoxFuture<'a, DriverResult<Option<String>>>;

    /// Attribute value of the first element matching `selector`.
    fn query_attribute<'a>(
        &'a mut self,
        selector: &'a str,
        attribute: &'a str,
    ) -> BoxFuture<'a, DriverResult<Option<String>>>;

    /// Rendered text of the whole page.
    fn visible_text(&mut self) -> BoxFuture<'_, DriverResult<String>>;
}

/// A controllable browser instance.
pub trait BrowserDriver: Send {
    fn open<'a>(&'a mut self, options: &'a LaunchOptions) -> BoxFuture<'a, DriverResult<()>>;

    fn is_open(&self) -> bool;

    fn navigate<'a>(&'a mut self, url: &'a str) -> BoxFuture<'a, DriverResult<()>>;

    /// Wait until the document reports it has finished loading.
    fn wait_for_load(&mut self, timeout: Duration) -> BoxFuture<'_, DriverResult<()>>;

    /// Serialize the browser's authentication state (cookies).
    fn export_credentials(&mut self) -> BoxFuture<'_, DriverResult<Vec<u8>>>;

    /// Restore a blob produced by `export_credentials` into the current origin.
    fn import_credentials<'a>(&'a mut self, blob: &'a [u8]) -> BoxFuture<'a, DriverResult<()>>;

    fn close(&mut self) -> BoxFuture<'_, DriverResult<()>>;

    fn page(&mut self) -> &mut dyn PageHandle;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn fatal_driver_errors() {
        assert!(DriverError::Crashed("x".into()).is_fatal());
        assert!(DriverError::NotOpen.is_fatal());
        assert!(
            DriverError::Disconnected {
                endpoint: "e".into(),
                message: "m".into()
            }
            .is_fatal()
        );
        assert!(!DriverError::Script("x".into()).is_fatal());
        assert!(!DriverError::Timeout("load".into()).is_fatal());
    }

    #[test]
    fn conversion_keeps_kind() {
        let kind = |e: DriverError| WatchError::from(e).kind();
        assert_eq!(kind(DriverError::Crashed("x".into())), ErrorKind::Fatal);
        assert_eq!(
            kind(DriverError::Navigation {
                url: "u".into(),
                message: "m".into()
            }),
            ErrorKind::NavigationFailed
        );
        assert_eq!(kind(DriverError::Timeout("load".into())), ErrorKind::Timeout);
        assert_eq!(kind(DriverError::Script("x".into())), ErrorKind::NavigationFailed);
    }
}
