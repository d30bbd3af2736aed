//! Last-known-good payload cache and atomic file helpers.
//!
//! # Features
//! - Atomic writes using temp file + rename (a concurrent reader never sees
//!   a half-written file)
//! - Staleness levels for rendering a cached payload after restart
//! - Graceful degradation on missing/corrupt cache

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};

use crate::core::models::CyclePayload;
use crate::error::Result;

/// Staleness thresholds for cached payloads.
pub const STALENESS_FRESH_SECS: u64 = 600; // 10 minutes
pub const STALENESS_STALE_SECS: u64 = 3600; // 1 hour

/// Cache staleness level for display purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    /// Recent enough to show as-is.
    Fresh,
    /// Somewhat stale - display with "~" prefix.
    Stale,
    /// Very stale - display with "?" prefix.
    VeryStale,
    /// Nothing cached.
    Missing,
}

impl Staleness {
    /// Get the display prefix for this staleness level.
    #[must_use]
    pub const fn prefix(&self) -> &'static str {
        match self {
            Self::Fresh => "",
            Self::Stale => "~",
            Self::VeryStale => "?",
            Self::Missing => "-",
        }
    }

    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Stale => "stale",
            Self::VeryStale => "very stale",
            Self::Missing => "missing",
        }
    }

    /// Determine staleness from age in seconds.
    #[must_use]
    pub const fn from_age_secs(age_secs: u64) -> Self {
        if age_secs < STALENESS_FRESH_SECS {
            Self::Fresh
        } else if age_secs < STALENESS_STALE_SECS {
            Self::Stale
        } else {
            Self::VeryStale
        }
    }

    /// Staleness of data captured at `captured_at`.
    #[must_use]
    pub fn since(captured_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let age = (now - captured_at).num_seconds().max(0);
        Self::from_age_secs(age.unsigned_abs())
    }
}

/// Read and parse a JSON file.
pub fn read<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Write JSON atomically, creating the parent directory.
pub fn write<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_vec_pretty(data)?;
    write_atomic(path, &content, false)?;
    Ok(())
}

/// Write bytes atomically using temp file + rename.
///
/// With `private` set, the file is readable by the owner only (Unix).
pub(crate) fn write_atomic(path: &Path, content: &[u8], private: bool) -> std::io::Result<()> {
    // Temp file must live in the same directory for rename to be atomic
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let temp_path = parent.join(format!(
        ".{}.tmp.{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("data"),
        std::process::id()
    ));

    {
        let mut file = std::fs::File::create(&temp_path)?;
        #[cfg(unix)]
        if private {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        #[cfg(not(unix))]
        let _ = private;
        file.write_all(content)?;
        file.sync_all()?;
    }

    if let Err(err) = std::fs::rename(&temp_path, path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(err);
    }
    Ok(())
}

/// Persisted copy of the last non-error cycle payload.
#[derive(Debug, Clone)]
pub struct LastGoodCache {
    path: PathBuf,
}

impl LastGoodCache {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached payload; missing or corrupt files yield `None`.
    #[must_use]
    pub fn load(&self) -> Option<CyclePayload> {
        if !self.path.exists() {
            return None;
        }
        match read::<CyclePayload>(&self.path) {
            Ok(payload) => Some(payload),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "Ignoring unreadable last-good cache");
                None
            }
        }
    }

    /// Load together with its staleness relative to `now`.
    #[must_use]
    pub fn load_with_staleness(&self, now: DateTime<Utc>) -> (Option<CyclePayload>, Staleness) {
        self.load().map_or((None, Staleness::Missing), |payload| {
            let staleness = Staleness::since(payload.scraped_at, now);
            (Some(payload), staleness)
        })
    }

    /// Replace the cached payload. Error payloads are never stored.
    ///
    /// Returns whether the payload was written.
    pub fn store(&self, payload: &CyclePayload) -> Result<bool> {
        if payload.is_error() {
            tracing::debug!("Not caching error payload");
            return Ok(false);
        }
        write(&self.path, payload)?;
        Ok(true)
    }
}
