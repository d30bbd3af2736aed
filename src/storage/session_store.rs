//! Persisted login session.
//!
//! The credential blob is written with temp-file-then-rename semantics so a
//! concurrent `load` sees either the old or the new file, never a torn one.
//! Invalidation is logical: the file is rewritten with an `invalidatedAt`
//! marker and is only replaced by the next manual login.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};

use crate::core::models::SessionCredential;
use crate::error::Result;
use crate::storage::cache;

/// Default validity window for a saved session.
pub const DEFAULT_VALIDITY_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
    validity: Duration,
}

impl SessionStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            validity: Duration::days(DEFAULT_VALIDITY_DAYS),
        }
    }

    #[must_use]
    pub const fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub const fn validity(&self) -> Duration {
        self.validity
    }

    /// Atomically persist the credential (owner-only permissions).
    pub fn save(&self, credential: &SessionCredential) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_vec_pretty(credential)?;
        cache::write_atomic(&self.path, &content, true)?;
        tracing::info!(
            fingerprint = %credential.fingerprint(),
            path = %self.path.display(),
            "Saved session credential"
        );
        Ok(())
    }

    /// Load the saved credential, `None` when nothing was ever saved.
    pub fn load(&self) -> Result<Option<SessionCredential>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// True once `now - saved_at` exceeds the validity window.
    #[must_use]
    pub fn is_expired(&self, credential: &SessionCredential, now: DateTime<Utc>) -> bool {
        credential.is_older_than(self.validity, now)
    }

    /// Whether a credential can be used right now.
    #[must_use]
    pub fn is_usable(&self, credential: &SessionCredential, now: DateTime<Utc>) -> bool {
        !credential.is_invalidated() && !self.is_expired(credential, now)
    }

    /// Mark the saved credential unusable without deleting it.
    ///
    /// Returns `false` when there was nothing to invalidate.
    pub fn invalidate(&self, reason: &str, now: DateTime<Utc>) -> Result<bool> {
        let Some(mut credential) = self.load()? else {
            return Ok(false);
        };
        if credential.is_invalidated() {
            return Ok(true);
        }
        credential.invalidated_at = Some(now);
        credential.invalidation_reason = Some(reason.to_string());
        self.save(&credential)?;
        tracing::warn!(reason, "Session credential invalidated");
        Ok(true)
    }

    /// Remove the credential entirely.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> SessionStore {
        SessionStore::new(dir.path().join("session.json"))
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let cred = SessionCredential::new(b"cookies".to_vec(), Utc::now());

        store.save(&cred).unwrap();
        assert_eq!(store.load().unwrap(), Some(cred));
    }

    #[test]
    fn load_missing_is_none() {
        let dir = TempDir::new().unwrap();
        assert_eq!(store(&dir).load().unwrap(), None);
    }

    #[test]
    fn load_corrupt_is_error() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        std::fs::write(store.path(), "garbage").unwrap();
        assert!(store.load().is_err());
    }

    #[test]
    fn expiry_after_validity_window() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let now = Utc::now();
        let cred = SessionCredential::new(vec![1], now);

        assert!(!store.is_expired(&cred, now));
        assert!(!store.is_expired(&cred, now + Duration::days(7)));
        assert!(store.is_expired(&cred, now + Duration::days(8)));
    }

    #[test]
    fn custom_validity() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir).with_validity(Duration::hours(1));
        let now = Utc::now();
        let cred = SessionCredential::new(vec![1], now);
        assert!(store.is_expired(&cred, now + Duration::hours(2)));
    }

    #[test]
    fn invalidate_keeps_file_but_marks_unusable() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let now = Utc::now();
        store.save(&SessionCredential::new(vec![9, 9], now)).unwrap();

        assert!(store.invalidate("redirected to login", now).unwrap());

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.blob, vec![9, 9]);
        assert!(loaded.is_invalidated());
        assert_eq!(loaded.invalidation_reason.as_deref(), Some("redirected to login"));
        assert!(!store.is_usable(&loaded, now));
    }

    #[test]
    fn invalidate_without_credential_is_noop() {
        let dir = TempDir::new().unwrap();
        assert!(!store(&dir).invalidate("x", Utc::now()).unwrap());
    }

    #[test]
    fn clear_removes_file() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.save(&SessionCredential::new(vec![1], Utc::now())).unwrap();
        store.clear().unwrap();
        assert!(store.load().unwrap().is_none());
        store.clear().unwrap();
    }
}
