//! Session controller: the sole owner of the browser driver.
//!
//! The driver sits behind an async mutex so a manual login and a scrape cycle
//! can never drive the browser at the same time; the session status sits
//! behind a small sync mutex so `check_session` never waits on the browser.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::core::driver::{BrowserDriver, DriverResult, LaunchOptions};
use crate::core::extract::ExtractionPipeline;
use crate::core::models::{CyclePayload, SessionCredential};
use crate::error::{Result, WatchError};
use crate::storage::config::{
    DEFAULT_LOGIN_URL, DEFAULT_USAGE_URL, ResolvedConfig, SessionConfig,
};
use crate::storage::paths::AppPaths;
use crate::storage::session_store::SessionStore;

const CHALLENGE_POLL: Duration = Duration::from_secs(1);
const REDIRECT_REASON: &str = "usage page redirected to login";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NoSession,
    Authenticating,
    Authenticated,
    Expired,
}

impl SessionState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoSession => "no_session",
            Self::Authenticating => "authenticating",
            Self::Authenticated => "authenticated",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the session for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub state: SessionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SessionStatus {
    const fn empty(state: SessionState) -> Self {
        Self {
            state,
            saved_at: None,
            fingerprint: None,
            reason: None,
        }
    }

    fn from_credential(credential: &SessionCredential, state: SessionState) -> Self {
        Self {
            state,
            saved_at: Some(credential.saved_at),
            fingerprint: Some(credential.fingerprint()),
            reason: credential.invalidation_reason.clone(),
        }
    }
}

/// Timeouts, URLs and page markers the controller works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub usage_url: String,
    pub login_url: String,
    pub driver_timeout: Duration,
    pub load_timeout: Duration,
    pub challenge_timeout: Duration,
    pub login_timeout: Duration,
    pub login_url_markers: Vec<String>,
    pub login_text_markers: Vec<String>,
    pub challenge_markers: Vec<String>,
    pub launch: LaunchOptions,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            usage_url: DEFAULT_USAGE_URL.to_string(),
            login_url: DEFAULT_LOGIN_URL.to_string(),
            driver_timeout: Duration::from_secs(30),
            load_timeout: Duration::from_secs(30),
            challenge_timeout: Duration::from_secs(60),
            login_timeout: Duration::from_secs(session.login_timeout_seconds),
            login_url_markers: session.login_url_markers,
            login_text_markers: session.login_text_markers,
            challenge_markers: session.challenge_markers,
            launch: LaunchOptions::default(),
        }
    }
}

impl SessionSettings {
    #[must_use]
    pub fn from_config(config: &ResolvedConfig, paths: &AppPaths) -> Self {
        let browser = &config.file.browser;
        let session = &config.file.session;
        Self {
            usage_url: session.usage_url.clone(),
            login_url: session.login_url.clone(),
            driver_timeout: config.driver_timeout,
            load_timeout: Duration::from_secs(browser.load_timeout_seconds),
            challenge_timeout: Duration::from_secs(browser.challenge_timeout_seconds),
            login_timeout: Duration::from_secs(session.login_timeout_seconds),
            login_url_markers: session.login_url_markers.clone(),
            login_text_markers: session.login_text_markers.clone(),
            challenge_markers: session.challenge_markers.clone(),
            launch: LaunchOptions {
                headless: config.headless,
                user_data_dir: Some(
                    browser
                        .user_data_dir
                        .clone()
                        .unwrap_or_else(|| paths.browser_profile_dir()),
                ),
                args: browser.args.clone(),
            },
        }
    }

    /// Whether the URL or page text looks like a login prompt.
    #[must_use]
    pub fn is_login_page(&self, url: &str, text: &str) -> bool {
        let url = url.to_ascii_lowercase();
        let path = url.split(['?', '#']).next().unwrap_or_default();
        if self
            .login_url_markers
            .iter()
            .any(|m| path.contains(&m.to_ascii_lowercase()))
        {
            return true;
        }
        contains_any(text, &self.login_text_markers)
    }

    #[must_use]
    pub fn is_challenge_page(&self, text: &str) -> bool {
        contains_any(text, &self.challenge_markers)
    }

    fn usage_origin(&self) -> Result<String> {
        let url = reqwest::Url::parse(&self.usage_url).map_err(|e| WatchError::ConfigInvalid {
            key: "session.usage_url".to_string(),
            value: self.usage_url.clone(),
            message: e.to_string(),
        })?;
        Ok(url.origin().ascii_serialization())
    }
}

fn contains_any(text: &str, markers: &[String]) -> bool {
    let text = text.to_lowercase();
    markers
        .iter()
        .filter(|m| !m.is_empty())
        .any(|m| text.contains(&m.to_lowercase()))
}

struct DriverSlot {
    driver: Box<dyn BrowserDriver>,
    /// Saved cookies have been loaded into the open browser.
    restored: bool,
}

pub struct SessionController {
    store: SessionStore,
    settings: SessionSettings,
    status: Mutex<SessionStatus>,
    driver: tokio::sync::Mutex<DriverSlot>,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("store", &self.store)
            .field("status", &*self.status())
            .finish_non_exhaustive()
    }
}

impl SessionController {
    /// Build a controller and derive the initial state from the store.
    #[must_use]
    pub fn new(driver: Box<dyn BrowserDriver>, store: SessionStore, settings: SessionSettings) -> Self {
        let status = Self::status_from_store(&store, Utc::now());
        tracing::debug!(state = %status.state, "Session controller initialised");
        Self {
            store,
            settings,
            status: Mutex::new(status),
            driver: tokio::sync::Mutex::new(DriverSlot {
                driver,
                restored: false,
            }),
        }
    }

    /// Session status as recorded on disk, without touching a browser.
    #[must_use]
    pub fn status_from_store(store: &SessionStore, now: DateTime<Utc>) -> SessionStatus {
        match store.load() {
            Ok(None) => SessionStatus::empty(SessionState::NoSession),
            Ok(Some(credential)) => {
                let state = if store.is_usable(&credential, now) {
                    SessionState::Authenticated
                } else {
                    SessionState::Expired
                };
                SessionStatus::from_credential(&credential, state)
            }
            Err(e) => {
                tracing::warn!(error = %e, path = %store.path().display(), "Unreadable session file");
                SessionStatus::empty(SessionState::NoSession)
            }
        }
    }

    fn status(&self) -> MutexGuard<'_, SessionStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub const fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    #[must_use]
    pub const fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Current state, moving `Authenticated` to `Expired` once the credential ages out.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.status_at(Utc::now()).state
    }

    #[must_use]
    pub fn status_at(&self, now: DateTime<Utc>) -> SessionStatus {
        let mut status = self.status();
        if status.state == SessionState::Authenticated {
            let aged_out = status
                .saved_at
                .is_some_and(|saved| now - saved > self.store.validity());
            if aged_out {
                tracing::info!("Saved session passed its validity window");
                status.state = SessionState::Expired;
                status.reason = Some("session older than validity window".to_string());
            }
        }
        status.clone()
    }

    #[must_use]
    pub fn is_session_valid(&self) -> bool {
        self.state() == SessionState::Authenticated
    }

    /// Fail unless a usable session exists. Never starts a login.
    ///
    /// # Errors
    /// `SessionRequired` without a session (or while a login is running),
    /// `SessionExpired` once it aged out or was rejected.
    pub fn ensure_authenticated(&self) -> Result<()> {
        let status = self.status_at(Utc::now());
        match status.state {
            SessionState::Authenticated => Ok(()),
            SessionState::NoSession | SessionState::Authenticating => {
                Err(WatchError::SessionRequired)
            }
            SessionState::Expired => Err(WatchError::SessionExpired {
                reason: status
                    .reason
                    .unwrap_or_else(|| "session no longer valid".to_string()),
            }),
        }
    }

    fn set_status(&self, status: SessionStatus) {
        *self.status() = status;
    }

    /// Run a driver call under the hard driver timeout.
    async fn guarded<T>(
        &self,
        operation: &str,
        limit: Duration,
        call: BoxFuture<'_, DriverResult<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(limit, call).await {
            Ok(result) => result.map_err(WatchError::from),
            Err(_) => {
                tracing::warn!(operation, seconds = limit.as_secs(), "Driver call timed out");
                Err(WatchError::Timeout {
                    operation: operation.to_string(),
                    seconds: limit.as_secs(),
                })
            }
        }
    }

    async fn ensure_open(&self, slot: &mut DriverSlot) -> Result<()> {
        if slot.driver.is_open() {
            return Ok(());
        }
        tracing::info!(headless = self.settings.launch.headless, "Opening browser");
        let limit = self.settings.driver_timeout;
        self.guarded("open browser", limit, slot.driver.open(&self.settings.launch))
            .await?;
        slot.restored = false;
        Ok(())
    }

    /// Load the saved cookies into a freshly opened browser.
    async fn restore_credentials(&self, slot: &mut DriverSlot) -> Result<()> {
        if slot.restored {
            return Ok(());
        }
        let credential = self.store.load()?.ok_or(WatchError::SessionRequired)?;
        let origin = self.settings.usage_origin()?;
        let limit = self.settings.driver_timeout;

        self.guarded("navigate", limit, slot.driver.navigate(&origin)).await?;
        self.guarded(
            "import credentials",
            limit,
            slot.driver.import_credentials(&credential.blob),
        )
        .await?;
        slot.restored = true;
        tracing::debug!(fingerprint = %credential.fingerprint(), "Session credentials restored");
        Ok(())
    }

    /// Navigate, wait for load and for any interstitial to clear.
    ///
    /// Returns the final URL and the page's visible text.
    async fn load_page(&self, slot: &mut DriverSlot, url: &str) -> Result<(String, String)> {
        let limit = self.settings.driver_timeout;
        let load_limit = self.settings.load_timeout.max(limit);

        self.guarded("navigate", limit, slot.driver.navigate(url)).await?;
        self.guarded(
            "wait for load",
            load_limit,
            slot.driver.wait_for_load(self.settings.load_timeout),
        )
        .await?;

        let started = Instant::now();
        loop {
            let text = self
                .guarded("read page text", limit, slot.driver.page().visible_text())
                .await?;
            if !self.settings.is_challenge_page(&text) {
                let current = self
                    .guarded("read url", limit, slot.driver.page().current_url())
                    .await?;
                return Ok((current, text));
            }
            if started.elapsed() >= self.settings.challenge_timeout {
                return Err(WatchError::ChallengeNotCleared {
                    url: url.to_string(),
                    seconds: self.settings.challenge_timeout.as_secs(),
                });
            }
            tracing::debug!(url, "Waiting for browser challenge to clear");
            tokio::time::sleep(CHALLENGE_POLL).await;
        }
    }

    async fn navigate_locked(&self, slot: &mut DriverSlot) -> Result<String> {
        self.ensure_open(slot).await?;
        self.restore_credentials(slot).await?;

        let (url, text) = self.load_page(slot, &self.settings.usage_url).await?;
        if self.settings.is_login_page(&url, &text) {
            tracing::warn!(url = %crate::error::attempt::strip_url(&url), "Redirected to login, invalidating session");
            if let Err(e) = self.store.invalidate(REDIRECT_REASON, Utc::now()) {
                tracing::warn!(error = %e, "Failed to mark session invalid");
            }
            let mut status = self.status();
            status.state = SessionState::Expired;
            status.reason = Some(REDIRECT_REASON.to_string());
            drop(status);
            slot.restored = false;
            return Err(WatchError::SessionExpired {
                reason: REDIRECT_REASON.to_string(),
            });
        }
        Ok(url)
    }

    /// Drop a dead browser so the next attempt reopens it.
    async fn recover(&self, slot: &mut DriverSlot, error: &WatchError) {
        if matches!(error, WatchError::DriverCrashed { .. }) {
            slot.restored = false;
            let limit = self.settings.driver_timeout;
            if let Err(e) = self.guarded("close browser", limit, slot.driver.close()).await {
                tracing::debug!(error = %e, "Closing crashed browser failed");
            }
        }
    }

    /// Load the usage page with the saved session.
    ///
    /// # Errors
    /// Authentication, navigation, challenge or timeout failures.
    pub async fn navigate_to_usage_page(&self) -> Result<String> {
        self.ensure_authenticated()?;
        let mut slot = self.driver.lock().await;
        let result = self.navigate_locked(&mut slot).await;
        if let Err(e) = &result {
            self.recover(&mut slot, e).await;
        }
        result
    }

    /// One full attempt: authenticate, load the page and extract every cap.
    ///
    /// # Errors
    /// Any classified failure from navigation or extraction.
    pub async fn run_attempt(&self, pipeline: &ExtractionPipeline) -> Result<CyclePayload> {
        self.ensure_authenticated()?;
        let mut slot = self.driver.lock().await;

        let result = async {
            self.navigate_locked(&mut slot).await?;
            let limit = self.settings.driver_timeout;
            let page = slot.driver.page();
            match tokio::time::timeout(limit, pipeline.extract(page, Utc::now())).await {
                Ok(result) => result,
                Err(_) => Err(WatchError::Timeout {
                    operation: "extract usage".to_string(),
                    seconds: limit.as_secs(),
                }),
            }
        }
        .await;

        if let Err(e) = &result {
            self.recover(&mut slot, e).await;
        }
        result
    }

    /// Interactive login.
    ///
    /// Opens the login page, waits for `done` (bounded by the login timeout),
    /// then loads the usage page and checks it is no longer a login prompt
    /// before saving the browser's cookies.
    ///
    /// A failed login leaves the previous state in place, so a still valid
    /// saved session keeps working.
    ///
    /// # Errors
    /// `LoginFailed` when the page still asks for a login or the signal is
    /// dropped, `LoginTimeout` when nobody signals in time.
    pub async fn manual_login(&self, done: oneshot::Receiver<()>) -> Result<()> {
        let mut slot = self.driver.lock().await;
        let previous = self.status_at(Utc::now());
        self.set_status(SessionStatus {
            state: SessionState::Authenticating,
            ..previous.clone()
        });

        let limit = self.settings.login_timeout;
        let result = match tokio::time::timeout(limit, self.login_locked(&mut slot, done)).await {
            Ok(result) => result,
            Err(_) => Err(WatchError::LoginTimeout {
                seconds: limit.as_secs(),
            }),
        };

        match result {
            Ok(credential) => {
                self.set_status(SessionStatus::from_credential(
                    &credential,
                    SessionState::Authenticated,
                ));
                slot.restored = true;
                tracing::info!(fingerprint = %credential.fingerprint(), "Login completed");
                Ok(())
            }
            Err(e) => {
                tracing::debug!(state = %previous.state, "Restoring session state after failed login");
                self.set_status(previous);
                // The login page may have replaced the browser's cookies.
                slot.restored = false;
                self.recover(&mut slot, &e).await;
                tracing::warn!(error = %e, "Login did not complete");
                Err(e)
            }
        }
    }

    async fn login_locked(
        &self,
        slot: &mut DriverSlot,
        done: oneshot::Receiver<()>,
    ) -> Result<SessionCredential> {
        self.ensure_open(slot).await?;
        let login_url = self.settings.login_url.clone();
        self.load_page(slot, &login_url).await?;
        tracing::info!(url = %login_url, "Waiting for login to be completed in the browser");

        if done.await.is_err() {
            return Err(WatchError::LoginFailed {
                reason: "login was abandoned before completion".to_string(),
            });
        }

        let (url, text) = self.load_page(slot, &self.settings.usage_url).await?;
        if self.settings.is_login_page(&url, &text) {
            return Err(WatchError::LoginFailed {
                reason: "the browser still shows a login prompt".to_string(),
            });
        }

        let limit = self.settings.driver_timeout;
        let blob = self
            .guarded("export credentials", limit, slot.driver.export_credentials())
            .await?;
        if blob.is_empty() {
            return Err(WatchError::LoginFailed {
                reason: "the browser returned no cookies".to_string(),
            });
        }
        let credential = SessionCredential::new(blob, Utc::now());
        self.store.save(&credential)?;
        Ok(credential)
    }

    /// Close the browser if it is open.
    pub async fn shutdown(&self) {
        let mut slot = self.driver.lock().await;
        if slot.driver.is_open() {
            let limit = self.settings.driver_timeout;
            match self.guarded("close browser", limit, slot.driver.close()).await {
                Ok(()) => tracing::debug!("Browser closed"),
                Err(e) => tracing::warn!(error = %e, "Failed to close browser"),
            }
        }
        slot.restored = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::PayloadStatus;
    use crate::error::ErrorKind;
    use crate::test_utils::{FakeBrowser, FakeDriver, TestDir, VALID_COOKIES, make_test_credential};
    use std::sync::Arc;

    fn controller(dir: &TestDir) -> (SessionController, FakeBrowser) {
        let (driver, browser) = FakeDriver::new();
        let store = SessionStore::new(dir.file_path("session.json"));
        (
            SessionController::new(Box::new(driver), store, SessionSettings::default()),
            browser,
        )
    }

    fn save_credential(dir: &TestDir, credential: &SessionCredential) {
        SessionStore::new(dir.file_path("session.json"))
            .save(credential)
            .unwrap();
    }

    #[test]
    fn no_credential_means_session_required() {
        let dir = TestDir::new();
        let (ctl, _) = controller(&dir);
        assert_eq!(ctl.state(), SessionState::NoSession);
        assert!(!ctl.is_session_valid());
        assert!(matches!(
            ctl.ensure_authenticated(),
            Err(WatchError::SessionRequired)
        ));
    }

    #[test]
    fn old_credential_is_expired() {
        let dir = TestDir::new();
        save_credential(&dir, &make_test_credential(Utc::now() - chrono::Duration::days(8)));
        let (ctl, _) = controller(&dir);
        assert_eq!(ctl.state(), SessionState::Expired);
        let err = ctl.ensure_authenticated().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionExpired);
    }

    #[test]
    fn login_detection_by_url_and_text() {
        let settings = SessionSettings::default();
        assert!(settings.is_login_page("https://claude.ai/login?next=/usage", ""));
        assert!(settings.is_login_page("https://claude.ai/", "Please Log in to continue"));
        assert!(!settings.is_login_page("https://claude.ai/settings/usage?from=/login", "40% used"));
        assert!(settings.is_challenge_page("Just a moment..."));
    }

    #[tokio::test]
    async fn attempt_restores_cookies_and_extracts() {
        let dir = TestDir::new();
        save_credential(&dir, &make_test_credential(Utc::now()));
        let (ctl, browser) = controller(&dir);

        let payload = ctl.run_attempt(&ExtractionPipeline::default()).await.unwrap();

        assert_eq!(payload.status, PayloadStatus::Ok);
        let state = browser.lock();
        assert_eq!(state.opens, 1);
        assert_eq!(state.imported, vec![VALID_COOKIES.to_vec()]);
        assert_eq!(
            state.navigations,
            vec!["https://claude.ai", "https://claude.ai/settings/usage"]
        );
    }

    #[tokio::test]
    async fn second_attempt_reuses_browser() {
        let dir = TestDir::new();
        save_credential(&dir, &make_test_credential(Utc::now()));
        let (ctl, browser) = controller(&dir);
        let pipeline = ExtractionPipeline::default();

        ctl.run_attempt(&pipeline).await.unwrap();
        ctl.run_attempt(&pipeline).await.unwrap();

        let state = browser.lock();
        assert_eq!(state.opens, 1);
        assert_eq!(state.imported.len(), 1);
    }

    #[tokio::test]
    async fn redirect_to_login_invalidates_session() {
        let dir = TestDir::new();
        save_credential(&dir, &SessionCredential::new(b"revoked".to_vec(), Utc::now()));
        let (ctl, _) = controller(&dir);
        assert_eq!(ctl.state(), SessionState::Authenticated);

        let err = ctl.navigate_to_usage_page().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SessionExpired);
        assert_eq!(ctl.state(), SessionState::Expired);

        let stored = ctl.store().load().unwrap().unwrap();
        assert!(stored.is_invalidated());
    }

    #[tokio::test]
    async fn manual_login_saves_credential() {
        let dir = TestDir::new();
        let (ctl, browser) = controller(&dir);
        let (tx, rx) = oneshot::channel();

        let login = ctl.manual_login(rx);
        let user = async {
            tokio::task::yield_now().await;
            browser.complete_login();
            tx.send(()).unwrap();
        };
        let (result, ()) = tokio::join!(login, user);

        result.unwrap();
        assert_eq!(ctl.state(), SessionState::Authenticated);
        let saved = ctl.store().load().unwrap().unwrap();
        assert_eq!(saved.blob, VALID_COOKIES);
        assert!(browser.navigations()[0].contains("/login"));
    }

    #[tokio::test]
    async fn unfinished_login_fails() {
        let dir = TestDir::new();
        let (ctl, _) = controller(&dir);
        let (tx, rx) = oneshot::channel();
        tx.send(()).unwrap();

        let err = ctl.manual_login(rx).await.unwrap_err();
        assert!(matches!(err, WatchError::LoginFailed { .. }));
        assert_eq!(ctl.state(), SessionState::NoSession);
        assert!(ctl.store().load().unwrap().is_none());
    }

    #[tokio::test]
    async fn dropped_signal_fails_login() {
        let dir = TestDir::new();
        let (ctl, _) = controller(&dir);
        let (tx, rx) = oneshot::channel::<()>();
        drop(tx);
        let err = ctl.manual_login(rx).await.unwrap_err();
        assert!(matches!(err, WatchError::LoginFailed { .. }));
    }

    #[tokio::test]
    async fn failed_relogin_keeps_valid_session() {
        let dir = TestDir::new();
        save_credential(&dir, &make_test_credential(Utc::now()));
        let (ctl, browser) = controller(&dir);
        assert_eq!(ctl.state(), SessionState::Authenticated);

        let (tx, rx) = oneshot::channel::<()>();
        drop(tx);
        let err = ctl.manual_login(rx).await.unwrap_err();

        assert!(matches!(err, WatchError::LoginFailed { .. }));
        assert_eq!(ctl.state(), SessionState::Authenticated);
        ctl.ensure_authenticated().unwrap();
        let payload = ctl.run_attempt(&ExtractionPipeline::default()).await.unwrap();
        assert_eq!(payload.status, PayloadStatus::Ok);
        assert_eq!(browser.lock().imported, vec![VALID_COOKIES.to_vec()]);
    }

    #[tokio::test]
    async fn failed_relogin_keeps_expired_state() {
        let dir = TestDir::new();
        save_credential(&dir, &make_test_credential(Utc::now() - chrono::Duration::days(8)));
        let (ctl, _) = controller(&dir);
        let (tx, rx) = oneshot::channel();
        tx.send(()).unwrap();

        ctl.manual_login(rx).await.unwrap_err();

        assert_eq!(ctl.state(), SessionState::Expired);
        assert_eq!(ctl.ensure_authenticated().unwrap_err().kind(), ErrorKind::SessionExpired);
    }

    #[tokio::test(start_paused = true)]
    async fn login_times_out() {
        let dir = TestDir::new();
        let (ctl, _) = controller(&dir);
        let (_tx, rx) = oneshot::channel();
        let err = ctl.manual_login(rx).await.unwrap_err();
        assert!(matches!(err, WatchError::LoginTimeout { seconds: 300 }));
        assert_eq!(ctl.state(), SessionState::NoSession);
    }

    #[tokio::test(start_paused = true)]
    async fn challenge_is_waited_out() {
        let dir = TestDir::new();
        save_credential(&dir, &make_test_credential(Utc::now()));
        let (ctl, browser) = controller(&dir);
        browser.lock().challenge_polls = 3;

        ctl.navigate_to_usage_page().await.unwrap();
        assert_eq!(browser.lock().challenge_polls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_challenge_is_navigation_failure() {
        let dir = TestDir::new();
        save_credential(&dir, &make_test_credential(Utc::now()));
        let (ctl, browser) = controller(&dir);
        browser.lock().challenge_polls = u32::MAX;

        let err = ctl.navigate_to_usage_page().await.unwrap_err();
        assert!(matches!(err, WatchError::ChallengeNotCleared { seconds: 60, .. }));
        assert_eq!(err.kind(), ErrorKind::NavigationFailed);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_driver_times_out() {
        let dir = TestDir::new();
        save_credential(&dir, &make_test_credential(Utc::now()));
        let (ctl, browser) = controller(&dir);
        browser.set_navigate_delay(Duration::from_secs(120));

        let err = ctl.navigate_to_usage_page().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn crash_closes_browser_for_reopen() {
        let dir = TestDir::new();
        save_credential(&dir, &make_test_credential(Utc::now()));
        let (ctl, browser) = controller(&dir);
        browser.fail_next_navigation(crate::core::driver::DriverError::Crashed("tab died".into()));

        let err = ctl.navigate_to_usage_page().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert_eq!(browser.lock().closes, 1);

        ctl.navigate_to_usage_page().await.unwrap();
        assert_eq!(browser.lock().opens, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn browser_is_never_driven_concurrently() {
        let dir = TestDir::new();
        save_credential(&dir, &make_test_credential(Utc::now()));
        let (ctl, browser) = controller(&dir);
        browser.set_navigate_delay(Duration::from_secs(1));
        let ctl = Arc::new(ctl);
        let pipeline = Arc::new(ExtractionPipeline::default());

        let tasks: Vec<_> = (0..3)
            .map(|_| {
                let ctl = ctl.clone();
                let pipeline = pipeline.clone();
                tokio::spawn(async move { ctl.run_attempt(&pipeline).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(browser.max_in_flight(), 1);
    }
}
