//! Test utilities for usagewatch.
//!
//! Provides payload factories, an in-memory page, a scriptable fake browser
//! and assertion macros shared by unit and integration tests.
//!
//! # Usage
//!
//! ```rust,ignore
//! use usagewatch::test_utils::*;
//!
//! let (driver, browser) = FakeDriver::new();
//! browser.set_usage_text("Current session 40% used");
//! let dir = TestDir::new();
//! ```

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::core::driver::{BrowserDriver, DriverError, DriverResult, LaunchOptions, PageHandle};
use crate::core::models::{CapId, Confidence, CyclePayload, SessionCredential, UsageReading};
use crate::storage::paths::AppPaths;

/// Credential blob the fake browser accepts as a logged-in session.
pub const VALID_COOKIES: &[u8] = b"valid-cookies";

// =============================================================================
// Test Data Factories
// =============================================================================

/// Fixed extraction instant used across tests.
#[must_use]
pub fn test_instant() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// A reading with only a percentage.
#[must_use]
pub fn make_test_reading(id: CapId, usage_percent: f64) -> UsageReading {
    UsageReading::new(id, usage_percent, Confidence::Primary, test_instant())
}

/// Payload with all three caps.
#[must_use]
pub fn make_test_payload() -> CyclePayload {
    let mut short = make_test_reading(CapId::ShortWindow, 42.0);
    short.tokens_used = Some(21_000);
    short.tokens_limit = Some(50_000);
    short.tokens_remaining = Some(29_000);
    short.reset_at = Some(test_instant() + chrono::Duration::hours(2));
    short.reset_text = Some("Resets in 2 hr".to_string());
    CyclePayload::from_readings(
        vec![
            short,
            make_test_reading(CapId::LongWindowAll, 18.5),
            make_test_reading(CapId::LongWindowRestricted, 3.0),
        ],
        test_instant(),
    )
}

/// Payload missing the restricted-model cap.
#[must_use]
pub fn make_test_partial_payload() -> CyclePayload {
    CyclePayload::from_readings(
        vec![
            make_test_reading(CapId::ShortWindow, 42.0),
            make_test_reading(CapId::LongWindowAll, 18.5),
        ],
        test_instant(),
    )
}

#[must_use]
pub fn make_test_credential(saved_at: DateTime<Utc>) -> SessionCredential {
    SessionCredential::new(VALID_COOKIES.to_vec(), saved_at)
}

/// Usage page text that every strategy except the text heuristic misses.
#[must_use]
pub fn usage_page_text() -> String {
    "Plan usage limits\n\
     Current session\nResets in 2 hr 30 min\n40% used\n\
     Weekly limits\nAll models\nResets in 3 days\n12% used\n\
     Opus only\n3% used\n"
        .to_string()
}

// =============================================================================
// Static Page
// =============================================================================

/// In-memory [`PageHandle`] keyed by selector.
#[derive(Debug, Clone, Default)]
pub struct StaticPage {
    url: String,
    texts: HashMap<String, String>,
    attributes: HashMap<(String, String), String>,
    errors: HashMap<String, DriverError>,
    visible: String,
}

impl StaticPage {
    #[must_use]
    pub fn new() -> Self {
        Self {
            url: "https://claude.ai/settings/usage".to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    #[must_use]
    pub fn with_text(mut self, selector: &str, text: &str) -> Self {
        self.texts.insert(selector.to_string(), text.to_string());
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, selector: &str, attribute: &str, value: &str) -> Self {
        self.attributes
            .insert((selector.to_string(), attribute.to_string()), value.to_string());
        self
    }

    /// Make queries for `selector` fail.
    #[must_use]
    pub fn with_query_error(mut self, selector: &str, error: DriverError) -> Self {
        self.errors.insert(selector.to_string(), error);
        self
    }

    #[must_use]
    pub fn with_visible_text(mut self, text: &str) -> Self {
        self.visible = text.to_string();
        self
    }

    fn text(&self, selector: &str) -> DriverResult<Option<String>> {
        if let Some(err) = self.errors.get(selector) {
            return Err(err.clone());
        }
        Ok(self.texts.get(selector).cloned())
    }

    fn attribute(&self, selector: &str, attribute: &str) -> DriverResult<Option<String>> {
        if let Some(err) = self.errors.get(selector) {
            return Err(err.clone());
        }
        Ok(self
            .attributes
            .get(&(selector.to_string(), attribute.to_string()))
            .cloned())
    }
}

impl PageHandle for StaticPage {
    fn current_url(&mut self) -> BoxFuture<'_, DriverResult<String>> {
        futures::future::ready(Ok(self.url.clone())).boxed()
    }

    fn query_text<'a>(&'a mut self, selector: &'a str) -> BoxFuture<'a, DriverResult<Option<String>>> {
        futures::future::ready(self.text(selector)).boxed()
    }

    fn query_attribute<'a>(
        &'a mut self,
        selector: &'a str,
        attribute: &'a str,
    ) -> BoxFuture<'a, DriverResult<Option<String>>> {
        futures::future::ready(self.attribute(selector, attribute)).boxed()
    }

    fn visible_text(&mut self) -> BoxFuture<'_, DriverResult<String>> {
        futures::future::ready(Ok(self.visible.clone())).boxed()
    }
}

// =============================================================================
// Fake Browser
// =============================================================================

/// Observable and scriptable state behind a [`FakeDriver`].
#[derive(Debug)]
pub struct FakeBrowserState {
    pub open: bool,
    pub opens: u32,
    pub closes: u32,
    pub current_url: String,
    pub navigations: Vec<String>,
    /// Content served for every non-login URL.
    pub usage_page: StaticPage,
    pub login_page_text: String,
    /// Whether the browser currently holds an authenticated session.
    pub logged_in: bool,
    pub imported: Vec<Vec<u8>>,
    /// Number of `visible_text` calls that still show an interstitial.
    pub challenge_polls: u32,
    /// Errors returned by the next navigations, in order.
    pub navigate_errors: VecDeque<DriverError>,
    pub open_error: Option<DriverError>,
    /// Simulated navigation latency.
    pub navigate_delay: Duration,
    /// URL fragment that requires authentication.
    pub protected_marker: String,
    pub in_flight: usize,
    pub max_in_flight: usize,
}

impl Default for FakeBrowserState {
    fn default() -> Self {
        Self {
            open: false,
            opens: 0,
            closes: 0,
            current_url: "about:blank".to_string(),
            navigations: Vec::new(),
            usage_page: StaticPage::new().with_visible_text(&usage_page_text()),
            login_page_text: "Log in to continue\nContinue with email".to_string(),
            logged_in: false,
            imported: Vec::new(),
            challenge_polls: 0,
            navigate_errors: VecDeque::new(),
            open_error: None,
            navigate_delay: Duration::ZERO,
            protected_marker: "/settings".to_string(),
            in_flight: 0,
            max_in_flight: 0,
        }
    }
}

impl FakeBrowserState {
    fn on_login_page(&self) -> bool {
        self.current_url.contains("/login")
    }
}

/// Shared view of a fake browser, kept by the test after the driver moves.
#[derive(Debug, Clone)]
pub struct FakeBrowser(Arc<Mutex<FakeBrowserState>>);

impl FakeBrowser {
    pub fn lock(&self) -> MutexGuard<'_, FakeBrowserState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_usage_text(&self, text: &str) {
        self.lock().usage_page = StaticPage::new().with_visible_text(text);
    }

    pub fn set_usage_page(&self, page: StaticPage) {
        self.lock().usage_page = page;
    }

    /// Simulate the user completing the login form.
    pub fn complete_login(&self) {
        self.lock().logged_in = true;
    }

    pub fn expire_session(&self) {
        self.lock().logged_in = false;
    }

    pub fn fail_next_navigation(&self, error: DriverError) {
        self.lock().navigate_errors.push_back(error);
    }

    pub fn set_navigate_delay(&self, delay: Duration) {
        self.lock().navigate_delay = delay;
    }

    #[must_use]
    pub fn navigations(&self) -> Vec<String> {
        self.lock().navigations.clone()
    }

    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }
}

/// Scriptable [`BrowserDriver`] for tests.
#[derive(Debug)]
pub struct FakeDriver {
    page: FakePage,
}

impl FakeDriver {
    #[must_use]
    pub fn new() -> (Self, FakeBrowser) {
        let browser = FakeBrowser(Arc::new(Mutex::new(FakeBrowserState::default())));
        (
            Self {
                page: FakePage(browser.clone()),
            },
            browser,
        )
    }

    fn browser(&self) -> &FakeBrowser {
        &self.page.0
    }
}

#[derive(Debug)]
struct FakePage(FakeBrowser);

impl PageHandle for FakePage {
    fn current_url(&mut self) -> BoxFuture<'_, DriverResult<String>> {
        let url = self.0.lock().current_url.clone();
        futures::future::ready(Ok(url)).boxed()
    }

    fn query_text<'a>(&'a mut self, selector: &'a str) -> BoxFuture<'a, DriverResult<Option<String>>> {
        let state = self.0.lock();
        let result = if state.on_login_page() {
            Ok(None)
        } else {
            state.usage_page.text(selector)
        };
        futures::future::ready(result).boxed()
    }

    fn query_attribute<'a>(
        &'a mut self,
        selector: &'a str,
        attribute: &'a str,
    ) -> BoxFuture<'a, DriverResult<Option<String>>> {
        let state = self.0.lock();
        let result = if state.on_login_page() {
            Ok(None)
        } else {
            state.usage_page.attribute(selector, attribute)
        };
        futures::future::ready(result).boxed()
    }

    fn visible_text(&mut self) -> BoxFuture<'_, DriverResult<String>> {
        let mut state = self.0.lock();
        let text = if state.challenge_polls > 0 {
            state.challenge_polls -= 1;
            "Just a moment...\nChecking your browser".to_string()
        } else if state.on_login_page() {
            state.login_page_text.clone()
        } else {
            state.usage_page.visible.clone()
        };
        futures::future::ready(Ok(text)).boxed()
    }
}

impl BrowserDriver for FakeDriver {
    fn open<'a>(&'a mut self, _options: &'a LaunchOptions) -> BoxFuture<'a, DriverResult<()>> {
        let mut state = self.browser().lock();
        let result = match state.open_error.clone() {
            Some(err) => Err(err),
            None => {
                state.open = true;
                state.opens += 1;
                Ok(())
            }
        };
        futures::future::ready(result).boxed()
    }

    fn is_open(&self) -> bool {
        self.browser().lock().open
    }

    fn navigate<'a>(&'a mut self, url: &'a str) -> BoxFuture<'a, DriverResult<()>> {
        let browser = self.browser().clone();
        async move {
            let delay = {
                let mut state = browser.lock();
                if !state.open {
                    return Err(DriverError::NotOpen);
                }
                state.in_flight += 1;
                state.max_in_flight = state.max_in_flight.max(state.in_flight);
                state.navigations.push(url.to_string());
                state.navigate_delay
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let mut state = browser.lock();
            state.in_flight -= 1;
            if let Some(err) = state.navigate_errors.pop_front() {
                return Err(err);
            }
            state.current_url = if !state.logged_in && url.contains(&state.protected_marker) {
                "https://claude.ai/login?returnTo=%2Fsettings%2Fusage".to_string()
            } else {
                url.to_string()
            };
            Ok(())
        }
        .boxed()
    }

    fn wait_for_load(&mut self, _timeout: Duration) -> BoxFuture<'_, DriverResult<()>> {
        let open = self.browser().lock().open;
        futures::future::ready(if open { Ok(()) } else { Err(DriverError::NotOpen) }).boxed()
    }

    fn export_credentials(&mut self) -> BoxFuture<'_, DriverResult<Vec<u8>>> {
        let logged_in = self.browser().lock().logged_in;
        let blob = if logged_in { VALID_COOKIES.to_vec() } else { b"anonymous".to_vec() };
        futures::future::ready(Ok(blob)).boxed()
    }

    fn import_credentials<'a>(&'a mut self, blob: &'a [u8]) -> BoxFuture<'a, DriverResult<()>> {
        let mut state = self.browser().lock();
        state.imported.push(blob.to_vec());
        if blob == VALID_COOKIES {
            state.logged_in = true;
        }
        futures::future::ready(Ok(())).boxed()
    }

    fn close(&mut self) -> BoxFuture<'_, DriverResult<()>> {
        let mut state = self.browser().lock();
        if state.open {
            state.open = false;
            state.closes += 1;
        }
        futures::future::ready(Ok(())).boxed()
    }

    fn page(&mut self) -> &mut dyn PageHandle {
        &mut self.page
    }
}

// =============================================================================
// Temporary Directories
// =============================================================================

/// Isolated temporary directory with file helpers.
pub struct TestDir {
    inner: tempfile::TempDir,
}

impl TestDir {
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: tempfile::tempdir().expect("Failed to create temp directory"),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Config, cache and data directories rooted here.
    #[must_use]
    pub fn app_paths(&self) -> AppPaths {
        AppPaths::under(self.inner.path())
    }

    /// # Panics
    ///
    /// Panics if the file cannot be written.
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.inner.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        fs::write(&path, content).expect("Failed to write test file");
    }

    #[must_use]
    pub fn file_exists(&self, name: &str) -> bool {
        self.inner.path().join(name).exists()
    }

    #[must_use]
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.inner.path().join(name)
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Assertion Macros
// =============================================================================

/// Assert that a string contains a substring.
#[macro_export]
macro_rules! assert_contains {
    ($haystack:expr, $needle:expr) => {
        let haystack = $haystack;
        let needle = $needle;
        assert!(
            haystack.contains(needle),
            "Expected string to contain {:?}\n\nActual string:\n{:?}",
            needle,
            haystack
        );
    };
}

/// Assert that a string does NOT contain a substring.
#[macro_export]
macro_rules! assert_not_contains {
    ($haystack:expr, $needle:expr) => {
        let haystack = $haystack;
        let needle = $needle;
        assert!(
            !haystack.contains(needle),
            "Expected string NOT to contain {:?}\n\nActual string:\n{:?}",
            needle,
            haystack
        );
    };
}

/// Strip ANSI escape codes from a string.
#[must_use]
pub fn strip_ansi_codes(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\x1b' {
            if chars.peek() == Some(&'[') {
                chars.next();
                while let Some(&next) = chars.peek() {
                    chars.next();
                    if next.is_ascii_alphabetic() {
                        break;
                    }
                }
            }
        } else {
            result.push(c);
        }
    }

    result
}
