//! Page fixtures and monitor builders.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use usagewatch::core::extract::ExtractionPipeline;
use usagewatch::core::models::CyclePayload;
use usagewatch::core::monitor::UsageMonitor;
use usagewatch::core::retry::RetryPolicy;
use usagewatch::core::scheduler::CycleRecorder;
use usagewatch::core::session::{SessionController, SessionSettings};
use usagewatch::storage::cache::LastGoodCache;
use usagewatch::storage::session_store::SessionStore;
use usagewatch::test_utils::{FakeBrowser, FakeDriver, StaticPage, TestDir};

/// Read a text fixture from `tests/fixtures/pages`.
pub fn page_text(name: &str) -> String {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/pages")
        .join(name);
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("missing fixture {}: {e}", path.display()))
}

/// Page with every cap exposed through data-testid attributes.
pub fn data_attribute_page() -> StaticPage {
    StaticPage::new()
        .with_text(r#"[data-testid="usage-4hour-percent"]"#, "42%")
        .with_text(r#"[data-testid="usage-4hour-reset"]"#, "Resets in 3 hr 10 min")
        .with_text(r#"[data-testid="usage-4hour-tokens"]"#, "21,000 of 50,000")
        .with_text(r#"[data-testid="usage-1week-percent"]"#, "18.5%")
        .with_text(r#"[data-testid="usage-1week-reset"]"#, "Resets in 6 days")
        .with_text(r#"[data-testid="usage-opus-percent"]"#, "3%")
}

/// Page where only the legacy class-based layout is present.
pub fn class_selector_page() -> StaticPage {
    StaticPage::new()
        .with_text(r#".usage-metric[data-period="4h"] .percentage"#, "55 %")
        .with_text(r#".usage-metric[data-period="1w"] .percentage"#, "20%")
        .with_text(r#".usage-metric[data-period="1w"] .reset-time"#, "Resets in 2 days")
}

/// Short backoff so retrying tests stay quick under paused time.
pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        jitter_ratio: 0.0,
    }
}

pub struct Harness {
    pub monitor: UsageMonitor,
    pub browser: FakeBrowser,
    pub cache: LastGoodCache,
    pub dir: TestDir,
}

/// Monitor over a fake browser, storing its files in a fresh temp dir.
pub fn harness(interval: Duration, policy: RetryPolicy, cold_start: Option<CyclePayload>) -> Harness {
    let dir = TestDir::new();
    let (driver, browser) = FakeDriver::new();
    let controller = Arc::new(SessionController::new(
        Box::new(driver),
        SessionStore::new(dir.file_path("session.json")),
        SessionSettings::default(),
    ));
    let cache = LastGoodCache::new(dir.file_path("last_good.json"));
    let monitor = UsageMonitor::from_parts(
        controller,
        ExtractionPipeline::default(),
        policy,
        CycleRecorder::disabled().with_cache(cache.clone()),
        interval,
        cold_start,
    );
    Harness {
        monitor,
        browser,
        cache,
        dir,
    }
}

/// Complete a manual login on the harness browser.
pub async fn log_in(h: &Harness) {
    let (tx, rx) = tokio::sync::oneshot::channel();
    h.browser.complete_login();
    tx.send(()).unwrap();
    h.monitor.manual_login(rx).await.unwrap();
}
