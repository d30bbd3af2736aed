//! Extraction pipeline against recorded page layouts.

mod common;

use chrono::Duration;
use common::fixtures::{class_selector_page, data_attribute_page, page_text};
use common::logger::TestLogger;
use usagewatch::core::extract::ExtractionPipeline;
use usagewatch::core::models::{CapId, Confidence, PayloadStatus};
use usagewatch::error::ErrorKind;
use usagewatch::test_utils::{StaticPage, test_instant};

#[tokio::test]
async fn labeled_page_text() {
    let log = TestLogger::new("labeled_page_text");
    let mut page = StaticPage::new().with_visible_text(&page_text("usage_labeled.txt"));

    let payload = ExtractionPipeline::default()
        .extract(&mut page, test_instant())
        .await
        .unwrap();

    assert_eq!(payload.status, PayloadStatus::Ok);
    assert_eq!(payload.found_count, 3);

    let short = payload.reading(CapId::ShortWindow).unwrap();
    assert_eq!(short.usage_percent, 61.0);
    assert_eq!(short.confidence, Confidence::TextHeuristic);
    assert_eq!(
        short.reset_at,
        Some(test_instant() + Duration::hours(4) + Duration::minutes(16))
    );

    log.phase("weekly reset is a weekday, kept as text only");
    let weekly = payload.reading(CapId::LongWindowAll).unwrap();
    assert_eq!(weekly.usage_percent, 27.0);
    assert_eq!(weekly.reset_at, None);
    assert_eq!(weekly.reset_text.as_deref(), Some("Resets Thu 10:00 AM"));

    let opus = payload.reading(CapId::LongWindowRestricted).unwrap();
    assert_eq!(opus.usage_percent, 0.0);
    assert_eq!(opus.reset_text, None);
    log.finish_ok();
}

#[tokio::test]
async fn unlabeled_statements_follow_page_order() {
    let mut page = StaticPage::new().with_visible_text(&page_text("usage_unlabeled.txt"));

    let payload = ExtractionPipeline::default()
        .extract(&mut page, test_instant())
        .await
        .unwrap();

    let short = payload.reading(CapId::ShortWindow).unwrap();
    assert!((short.usage_percent - 25.0).abs() < 1e-9);
    assert_eq!(short.tokens_used, Some(12_500));
    assert_eq!(short.tokens_limit, Some(50_000));
    assert_eq!(short.tokens_remaining, Some(37_500));
    assert_eq!(short.reset_at, Some(test_instant() + Duration::hours(2)));

    let weekly = payload.reading(CapId::LongWindowAll).unwrap();
    assert_eq!(weekly.usage_percent, 34.0);
    assert_eq!(weekly.reset_at, Some(test_instant() + Duration::days(5)));

    let opus = payload.reading(CapId::LongWindowRestricted).unwrap();
    assert_eq!(opus.usage_percent, 8.0);
    assert_eq!(opus.reset_at, None);
}

#[tokio::test]
async fn data_attributes_win_over_text() {
    // Visible text disagrees; selectors must take precedence.
    let mut page = data_attribute_page().with_visible_text("Current session\n99% used");

    let payload = ExtractionPipeline::default()
        .extract(&mut page, test_instant())
        .await
        .unwrap();

    assert_eq!(payload.status, PayloadStatus::Ok);
    for reading in &payload.readings {
        assert_eq!(reading.confidence, Confidence::Primary, "{:?}", reading.id);
    }
    let short = payload.reading(CapId::ShortWindow).unwrap();
    assert_eq!(short.usage_percent, 42.0);
    assert_eq!(short.tokens_remaining, Some(29_000));
    assert_eq!(
        short.reset_at,
        Some(test_instant() + Duration::hours(3) + Duration::minutes(10))
    );
    assert_eq!(
        payload.reading(CapId::LongWindowAll).unwrap().usage_percent,
        18.5
    );
}

#[tokio::test]
async fn legacy_layout_is_partial() {
    let mut page = class_selector_page();

    let payload = ExtractionPipeline::default()
        .extract(&mut page, test_instant())
        .await
        .unwrap();

    assert_eq!(payload.status, PayloadStatus::Partial);
    assert_eq!(payload.found_count, 2);
    assert_eq!(payload.missing_caps(), vec![CapId::LongWindowRestricted]);

    let short = payload.reading(CapId::ShortWindow).unwrap();
    assert_eq!(short.usage_percent, 55.0);
    assert_eq!(short.confidence, Confidence::Fallback1);
    let weekly = payload.reading(CapId::LongWindowAll).unwrap();
    assert_eq!(weekly.reset_at, Some(test_instant() + Duration::days(2)));
}

#[tokio::test]
async fn login_page_has_no_usage() {
    let mut page = StaticPage::new().with_visible_text(&page_text("login.txt"));

    let err = ExtractionPipeline::default()
        .extract(&mut page, test_instant())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ExtractionFailed);
}

#[tokio::test]
async fn readings_are_stamped_with_extraction_time() {
    let mut page = data_attribute_page();
    let at = test_instant() + Duration::minutes(7);

    let payload = ExtractionPipeline::default().extract(&mut page, at).await.unwrap();

    assert_eq!(payload.scraped_at, at);
    assert!(payload.readings.iter().all(|r| r.extracted_at == at));
}

#[tokio::test]
async fn absurd_reset_countdown_leaves_reset_unset() {
    let mut page = StaticPage::new().with_visible_text(
        "Current session\nResets in 999999999 days\n12% used\n\
         Weekly limits\nAll models\nResets in 2 months\n30% used",
    );

    let payload = ExtractionPipeline::default()
        .extract(&mut page, test_instant())
        .await
        .unwrap();

    let short = payload.reading(CapId::ShortWindow).unwrap();
    assert_eq!(short.usage_percent, 12.0);
    assert_eq!(short.reset_at, None);
    assert_eq!(short.reset_text.as_deref(), Some("Resets in 999999999 days"));

    let weekly = payload.reading(CapId::LongWindowAll).unwrap();
    assert_eq!(weekly.usage_percent, 30.0);
    assert_eq!(weekly.reset_at, None);
    assert_eq!(weekly.reset_text.as_deref(), Some("Resets in 2 months"));
}
