//! Usage extraction pipeline.
//!
//! Each cap is extracted independently by walking the strategy list in order
//! and keeping the first reading with a usable percentage. One cap failing
//! never hides the others; only a page with no readings at all is an error.

pub mod parse;
pub mod profile;
pub mod strategies;

use std::time::Instant;

use chrono::{DateTime, Utc};

pub use profile::{CapProfile, CapTarget, SelectorTier};
pub use strategies::{DEFAULT_STRATEGIES, Strategy, StrategyFn};

use crate::core::driver::PageHandle;
use crate::core::models::{CyclePayload, UsageReading};
use crate::error::{Result, WatchError};
use crate::storage::config::ExtractionConfig;

#[derive(Debug, Clone)]
pub struct ExtractionPipeline {
    targets: Vec<CapTarget>,
    strategies: Vec<Strategy>,
}

impl Default for ExtractionPipeline {
    fn default() -> Self {
        Self::new(&ExtractionConfig::default())
    }
}

impl ExtractionPipeline {
    #[must_use]
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            targets: CapTarget::all(config),
            strategies: DEFAULT_STRATEGIES.to_vec(),
        }
    }

    /// Replace the strategy list (order is preserved).
    #[must_use]
    pub fn with_strategies(mut self, strategies: Vec<Strategy>) -> Self {
        self.strategies = strategies;
        self
    }

    #[must_use]
    pub fn targets(&self) -> &[CapTarget] {
        &self.targets
    }

    #[must_use]
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name).collect()
    }

    /// Read every cap from the loaded page.
    ///
    /// Relative reset times are anchored at `extracted_at`.
    ///
    /// # Errors
    /// `ExtractionFailed` when no cap yields a reading, or the driver error
    /// when the browser dies mid-extraction.
    pub async fn extract(
        &self,
        page: &mut dyn PageHandle,
        extracted_at: DateTime<Utc>,
    ) -> Result<CyclePayload> {
        let start = Instant::now();
        let mut readings = Vec::with_capacity(self.targets.len());

        for target in &self.targets {
            if let Some(reading) = self.extract_cap(page, target, extracted_at).await? {
                readings.push(reading);
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        let duration_ms = start.elapsed().as_millis() as u64;

        if readings.is_empty() {
            tracing::warn!(
                strategies = self.strategies.len(),
                duration_ms,
                "No usage values found on page"
            );
            return Err(WatchError::ExtractionFailed {
                reason: format!(
                    "none of the {} caps matched any of {} strategies",
                    self.targets.len(),
                    self.strategies.len()
                ),
            });
        }

        let payload = CyclePayload::from_readings(readings, extracted_at);
        tracing::info!(
            found = payload.found_count,
            status = payload.status.as_str(),
            duration_ms,
            "Extraction finished"
        );
        Ok(payload)
    }

    async fn extract_cap(
        &self,
        page: &mut dyn PageHandle,
        target: &CapTarget,
        extracted_at: DateTime<Utc>,
    ) -> Result<Option<UsageReading>> {
        let cap = target.cap();

        for strategy in &self.strategies {
            match (strategy.run)(page, target).await {
                Ok(Some(mut raw)) => {
                    if raw.reset_at.is_none() {
                        raw.reset_at = raw
                            .reset_text
                            .as_deref()
                            .and_then(|text| parse::parse_reset_at(text, extracted_at));
                    }
                    if let Some(reading) = raw.into_reading(cap, strategy.confidence, extracted_at) {
                        tracing::debug!(
                            cap = cap.as_str(),
                            strategy = strategy.name,
                            percent = reading.usage_percent,
                            "Cap extracted"
                        );
                        return Ok(Some(reading));
                    }
                }
                Ok(None) => {
                    tracing::trace!(cap = cap.as_str(), strategy = strategy.name, "No match");
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(cap = cap.as_str(), strategy = strategy.name, error = %e, "Driver lost during extraction");
                    return Err(e.into());
                }
                Err(e) => {
                    tracing::warn!(
                        cap = cap.as_str(),
                        strategy = strategy.name,
                        error = %e,
                        "Strategy failed, trying next"
                    );
                }
            }
        }

        tracing::debug!(cap = cap.as_str(), "Cap not found by any strategy");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::driver::DriverError;
    use crate::core::models::{CapId, Confidence, PayloadStatus};
    use crate::error::ErrorKind;
    use crate::test_utils::StaticPage;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn primary_selectors_for_all_caps() {
        let mut page = StaticPage::new()
            .with_text(r#"[data-testid="usage-4hour-percent"]"#, "23%")
            .with_text(r#"[data-testid="usage-4hour-reset"]"#, "Resets in 2 hr 30 min")
            .with_text(r#"[data-testid="usage-4hour-tokens"]"#, "11,500 of 50,000")
            .with_text(r#"[data-testid="usage-1week-percent"]"#, "61%")
            .with_text(r#"[data-testid="usage-opus-percent"]"#, "5%");

        let payload = ExtractionPipeline::default().extract(&mut page, at()).await.unwrap();

        assert_eq!(payload.status, PayloadStatus::Ok);
        assert_eq!(payload.found_count, 3);
        let short = payload.reading(CapId::ShortWindow).unwrap();
        assert_eq!(short.usage_percent, 23.0);
        assert_eq!(short.confidence, Confidence::Primary);
        assert_eq!(short.tokens_remaining, Some(38_500));
        assert_eq!(short.reset_at, Some(Utc.with_ymd_and_hms(2025, 1, 1, 2, 30, 0).unwrap()));
        assert_eq!(short.reset_text.as_deref(), Some("Resets in 2 hr 30 min"));
    }

    #[tokio::test]
    async fn falls_back_per_cap() {
        let mut page = StaticPage::new()
            .with_text(r#"[data-testid="usage-4hour-percent"]"#, "10%")
            .with_text(r#".usage-metric[data-period="1w"] .percentage"#, "40 %")
            .with_attribute(
                r#"[data-cap="opus"] [role="progressbar"]"#,
                "aria-valuenow",
                "7",
            );

        let payload = ExtractionPipeline::default().extract(&mut page, at()).await.unwrap();
        assert_eq!(payload.found_count, 3);
        assert_eq!(
            payload.reading(CapId::LongWindowAll).unwrap().confidence,
            Confidence::Fallback1
        );
        let opus = payload.reading(CapId::LongWindowRestricted).unwrap();
        assert_eq!(opus.confidence, Confidence::Fallback2);
        assert_eq!(opus.usage_percent, 7.0);
    }

    #[tokio::test]
    async fn text_only_page_uses_heuristic() {
        let mut page = StaticPage::new().with_visible_text("Plan usage\n47% used");
        let payload = ExtractionPipeline::default().extract(&mut page, at()).await.unwrap();

        assert_eq!(payload.status, PayloadStatus::Partial);
        let reading = payload.reading(CapId::ShortWindow).unwrap();
        assert_eq!(reading.usage_percent, 47.0);
        assert_eq!(reading.confidence, Confidence::TextHeuristic);
        assert_eq!(payload.missing_caps().len(), 2);
    }

    #[tokio::test]
    async fn unparseable_reset_keeps_text() {
        let mut page = StaticPage::new()
            .with_text(r#"[data-testid="usage-1week-percent"]"#, "80%")
            .with_text(r#"[data-testid="usage-1week-reset"]"#, "Resets Thu 9:00 AM");
        let payload = ExtractionPipeline::default().extract(&mut page, at()).await.unwrap();
        let weekly = payload.reading(CapId::LongWindowAll).unwrap();
        assert_eq!(weekly.reset_at, None);
        assert_eq!(weekly.reset_text.as_deref(), Some("Resets Thu 9:00 AM"));
    }

    #[tokio::test]
    async fn over_limit_is_not_clamped() {
        let mut page =
            StaticPage::new().with_text(r#"[data-testid="usage-4hour-percent"]"#, "134%");
        let payload = ExtractionPipeline::default().extract(&mut page, at()).await.unwrap();
        let reading = payload.reading(CapId::ShortWindow).unwrap();
        assert_eq!(reading.usage_percent, 134.0);
        assert!(reading.is_over_limit());
    }

    #[tokio::test]
    async fn empty_page_is_extraction_failure() {
        let mut page = StaticPage::new().with_visible_text("Welcome back");
        let err = ExtractionPipeline::default().extract(&mut page, at()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExtractionFailed);
    }

    #[tokio::test]
    async fn script_errors_fall_through() {
        let mut page = StaticPage::new()
            .with_query_error(
                r#"[data-testid="usage-4hour-percent"]"#,
                DriverError::Script("stale element".into()),
            )
            .with_text(r#".usage-metric[data-period="4h"] .percentage"#, "12%");
        let payload = ExtractionPipeline::default().extract(&mut page, at()).await.unwrap();
        assert_eq!(
            payload.reading(CapId::ShortWindow).unwrap().confidence,
            Confidence::Fallback1
        );
    }

    #[tokio::test]
    async fn crashed_driver_aborts() {
        let mut page = StaticPage::new().with_query_error(
            r#"[data-testid="usage-4hour-percent"]"#,
            DriverError::Crashed("gone".into()),
        );
        let err = ExtractionPipeline::default().extract(&mut page, at()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fatal);
    }

    #[tokio::test]
    async fn custom_strategy_order() {
        let strategies = vec![DEFAULT_STRATEGIES[3]];
        let pipeline = ExtractionPipeline::default().with_strategies(strategies);
        assert_eq!(pipeline.strategy_names(), vec!["text-heuristic"]);

        let mut page = StaticPage::new()
            .with_text(r#"[data-testid="usage-4hour-percent"]"#, "99%")
            .with_visible_text("Current session 3% used");
        let payload = pipeline.extract(&mut page, at()).await.unwrap();
        assert_eq!(payload.reading(CapId::ShortWindow).unwrap().usage_percent, 3.0);
    }
}
