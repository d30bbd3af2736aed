//! Ordered extraction strategies, most specific first.

use futures::FutureExt;
use futures::future::BoxFuture;

use super::parse::{self, TextQuery};
use super::profile::{CapTarget, SelectorTier};
use crate::core::driver::{DriverResult, PageHandle};
use crate::core::models::{Confidence, RawReading};

/// Signature every strategy implements.
pub type StrategyFn =
    for<'a> fn(&'a mut dyn PageHandle, &'a CapTarget) -> BoxFuture<'a, DriverResult<Option<RawReading>>>;

/// A named extraction strategy and the confidence its readings carry.
#[derive(Clone, Copy)]
pub struct Strategy {
    pub name: &'static str,
    pub confidence: Confidence,
    pub run: StrategyFn,
}

impl std::fmt::Debug for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategy")
            .field("name", &self.name)
            .field("confidence", &self.confidence)
            .finish_non_exhaustive()
    }
}

pub const DEFAULT_STRATEGIES: &[Strategy] = &[
    Strategy {
        name: "data-attribute",
        confidence: Confidence::Primary,
        run: data_attribute,
    },
    Strategy {
        name: "class-selector",
        confidence: Confidence::Fallback1,
        run: class_selector,
    },
    Strategy {
        name: "cap-container",
        confidence: Confidence::Fallback2,
        run: cap_container,
    },
    Strategy {
        name: "text-heuristic",
        confidence: Confidence::TextHeuristic,
        run: text_heuristic,
    },
];

fn data_attribute<'a>(
    page: &'a mut dyn PageHandle,
    target: &'a CapTarget,
) -> BoxFuture<'a, DriverResult<Option<RawReading>>> {
    read_tier(page, &target.profile.primary).boxed()
}

fn class_selector<'a>(
    page: &'a mut dyn PageHandle,
    target: &'a CapTarget,
) -> BoxFuture<'a, DriverResult<Option<RawReading>>> {
    read_tier(page, &target.profile.class_based).boxed()
}

fn cap_container<'a>(
    page: &'a mut dyn PageHandle,
    target: &'a CapTarget,
) -> BoxFuture<'a, DriverResult<Option<RawReading>>> {
    read_tier(page, &target.profile.container).boxed()
}

fn text_heuristic<'a>(
    page: &'a mut dyn PageHandle,
    target: &'a CapTarget,
) -> BoxFuture<'a, DriverResult<Option<RawReading>>> {
    async move {
        let text = page.visible_text().await?;
        let query = TextQuery {
            label: &target.profile.label,
            other_labels: &target.other_labels,
            index: target.cap().index(),
            window_chars: target.text_window,
        };
        Ok(parse::text_heuristic(&text, &query))
    }
    .boxed()
}

async fn first_text(page: &mut dyn PageHandle, selectors: &[String]) -> DriverResult<Option<String>> {
    for selector in selectors {
        if let Some(text) = page.query_text(selector).await? {
            if !text.trim().is_empty() {
                return Ok(Some(text));
            }
        }
    }
    Ok(None)
}

/// Read one selector tier; `None` unless a usable percentage was found.
async fn read_tier(page: &mut dyn PageHandle, tier: &SelectorTier) -> DriverResult<Option<RawReading>> {
    if tier.is_empty() {
        return Ok(None);
    }

    let mut raw = RawReading::default();

    if let Some(text) = first_text(page, &tier.percent).await? {
        raw.percent = parse::parse_percent(&text);
    }
    if raw.percent.is_none() {
        for selector in &tier.progress {
            if let Some(value) = page.query_attribute(selector, "aria-valuenow").await? {
                if let Ok(percent) = value.trim().parse::<f64>() {
                    raw.percent = Some(percent);
                    break;
                }
            }
        }
    }
    if let Some(text) = first_text(page, &tier.tokens).await? {
        if let Some((used, limit)) = parse::parse_token_pair(&text) {
            raw.tokens_used = Some(used);
            raw.tokens_limit = Some(limit);
        }
    }
    if let Some(text) = first_text(page, &tier.reset).await? {
        raw.reset_text = Some(text.trim().to_string());
    }

    Ok(raw.effective_percent().is_some().then_some(raw))
}
