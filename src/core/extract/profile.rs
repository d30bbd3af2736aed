//! Per-cap selector profiles.

use serde::{Deserialize, Serialize};

use crate::core::models::CapId;
use crate::storage::config::ExtractionConfig;

/// One family of CSS selectors for a cap.
///
/// Empty lists mean "not available in this tier".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectorTier {
    /// Elements whose text holds the usage percentage.
    pub percent: Vec<String>,
    /// Elements whose text holds the reset countdown or timestamp.
    pub reset: Vec<String>,
    /// Elements whose text holds `X of Y` token counts.
    pub tokens: Vec<String>,
    /// Progress bars read through `aria-valuenow`.
    pub progress: Vec<String>,
}

impl SelectorTier {
    fn of(percent: &[String], reset: &[String], tokens: &[String], progress: &[String]) -> Self {
        Self {
            percent: percent.to_vec(),
            reset: reset.to_vec(),
            tokens: tokens.to_vec(),
            progress: progress.to_vec(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.percent.is_empty()
            && self.reset.is_empty()
            && self.tokens.is_empty()
            && self.progress.is_empty()
    }
}

/// Everything the strategies need to find one cap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapProfile {
    pub cap: CapId,
    /// Heading text shown next to the cap on the usage page.
    pub label: String,
    pub primary: SelectorTier,
    pub class_based: SelectorTier,
    pub container: SelectorTier,
}

impl CapProfile {
    /// Built-in selectors for the usage page.
    #[must_use]
    pub fn builtin(cap: CapId) -> Self {
        let (testid, period, container) = match cap {
            CapId::ShortWindow => ("4hour", r#"[data-period="4h"]"#, "4hour"),
            CapId::LongWindowAll => ("1week", r#"[data-period="1w"]"#, "1week"),
            CapId::LongWindowRestricted => ("opus", r#"[data-model="opus"]"#, "opus"),
        };
        let s = |v: String| vec![v];

        Self {
            cap,
            label: cap.page_label().to_string(),
            primary: SelectorTier::of(
                &s(format!(r#"[data-testid="usage-{testid}-percent"]"#)),
                &s(format!(r#"[data-testid="usage-{testid}-reset"]"#)),
                &s(format!(r#"[data-testid="usage-{testid}-tokens"]"#)),
                &[],
            ),
            class_based: SelectorTier::of(
                &s(format!(".usage-metric{period} .percentage")),
                &s(format!(".usage-metric{period} .reset-time")),
                &s(format!(".usage-metric{period} .token-count")),
                &[],
            ),
            container: SelectorTier::of(
                &s(format!(r#"[data-cap="{container}"] .usage-percent"#)),
                &s(format!(r#"[data-cap="{container}"] .reset-timer"#)),
                &[],
                &s(format!(r#"[data-cap="{container}"] [role="progressbar"]"#)),
            ),
        }
    }

    /// Built-in profile with any configured overrides applied.
    #[must_use]
    pub fn configured(cap: CapId, config: &ExtractionConfig) -> Self {
        let mut profile = Self::builtin(cap);
        let overrides = config
            .caps
            .iter()
            .filter(|(name, _)| CapId::from_name(name) == Some(cap))
            .map(|(_, o)| o);
        for o in overrides {
            if let Some(label) = &o.label {
                profile.label.clone_from(label);
            }
            if let Some(tier) = &o.primary {
                profile.primary = tier.clone();
            }
            if let Some(tier) = &o.class_based {
                profile.class_based = tier.clone();
            }
            if let Some(tier) = &o.container {
                profile.container = tier.clone();
            }
        }
        profile
    }
}

/// A cap profile plus the context the text strategy needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapTarget {
    pub profile: CapProfile,
    /// Labels of the other caps, which bound this cap's text window.
    pub other_labels: Vec<String>,
    pub text_window: usize,
}

impl CapTarget {
    /// One target per cap, in page order.
    #[must_use]
    pub fn all(config: &ExtractionConfig) -> Vec<Self> {
        let profiles: Vec<CapProfile> = CapId::ALL
            .iter()
            .map(|cap| CapProfile::configured(*cap, config))
            .collect();
        profiles
            .iter()
            .map(|profile| Self {
                profile: profile.clone(),
                other_labels: profiles
                    .iter()
                    .filter(|other| other.cap != profile.cap)
                    .map(|other| other.label.clone())
                    .collect(),
                text_window: config.text_window_chars,
            })
            .collect()
    }

    #[must_use]
    pub const fn cap(&self) -> CapId {
        self.profile.cap
    }
}
