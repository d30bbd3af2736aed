//! Core data models.
//!
//! These types are the payloads exchanged between the extraction pipeline,
//! the polling scheduler, the persisted stores and the display layer.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

// =============================================================================
// Caps
// =============================================================================

/// One of the three tracked usage caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapId {
    /// Short rolling window (a few hours).
    ShortWindow,
    /// Weekly window across all models.
    LongWindowAll,
    /// Weekly window for the restricted (premium) model.
    LongWindowRestricted,
}

impl CapId {
    pub const ALL: [Self; 3] = [
        Self::ShortWindow,
        Self::LongWindowAll,
        Self::LongWindowRestricted,
    ];

    /// Stable identifier, matching the serde representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ShortWindow => "short_window",
            Self::LongWindowAll => "long_window_all",
            Self::LongWindowRestricted => "long_window_restricted",
        }
    }

    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::ShortWindow => "Current session",
            Self::LongWindowAll => "Weekly (all models)",
            Self::LongWindowRestricted => "Weekly (Opus)",
        }
    }

    /// Heading the usage page shows above this cap.
    #[must_use]
    pub const fn page_label(self) -> &'static str {
        match self {
            Self::ShortWindow => "Current session",
            Self::LongWindowAll => "All models",
            Self::LongWindowRestricted => "Opus only",
        }
    }

    /// Position in page order.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::ShortWindow => 0,
            Self::LongWindowAll => 1,
            Self::LongWindowRestricted => 2,
        }
    }

    /// Parse a stable identifier or a short alias.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "short_window" | "session" | "short" => Some(Self::ShortWindow),
            "long_window_all" | "weekly" | "all_models" => Some(Self::LongWindowAll),
            "long_window_restricted" | "opus" | "restricted" => Some(Self::LongWindowRestricted),
            _ => None,
        }
    }
}

impl std::fmt::Display for CapId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which extraction strategy produced a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Confidence {
    #[serde(rename = "primary")]
    Primary,
    #[serde(rename = "fallback-1")]
    Fallback1,
    #[serde(rename = "fallback-2")]
    Fallback2,
    #[serde(rename = "text-heuristic")]
    TextHeuristic,
}

impl Confidence {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback1 => "fallback-1",
            Self::Fallback2 => "fallback-2",
            Self::TextHeuristic => "text-heuristic",
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Readings
// =============================================================================

/// One cap's usage as read from the page.
///
/// `usage_percent` is never clamped: values above 100 mean over-limit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageReading {
    pub id: CapId,
    pub usage_percent: f64,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_limit: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_remaining: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<DateTime<Utc>>,

    /// Reset text exactly as shown on the page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_text: Option<String>,

    pub extracted_at: DateTime<Utc>,
    pub confidence: Confidence,
}

impl UsageReading {
    /// Create a reading with only the percentage known.
    #[must_use]
    pub const fn new(
        id: CapId,
        usage_percent: f64,
        confidence: Confidence,
        extracted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            usage_percent,
            tokens_used: None,
            tokens_limit: None,
            tokens_remaining: None,
            reset_at: None,
            reset_text: None,
            extracted_at,
            confidence,
        }
    }

    /// Percentage left before the cap, floored at zero.
    #[must_use]
    pub fn remaining_percent(&self) -> f64 {
        (100.0 - self.usage_percent).max(0.0)
    }

    #[must_use]
    pub fn is_over_limit(&self) -> bool {
        self.usage_percent > 100.0
    }
}

/// What a single extraction strategy found for one cap.
///
/// Fields are optional because strategies may see only part of a cap; a raw
/// reading only becomes a [`UsageReading`] once it has a usable percentage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawReading {
    pub percent: Option<f64>,
    pub tokens_used: Option<u64>,
    pub tokens_limit: Option<u64>,
    pub tokens_remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
    pub reset_text: Option<String>,
}

impl RawReading {
    #[must_use]
    pub fn with_percent(percent: f64) -> Self {
        Self {
            percent: Some(percent),
            ..Self::default()
        }
    }

    /// Percentage to use: the explicit one, else derived from token counts.
    #[must_use]
    pub fn effective_percent(&self) -> Option<f64> {
        let percent = self.percent.or_else(|| match (self.tokens_used, self.tokens_limit) {
            #[allow(clippy::cast_precision_loss)]
            (Some(used), Some(limit)) if limit > 0 => Some(used as f64 / limit as f64 * 100.0),
            _ => None,
        })?;
        (percent.is_finite() && percent >= 0.0).then_some(percent)
    }

    /// Promote to a reading; `None` if no valid percentage exists.
    #[must_use]
    pub fn into_reading(
        self,
        id: CapId,
        confidence: Confidence,
        extracted_at: DateTime<Utc>,
    ) -> Option<UsageReading> {
        let usage_percent = self.effective_percent()?;
        let tokens_remaining = self.tokens_remaining.or_else(|| {
            self.tokens_limit
                .zip(self.tokens_used)
                .map(|(limit, used)| limit.saturating_sub(used))
        });
        Some(UsageReading {
            id,
            usage_percent,
            tokens_used: self.tokens_used,
            tokens_limit: self.tokens_limit,
            tokens_remaining,
            reset_at: self.reset_at,
            reset_text: self.reset_text,
            extracted_at,
            confidence,
        })
    }
}

// =============================================================================
// Cycle Payload
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadStatus {
    /// All three caps found.
    Ok,
    /// At least one but not all caps found.
    Partial,
    /// No caps found.
    Error,
}

impl PayloadStatus {
    #[must_use]
    pub const fn from_found_count(found: usize) -> Self {
        match found {
            0 => Self::Error,
            n if n >= CapId::ALL.len() => Self::Ok,
            _ => Self::Partial,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Partial => "partial",
            Self::Error => "error",
        }
    }
}

/// Result of one completed scrape cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CyclePayload {
    /// Readings in cap order; missing caps are absent, never zero-filled.
    pub readings: Vec<UsageReading>,
    pub found_count: usize,
    pub status: PayloadStatus,
    pub scraped_at: DateTime<Utc>,
}

impl CyclePayload {
    /// Build a payload, ordering readings by cap and dropping duplicate caps.
    #[must_use]
    pub fn from_readings(mut readings: Vec<UsageReading>, scraped_at: DateTime<Utc>) -> Self {
        readings.sort_by_key(|r| r.id);
        readings.dedup_by_key(|r| r.id);
        let found_count = readings.len();
        Self {
            readings,
            found_count,
            status: PayloadStatus::from_found_count(found_count),
            scraped_at,
        }
    }

    #[must_use]
    pub fn reading(&self, id: CapId) -> Option<&UsageReading> {
        self.readings.iter().find(|r| r.id == id)
    }

    #[must_use]
    pub fn missing_caps(&self) -> Vec<CapId> {
        CapId::ALL
            .into_iter()
            .filter(|id| self.reading(*id).is_none())
            .collect()
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.status, PayloadStatus::Error)
    }
}

// =============================================================================
// Session Credential
// =============================================================================

/// Opaque authentication artifact captured after a manual login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCredential {
    #[serde(serialize_with = "blob_to_base64", deserialize_with = "blob_from_base64")]
    pub blob: Vec<u8>,
    pub saved_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalidated_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invalidation_reason: Option<String>,
}

impl SessionCredential {
    #[must_use]
    pub const fn new(blob: Vec<u8>, saved_at: DateTime<Utc>) -> Self {
        Self {
            blob,
            saved_at,
            invalidated_at: None,
            invalidation_reason: None,
        }
    }

    #[must_use]
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.saved_at
    }

    /// True once the credential is older than `validity`.
    #[must_use]
    pub fn is_older_than(&self, validity: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) > validity
    }

    #[must_use]
    pub const fn is_invalidated(&self) -> bool {
        self.invalidated_at.is_some()
    }

    /// Short SHA-256 fingerprint, safe to log.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.blob);
        hex::encode(&digest[..6])
    }
}

fn blob_to_base64<S: Serializer>(blob: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&BASE64.encode(blob))
}

fn blob_from_base64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let encoded = String::deserialize(deserializer)?;
    BASE64
        .decode(encoded.as_bytes())
        .map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn confidence_serializes_with_hyphens() {
        assert_eq!(
            serde_json::to_string(&Confidence::Fallback1).unwrap(),
            "\"fallback-1\""
        );
        assert_eq!(
            serde_json::to_string(&Confidence::TextHeuristic).unwrap(),
            "\"text-heuristic\""
        );
    }

    #[test]
    fn cap_aliases_resolve() {
        assert_eq!(CapId::from_name("session"), Some(CapId::ShortWindow));
        assert_eq!(CapId::from_name("long-window-all"), Some(CapId::LongWindowAll));
        assert_eq!(CapId::from_name("opus"), Some(CapId::LongWindowRestricted));
        assert_eq!(CapId::from_name("daily"), None);
    }

    #[test]
    fn raw_reading_without_percent_is_rejected() {
        let raw = RawReading {
            reset_text: Some("resets in 2h".into()),
            ..RawReading::default()
        };
        assert!(raw.into_reading(CapId::ShortWindow, Confidence::Primary, at()).is_none());
    }

    #[test]
    fn raw_reading_rejects_negative_and_nan() {
        for bad in [-1.0, f64::NAN, f64::INFINITY] {
            let raw = RawReading::with_percent(bad);
            assert!(raw.into_reading(CapId::ShortWindow, Confidence::Primary, at()).is_none());
        }
    }

    #[test]
    fn over_limit_percent_is_not_clamped() {
        let reading = RawReading::with_percent(134.0)
            .into_reading(CapId::LongWindowAll, Confidence::Primary, at())
            .unwrap();
        assert!((reading.usage_percent - 134.0).abs() < f64::EPSILON);
        assert!(reading.is_over_limit());
        assert!(reading.remaining_percent().abs() < f64::EPSILON);
    }

    #[test]
    fn percent_derived_from_tokens_and_remaining_filled() {
        let raw = RawReading {
            tokens_used: Some(250),
            tokens_limit: Some(1000),
            ..RawReading::default()
        };
        let reading = raw
            .into_reading(CapId::ShortWindow, Confidence::TextHeuristic, at())
            .unwrap();
        assert!((reading.usage_percent - 25.0).abs() < 1e-9);
        assert_eq!(reading.tokens_remaining, Some(750));
    }

    #[test]
    fn payload_status_follows_found_count() {
        assert_eq!(PayloadStatus::from_found_count(0), PayloadStatus::Error);
        assert_eq!(PayloadStatus::from_found_count(1), PayloadStatus::Partial);
        assert_eq!(PayloadStatus::from_found_count(2), PayloadStatus::Partial);
        assert_eq!(PayloadStatus::from_found_count(3), PayloadStatus::Ok);
    }

    #[test]
    fn payload_orders_readings_by_cap() {
        let readings = vec![
            UsageReading::new(CapId::LongWindowRestricted, 5.0, Confidence::Primary, at()),
            UsageReading::new(CapId::ShortWindow, 40.0, Confidence::Primary, at()),
        ];
        let payload = CyclePayload::from_readings(readings, at());
        assert_eq!(payload.status, PayloadStatus::Partial);
        assert_eq!(payload.found_count, 2);
        assert_eq!(payload.readings[0].id, CapId::ShortWindow);
        assert_eq!(payload.missing_caps(), vec![CapId::LongWindowAll]);
    }

    #[test]
    fn payload_json_uses_camel_case() {
        let payload = CyclePayload::from_readings(
            vec![UsageReading::new(CapId::ShortWindow, 47.0, Confidence::TextHeuristic, at())],
            at(),
        );
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["foundCount"], 1);
        assert_eq!(json["status"], "partial");
        assert_eq!(json["readings"][0]["usagePercent"], 47.0);
        assert_eq!(json["readings"][0]["id"], "short_window");
        assert!(json["readings"][0].get("tokensUsed").is_none());
    }

    #[test]
    fn credential_blob_is_base64_on_disk() {
        let cred = SessionCredential::new(b"[{\"name\":\"sessionKey\"}]".to_vec(), at());
        let json = serde_json::to_string(&cred).unwrap();
        assert!(!json.contains("sessionKey"));
        let back: SessionCredential = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cred);
    }

    #[test]
    fn credential_age_and_fingerprint() {
        let cred = SessionCredential::new(vec![1, 2, 3], at());
        let later = at() + Duration::days(8);
        assert!(cred.is_older_than(Duration::days(7), later));
        assert!(!cred.is_older_than(Duration::days(7), at()));
        assert_eq!(cred.fingerprint().len(), 12);
    }
}
