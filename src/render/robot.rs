//! JSON output for scripts and agents.
//!
//! Every document is wrapped in a [`RobotOutput`] envelope with a stable
//! schema version so consumers can detect format changes.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;

pub const SCHEMA_VERSION: &str = "usagewatch.v1";

/// Envelope for all JSON documents written to stdout.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RobotOutput<T: Serialize> {
    pub schema_version: &'static str,
    pub command: &'static str,
    pub generated_at: DateTime<Utc>,
    pub data: T,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl<T: Serialize> RobotOutput<T> {
    pub fn new(command: &'static str, data: T, generated_at: DateTime<Utc>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            command,
            generated_at,
            data,
            errors: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.errors = errors;
        self
    }
}

/// Serialize to compact or pretty JSON.
///
/// # Errors
/// Propagates serialization failures.
pub fn render_json<T: Serialize>(output: &T, pretty: bool) -> Result<String> {
    if pretty {
        Ok(serde_json::to_string_pretty(output)?)
    } else {
        Ok(serde_json::to_string(output)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{make_test_payload, test_instant};

    #[test]
    fn envelope_shape() {
        let doc = RobotOutput::new("poll", make_test_payload(), test_instant());
        let value: serde_json::Value =
            serde_json::from_str(&render_json(&doc, false).unwrap()).unwrap();
        assert_eq!(value["schemaVersion"], SCHEMA_VERSION);
        assert_eq!(value["command"], "poll");
        assert_eq!(value["data"]["foundCount"], 3);
        assert!(value.get("errors").is_none());
    }

    #[test]
    fn errors_are_listed_when_present() {
        let doc = RobotOutput::new("status", (), test_instant())
            .with_errors(vec!["cache missing".to_string()]);
        let value: serde_json::Value =
            serde_json::from_str(&render_json(&doc, true).unwrap()).unwrap();
        assert_eq!(value["errors"][0], "cache missing");
    }
}
