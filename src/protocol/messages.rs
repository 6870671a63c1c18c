//! Message structures for the device <-> cloud settings exchange
//!
//! A setting update arrives as a `{"key": ..., "value": ...}` JSON object on
//! the device settings topic. The outcome of applying it is reported back as
//! a [`SettingReport`] so the remote caller can distinguish failure classes.

use serde::{Deserialize, Serialize};

/// Content type tag attached to telemetry stream publishes
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// A remote setting update pushed from the cloud endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettingUpdate {
    /// Setting key, e.g. `LOOP_DELAY_S`
    pub key: String,
    /// Raw JSON value; type validation happens in the reconciler
    pub value: serde_json::Value,
}

/// Outcome class of a setting update, reported back to the remote caller
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettingStatus {
    /// Accepted (including the idempotent same-value case)
    Success,
    /// Declared type is not an integer
    FormatInvalid,
    /// Integer outside the permitted range
    OutOfRange,
    /// Key is not one this device recognizes
    KeyNotRecognized,
}

/// Structured report published to the settings status topic
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SettingReport {
    pub key: String,
    pub status: SettingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SettingReport {
    pub fn new(key: &str, status: SettingStatus) -> Self {
        Self {
            key: key.to_string(),
            status,
            message: None,
        }
    }

    pub fn with_message<S: Into<String>>(key: &str, status: SettingStatus, message: S) -> Self {
        Self {
            key: key.to_string(),
            status,
            message: Some(message.into()),
        }
    }

    /// Whether the update was applied or accepted as a no-op
    pub fn is_success(&self) -> bool {
        self.status == SettingStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_setting_update_round_trip() {
        let update = SettingUpdate {
            key: "LOOP_DELAY_S".to_string(),
            value: json!(30),
        };

        let encoded = serde_json::to_string(&update).unwrap();
        let decoded: SettingUpdate = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, update);
    }

    #[test]
    fn test_setting_update_preserves_value_type() {
        let parsed: SettingUpdate =
            serde_json::from_str(r#"{"key":"LOOP_DELAY_S","value":"sixty"}"#).unwrap();
        assert!(parsed.value.is_string());

        let parsed: SettingUpdate =
            serde_json::from_str(r#"{"key":"LOOP_DELAY_S","value":60.5}"#).unwrap();
        assert!(parsed.value.is_f64());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let report = SettingReport::new("FOO", SettingStatus::KeyNotRecognized);
        let encoded = serde_json::to_string(&report).unwrap();
        assert!(encoded.contains("key_not_recognized"));

        let report = SettingReport::new("LOOP_DELAY_S", SettingStatus::FormatInvalid);
        let encoded = serde_json::to_string(&report).unwrap();
        assert!(encoded.contains("format_invalid"));
    }

    #[test]
    fn test_report_omits_empty_message() {
        let report = SettingReport::new("LOOP_DELAY_S", SettingStatus::Success);
        let encoded = serde_json::to_string(&report).unwrap();
        assert!(!encoded.contains("message"));
        assert!(report.is_success());
    }

    #[test]
    fn test_report_with_message() {
        let report = SettingReport::with_message(
            "LOOP_DELAY_S",
            SettingStatus::OutOfRange,
            "value must be within [1, 43200] seconds",
        );
        let encoded = serde_json::to_string(&report).unwrap();
        assert!(encoded.contains("43200"));
        assert!(!report.is_success());
    }
}
