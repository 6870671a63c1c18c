//! Configuration system for the telemetry device
//!
//! Loaded from a TOML file at startup and validated before anything
//! connects. The loop delay set here is only the initial value; it is
//! remote-tunable afterwards via the settings service.

use crate::encoding::PayloadSchema;
use crate::protocol::validate_device_id;
use crate::settings::{LOOP_DELAY_DEFAULT_S, LOOP_DELAY_MAX_S, LOOP_DELAY_MIN_S};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Top-level device configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    pub device: DeviceSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

/// Device identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Device identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
}

/// MQTT broker settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL with protocol and port; mqtts:// enables TLS
    pub broker_url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
}

/// Telemetry loop settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetrySection {
    /// Named stream the payloads publish under
    #[serde(default = "default_stream_key")]
    pub stream_key: String,
    /// Payload schema variant
    #[serde(default)]
    pub schema: PayloadSchema,
    /// Initial loop delay in seconds (remote-tunable at run time)
    #[serde(default = "default_loop_delay")]
    pub loop_delay_secs: u32,
    /// What to do when a sensor read fails
    #[serde(default)]
    pub on_sensor_failure: SensorFailurePolicy,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            stream_key: default_stream_key(),
            schema: PayloadSchema::default(),
            loop_delay_secs: default_loop_delay(),
            on_sensor_failure: SensorFailurePolicy::default(),
        }
    }
}

fn default_stream_key() -> String {
    "temp".to_string()
}

fn default_loop_delay() -> u32 {
    LOOP_DELAY_DEFAULT_S
}

/// Policy for cycles where the sensor read fails
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SensorFailurePolicy {
    /// Skip the publish for this cycle
    #[default]
    Skip,
    /// Re-publish the last successfully read sample, if any
    PublishLastKnown,
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid device ID: {0}")]
    InvalidDeviceId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DeviceConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: DeviceConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate identifier, delay range and stream key
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_device_id(&self.device.id)
            .map_err(|e| ConfigError::InvalidDeviceId(e.to_string()))?;

        let delay = self.telemetry.loop_delay_secs;
        if !(LOOP_DELAY_MIN_S..=LOOP_DELAY_MAX_S).contains(&delay) {
            return Err(ConfigError::InvalidConfig(format!(
                "loop_delay_secs {delay} outside [{LOOP_DELAY_MIN_S}, {LOOP_DELAY_MAX_S}]"
            )));
        }

        if self.telemetry.stream_key.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "stream_key must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
id = "test-device"

[mqtt]
broker_url = "mqtt://localhost:1883"

[telemetry]
stream_key = "weather"
schema = "weather"
loop_delay_secs = 5
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}
