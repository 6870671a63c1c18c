//! Pure connection state management for the MQTT transport
//!
//! Connection state, reconnect backoff, option construction and topic
//! building live here; everything is testable without a broker.

use crate::config::MqttSection;
use crate::protocol::canonicalize_topic;
use rumqttc::v5::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Connection state broadcast by the supervisor
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Initial state - attempting to connect
    Connecting,
    /// Successfully connected and ready for operations
    Connected,
    /// Disconnected with reason
    Disconnected(String),
    /// Attempting to reconnect (attempt count)
    Reconnecting(u32),
}

/// Reconnection backoff configuration
///
/// Retries are unlimited: the device waits for connectivity forever rather
/// than giving up, since sampling without telemetry has no value.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Per-attempt delays in milliseconds before the sustained delay applies
    pub backoff_pattern: Vec<u64>,
    /// Delay used once the pattern is exhausted
    pub sustained_delay: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            backoff_pattern: vec![250, 500, 1000, 2000],
            sustained_delay: 5000,
        }
    }
}

impl ReconnectConfig {
    /// Backoff delay for the given attempt (1-based)
    pub fn calculate_backoff_delay(&self, attempt: u32) -> u64 {
        if self.backoff_pattern.is_empty() {
            return self.sustained_delay;
        }
        let index = (attempt.saturating_sub(1)) as usize;
        if index < self.backoff_pattern.len() {
            self.backoff_pattern[index]
        } else {
            self.sustained_delay
        }
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Subscription failed")]
    SubscriptionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Serialization error")]
    SerializationError(#[source] serde_json::Error),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },
    #[error("Connection failed: {0}")]
    ConnectionFailedStr(String),
}

/// Build rumqttc options from configuration
pub fn configure_mqtt_options(
    device_id: &str,
    config: &MqttSection,
) -> Result<MqttOptions, MqttError> {
    let url = Url::parse(&config.broker_url)
        .map_err(|_| MqttError::InvalidBrokerUrl(config.broker_url.clone()))?;

    let host = url
        .host_str()
        .ok_or_else(|| MqttError::InvalidBrokerUrl(config.broker_url.clone()))?;
    let port = url
        .port()
        .unwrap_or(if url.scheme() == "mqtts" { 8883 } else { 1883 });

    // Unique client ID per connection attempt to prevent broker conflicts
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let client_id = format!("dev-{device_id}-{timestamp}");
    let mut mqtt_options = MqttOptions::new(client_id, host, port);

    if url.scheme() == "mqtts" {
        let transport = RumqttcTransport::tls_with_default_config();
        mqtt_options.set_transport(transport);
    }

    // Credentials come from the environment, never from the config file
    if let Some(username_env) = &config.username_env {
        if let Ok(username) = std::env::var(username_env) {
            let password = config
                .password_env
                .as_ref()
                .and_then(|env_name| std::env::var(env_name).ok())
                .unwrap_or_default();
            mqtt_options.set_credentials(&username, &password);
        }
    }

    mqtt_options.set_keep_alive(Duration::from_secs(60));

    // Telemetry payloads are tiny; 16KB leaves headroom for broker frames
    mqtt_options.set_max_packet_size(Some(16 * 1024));

    Ok(mqtt_options)
}

/// Topic construction for the device's uplink and downlink channels
pub struct TopicBuilder;

impl TopicBuilder {
    /// Settings downlink: `/devices/{device_id}/settings`
    pub fn settings_topic(device_id: &str) -> String {
        canonicalize_topic(&format!("/devices/{device_id}/settings"))
    }

    /// Settings outcome uplink: `/devices/{device_id}/settings/status`
    pub fn settings_status_topic(device_id: &str) -> String {
        canonicalize_topic(&format!("/devices/{device_id}/settings/status"))
    }

    /// Telemetry uplink: `/devices/{device_id}/stream/{stream_key}`
    pub fn stream_topic(device_id: &str, stream_key: &str) -> String {
        canonicalize_topic(&format!("/devices/{device_id}/stream/{stream_key}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_config_default() {
        let config = ReconnectConfig::default();
        assert_eq!(config.backoff_pattern, vec![250, 500, 1000, 2000]);
        assert_eq!(config.sustained_delay, 5000);
    }

    #[test]
    fn test_calculate_backoff_delay() {
        let config = ReconnectConfig::default();

        assert_eq!(config.calculate_backoff_delay(1), 250);
        assert_eq!(config.calculate_backoff_delay(2), 500);
        assert_eq!(config.calculate_backoff_delay(3), 1000);
        assert_eq!(config.calculate_backoff_delay(4), 2000);

        // Sustained delay after pattern exhausted
        assert_eq!(config.calculate_backoff_delay(5), 5000);
        assert_eq!(config.calculate_backoff_delay(100), 5000);
    }

    #[test]
    fn test_empty_pattern_uses_sustained_delay() {
        let config = ReconnectConfig {
            backoff_pattern: vec![],
            sustained_delay: 1234,
        };
        assert_eq!(config.calculate_backoff_delay(1), 1234);
    }

    #[test]
    fn test_topic_construction() {
        assert_eq!(
            TopicBuilder::settings_topic("greenhouse-7"),
            "/devices/greenhouse-7/settings"
        );
        assert_eq!(
            TopicBuilder::settings_status_topic("greenhouse-7"),
            "/devices/greenhouse-7/settings/status"
        );
        assert_eq!(
            TopicBuilder::stream_topic("greenhouse-7", "weather"),
            "/devices/greenhouse-7/stream/weather"
        );
    }

    #[test]
    fn test_topic_canonicalization() {
        assert_eq!(
            TopicBuilder::stream_topic("dev//", "//temp"),
            "/devices/dev/stream/temp"
        );
    }

    #[test]
    fn test_connection_state_equality() {
        assert_eq!(ConnectionState::Connected, ConnectionState::Connected);
        assert_eq!(
            ConnectionState::Disconnected("test".to_string()),
            ConnectionState::Disconnected("test".to_string())
        );
        assert_ne!(
            ConnectionState::Connected,
            ConnectionState::Reconnecting(1)
        );
    }

    fn test_mqtt_config() -> MqttSection {
        MqttSection {
            broker_url: "mqtt://localhost:1883".to_string(),
            username_env: None,
            password_env: None,
        }
    }

    #[test]
    fn test_configure_mqtt_options() {
        let config = test_mqtt_config();
        let options = configure_mqtt_options("test-device", &config);
        assert!(options.is_ok());
    }

    #[test]
    fn test_invalid_broker_url() {
        let mut config = test_mqtt_config();
        config.broker_url = "invalid-url".to_string();

        let result = configure_mqtt_options("test-device", &config);
        assert!(matches!(result, Err(MqttError::InvalidBrokerUrl(_))));
    }

    #[test]
    fn test_mqtt_error_display() {
        let errors = vec![
            MqttError::ConnectionFailed("test".to_string().into()),
            MqttError::PublishFailed("test".to_string().into()),
            MqttError::SubscriptionFailed("test".to_string().into()),
            MqttError::InvalidBrokerUrl("test".to_string()),
            MqttError::NotConnected {
                state: ConnectionState::Disconnected("test".to_string()),
            },
            MqttError::ConnectionFailedStr("test".to_string()),
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }
}
