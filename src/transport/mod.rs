//! Transport layer for device <-> cloud communication
//!
//! This module provides the transport abstraction and its MQTT
//! implementation. The trait exists so the work loop and settings service
//! can be exercised against mocks without a broker.

use crate::protocol::{SettingReport, SettingUpdate};

pub mod mqtt;

/// Transport trait for cloud communication
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Start the connection supervisor; returns once supervision is running,
    /// not once the broker has acknowledged
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Disconnect and stop the supervisor
    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Startup gate: resolve once the first connection is established.
    /// Waits indefinitely; an unreachable endpoint blocks forever by design.
    async fn wait_connected(&self) -> Result<(), Self::Error>;

    /// Subscribe to the remote settings topic; re-armed automatically on
    /// every reconnect afterwards
    async fn subscribe_to_settings(&mut self) -> Result<(), Self::Error>;

    /// Enqueue a telemetry payload for the named stream. Non-blocking; an
    /// error here means the submission itself failed, broker acknowledgement
    /// arrives later on the transport's own context.
    async fn publish_stream(
        &self,
        stream_key: &str,
        content_type: &str,
        payload: Vec<u8>,
    ) -> Result<(), Self::Error>;

    /// Report the outcome of a setting update back to the remote caller
    async fn publish_settings_status(&self, report: &SettingReport) -> Result<(), Self::Error>;

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool;

    /// Get current connection state
    fn connection_state(&self) -> Option<mqtt::ConnectionState>;

    /// Set the sender through which received setting updates are forwarded
    /// to the reconciler service
    fn set_settings_sender(&self, sender: tokio::sync::mpsc::Sender<SettingUpdate>);
}

/// Type alias for the MQTT transport
pub type MqttTransport = mqtt::MqttClient;
