//! Device startup sequence with dependency injection
//!
//! Wires the transport, the sensor, the settings reconciler service, and the
//! work loop together. The transport and sensor are injected so the whole
//! sequence runs against mocks in tests.

use crate::config::DeviceConfig;
use crate::device::work_loop::WorkLoop;
use crate::error::DeviceError;
use crate::sensor::SensorReader;
use crate::settings::{run_settings_service, SettingsHandle, SettingsReconciler};
use crate::transport::Transport;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Capacity of the settings update channel between transport and reconciler
const SETTINGS_CHANNEL_CAPACITY: usize = 8;

/// Orchestrates device startup and runs until a fatal error
pub struct DeviceLifecycle<T, S>
where
    T: Transport + 'static,
    S: SensorReader + 'static,
{
    config: DeviceConfig,
    transport: T,
    sensor: S,
    settings: SettingsHandle,
}

impl<T, S> DeviceLifecycle<T, S>
where
    T: Transport + 'static,
    S: SensorReader + 'static,
{
    pub fn new(config: DeviceConfig, transport: T, sensor: S) -> Self {
        let settings = SettingsHandle::new(config.telemetry.loop_delay_secs);
        Self {
            config,
            transport,
            sensor,
            settings,
        }
    }

    /// Shared settings view, for observing the live loop delay
    pub fn settings_handle(&self) -> SettingsHandle {
        self.settings.clone()
    }

    /// Run the full device sequence: connect, arm the settings subscription,
    /// start the reconciler service, then hand control to the work loop.
    ///
    /// Consumes the lifecycle; returns only on a fatal error.
    pub async fn run(mut self) -> Result<(), DeviceError> {
        info!(device_id = %self.config.device.id, "Starting device");

        if !self.sensor.is_ready() {
            // Unready sensor is not fatal; reads fail per-cycle instead
            warn!("Sensor device reported not ready at startup");
        }

        self.transport
            .connect()
            .await
            .map_err(DeviceError::transport)?;

        // Sender first, subscription second: a retained settings message
        // delivered the instant the subscription lands must find a sender
        let (settings_tx, settings_rx) = mpsc::channel(SETTINGS_CHANNEL_CAPACITY);
        self.transport.set_settings_sender(settings_tx);
        self.transport
            .subscribe_to_settings()
            .await
            .map_err(DeviceError::transport)?;

        let transport = Arc::new(self.transport);
        let reconciler = SettingsReconciler::new(self.settings.clone());
        let service_handle = tokio::spawn(run_settings_service(
            settings_rx,
            reconciler,
            transport.clone(),
        ));

        let mut work_loop = WorkLoop::new(
            self.config.telemetry.clone(),
            transport,
            self.sensor,
            self.settings.clone(),
        );
        let result = work_loop.run().await;

        service_handle.abort();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::protocol::{SettingStatus, SettingUpdate};
    use crate::sensor::{Measurement, SampleSet};
    use crate::settings::LOOP_DELAY_KEY;
    use crate::testing::mocks::{MockSensor, MockTransport};
    use serde_json::json;
    use std::time::Duration;

    fn steady_sensor() -> MockSensor {
        MockSensor::steady(SampleSet {
            temperature: Measurement::from_f64(21.5),
            ..SampleSet::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_publishes_on_cadence() {
        let transport = MockTransport::new();
        let probe = transport.clone();
        let lifecycle =
            DeviceLifecycle::new(DeviceConfig::test_config(), transport, steady_sensor());

        let handle = tokio::spawn(lifecycle.run());

        // Default delay is 5s; 11s of virtual time covers three cycles
        tokio::time::sleep(Duration::from_secs(11)).await;

        let published = probe.published_streams().await;
        assert_eq!(published.len(), 3);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_wires_settings_reconciler() {
        let transport = MockTransport::new();
        let probe = transport.clone();
        let lifecycle =
            DeviceLifecycle::new(DeviceConfig::test_config(), transport, steady_sensor());
        let settings = lifecycle.settings_handle();

        let handle = tokio::spawn(lifecycle.run());
        tokio::time::sleep(Duration::from_millis(10)).await;

        probe
            .inject_setting(SettingUpdate {
                key: LOOP_DELAY_KEY.to_string(),
                value: json!(60),
            })
            .await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(settings.loop_delay_secs(), 60);
        let reports = probe.published_reports().await;
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].status, SettingStatus::Success);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_settings_sender_installed_before_subscription() {
        let transport = MockTransport::new();
        let probe = transport.clone();
        let lifecycle =
            DeviceLifecycle::new(DeviceConfig::test_config(), transport, steady_sensor());

        let handle = tokio::spawn(lifecycle.run());
        tokio::time::sleep(Duration::from_millis(10)).await;

        // A retained settings message can arrive the moment the
        // subscription lands, so the sender must already be in place
        assert_eq!(probe.sender_present_at_subscribe(), vec![true]);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_lifecycle_blocks_until_connected() {
        let transport = MockTransport::disconnected();
        let probe = transport.clone();
        let lifecycle =
            DeviceLifecycle::new(DeviceConfig::test_config(), transport, steady_sensor());

        let handle = tokio::spawn(lifecycle.run());
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(probe.published_streams().await.is_empty());

        probe.set_connected(true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(probe.published_streams().await.len(), 1);
        handle.abort();
    }
}
