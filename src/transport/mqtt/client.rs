//! Impure I/O operations for the MQTT client
//!
//! Owns the rumqttc client and event loop, the connection supervisor task,
//! and the publish/subscribe surface used by the work loop and settings
//! service. Publishes are fire-and-forget: the synchronous result covers
//! submission only, and broker PubAcks are consumed on the supervisor task.

use super::connection::{
    configure_mqtt_options, ConnectionState, MqttError, ReconnectConfig, TopicBuilder,
};
use super::message_handler::{EventRoute, MessageHandler, SettingsForwarder};
use crate::config::MqttSection;
use crate::protocol::{SettingReport, SettingUpdate};
use crate::transport::Transport;
use async_trait::async_trait;
use rumqttc::v5::mqttbytes::v5::PublishProperties;
use rumqttc::v5::{mqttbytes::QoS, AsyncClient, EventLoop};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// MQTT transport client for the telemetry device
pub struct MqttClient {
    device_id: String,
    client: Arc<Mutex<AsyncClient>>,
    event_loop: Option<Arc<Mutex<EventLoop>>>,
    config: MqttSection,
    event_loop_handle: Option<JoinHandle<()>>,
    state_rx: Option<watch::Receiver<ConnectionState>>,
    state_tx: Option<watch::Sender<ConnectionState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    reconnect_config: ReconnectConfig,
    // Shared with the supervisor so re-subscription sees late additions
    subscribed_topics: Arc<Mutex<Vec<String>>>,
    settings_forwarder: Arc<SettingsForwarder>,
}

impl MqttClient {
    pub fn new(device_id: &str, config: MqttSection) -> Result<Self, MqttError> {
        let mqtt_options = configure_mqtt_options(device_id, &config)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, 10);

        Ok(MqttClient {
            device_id: device_id.to_string(),
            client: Arc::new(Mutex::new(client)),
            event_loop: Some(Arc::new(Mutex::new(event_loop))),
            config,
            event_loop_handle: None,
            state_rx: None,
            state_tx: None,
            shutdown_tx: None,
            reconnect_config: ReconnectConfig::default(),
            subscribed_topics: Arc::new(Mutex::new(Vec::new())),
            settings_forwarder: Arc::new(SettingsForwarder::new()),
        })
    }

    /// Create a fresh client + event loop pair for a reconnection attempt
    fn create_connection(
        device_id: &str,
        config: &MqttSection,
    ) -> Result<(AsyncClient, EventLoop), MqttError> {
        let mqtt_options = configure_mqtt_options(device_id, config)?;
        Ok(AsyncClient::new(mqtt_options, 10))
    }

    /// Create connection state and shutdown channels
    #[allow(clippy::type_complexity)]
    fn setup_connection_channels() -> (
        (
            watch::Sender<ConnectionState>,
            watch::Receiver<ConnectionState>,
        ),
        (watch::Sender<bool>, watch::Receiver<bool>),
    ) {
        let state_channels = watch::channel(ConnectionState::Connecting);
        let shutdown_channels = watch::channel(false);
        (state_channels, shutdown_channels)
    }

    /// Spawn the connection supervisor.
    ///
    /// Returns once supervision is running; callers gate on
    /// [`MqttClient::wait_connected`] for the first ConnAck. Reconnection is
    /// unlimited with backoff, and tracked subscriptions are re-armed on
    /// every ConnAck.
    pub async fn connect(&mut self) -> Result<(), MqttError> {
        let event_loop = self.event_loop.take().ok_or_else(|| {
            MqttError::ConnectionFailedStr("Event loop already started".to_string())
        })?;

        let ((state_tx, state_rx), (shutdown_tx, mut shutdown_rx)) =
            Self::setup_connection_channels();
        self.state_rx = Some(state_rx);
        self.state_tx = Some(state_tx.clone());
        self.shutdown_tx = Some(shutdown_tx);

        let device_id = self.device_id.clone();
        let config = self.config.clone();
        let shared_client = self.client.clone();
        let reconnect_config = self.reconnect_config.clone();
        let subscribed_topics = self.subscribed_topics.clone();
        let settings_forwarder = self.settings_forwarder.clone();

        let handle = tokio::spawn(async move {
            info!("Starting MQTT connection supervisor for device: {}", device_id);
            let mut reconnect_attempts = 0u32;
            let mut current_event_loop = event_loop;

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("Shutdown signal received, stopping connection supervisor");
                            break;
                        }
                    }

                    event_result = async {
                        let mut event_loop_guard = current_event_loop.lock().await;
                        event_loop_guard.poll().await
                    } => {
                        match event_result {
                            Ok(event) => {
                                Self::process_event(
                                    MessageHandler::route_mqtt_event(&event),
                                    &state_tx,
                                    &mut reconnect_attempts,
                                    &shared_client,
                                    &subscribed_topics,
                                    &settings_forwarder,
                                    &device_id,
                                )
                                .await;
                            }
                            Err(e) => {
                                error!("MQTT event loop error for device {}: {}", device_id, e);
                                let _ = state_tx.send(ConnectionState::Disconnected(e.to_string()));
                                if !Self::reconnect_after_backoff(
                                    &mut reconnect_attempts,
                                    &reconnect_config,
                                    shutdown_rx.clone(),
                                    &state_tx,
                                    &mut current_event_loop,
                                    &device_id,
                                    &config,
                                    &shared_client,
                                )
                                .await
                                {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            info!("MQTT connection supervisor stopped for device: {}", device_id);
        });

        self.event_loop_handle = Some(handle);
        Ok(())
    }

    /// Startup gate: await the first (or next) ConnAck indefinitely
    pub async fn wait_connected(&self) -> Result<(), MqttError> {
        let mut state_rx = self.state_rx.clone().ok_or_else(|| {
            MqttError::ConnectionFailedStr("connect() has not been called".to_string())
        })?;

        loop {
            if matches!(*state_rx.borrow_and_update(), ConnectionState::Connected) {
                return Ok(());
            }
            if state_rx.changed().await.is_err() {
                return Err(MqttError::ConnectionFailedStr(
                    "Connection supervisor stopped".to_string(),
                ));
            }
        }
    }

    /// Handle one routed event on the supervisor task
    async fn process_event(
        route: EventRoute,
        state_tx: &watch::Sender<ConnectionState>,
        reconnect_attempts: &mut u32,
        shared_client: &Arc<Mutex<AsyncClient>>,
        subscribed_topics: &Arc<Mutex<Vec<String>>>,
        settings_forwarder: &Arc<SettingsForwarder>,
        device_id: &str,
    ) {
        match route {
            EventRoute::ConnectionAcknowledged => {
                info!("Broker acknowledged connection");
                let _ = state_tx.send(ConnectionState::Connected);
                *reconnect_attempts = 0;
                // Re-arms the settings subscription after every reconnect
                Self::resubscribe_to_topics(shared_client, subscribed_topics).await;
            }
            EventRoute::MessageReceived { topic, payload } => {
                Self::handle_message_received(settings_forwarder, device_id, &topic, &payload)
                    .await;
            }
            EventRoute::PublishAcknowledged { packet_id, failure } => match failure {
                // Async completion of a fire-and-forget publish; a failure is
                // one lost sample, the next cycle proceeds regardless
                Some(reason) => warn!(packet_id, %reason, "Broker rejected telemetry publish"),
                None => debug!(packet_id, "Telemetry publish acknowledged"),
            },
            EventRoute::Disconnected => {
                warn!("Broker requested disconnect");
                let _ = state_tx.send(ConnectionState::Disconnected(
                    "Disconnected by broker".to_string(),
                ));
            }
            EventRoute::SubscriptionConfirmed { packet_id } => {
                debug!(packet_id, "Subscription confirmed");
            }
            EventRoute::InfrastructureEvent(event_str) => {
                debug!(target: "mqtt_transport", "MQTT event: {}", event_str);
            }
            EventRoute::OutgoingEvent => {}
        }
    }

    /// Parse and forward a settings message to the reconciler
    async fn handle_message_received(
        settings_forwarder: &Arc<SettingsForwarder>,
        device_id: &str,
        topic: &str,
        payload: &[u8],
    ) {
        let expected_topic = TopicBuilder::settings_topic(device_id);
        if !MessageHandler::is_settings_message(topic, &expected_topic) {
            return;
        }

        match MessageHandler::parse_setting_update(payload) {
            Ok(update) => {
                if let Err(e) = settings_forwarder.forward(update).await {
                    error!("Failed to forward setting update: {}", e);
                }
            }
            Err(e) => {
                // No key to report against, so the rejection stays local
                error!("Malformed settings payload dropped: {}", e);
            }
        }
    }

    /// Sleep with shutdown monitoring; false when shutdown was requested
    async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay_ms: u64) -> bool {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("Shutdown signal received during reconnection delay, stopping");
                    return false;
                }
                true
            }
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {
                true
            }
        }
    }

    /// Back off, then swap in a fresh client and event loop.
    /// Returns false only when shutdown interrupts the attempt.
    #[allow(clippy::too_many_arguments)]
    async fn reconnect_after_backoff(
        reconnect_attempts: &mut u32,
        reconnect_config: &ReconnectConfig,
        shutdown_rx: watch::Receiver<bool>,
        state_tx: &watch::Sender<ConnectionState>,
        current_event_loop: &mut Arc<Mutex<EventLoop>>,
        device_id: &str,
        config: &MqttSection,
        shared_client: &Arc<Mutex<AsyncClient>>,
    ) -> bool {
        *reconnect_attempts += 1;
        let delay_ms = reconnect_config.calculate_backoff_delay(*reconnect_attempts);
        let _ = state_tx.send(ConnectionState::Reconnecting(*reconnect_attempts));
        info!(
            "Attempting reconnection {} after {}ms delay",
            reconnect_attempts, delay_ms
        );

        if !Self::interruptible_sleep(shutdown_rx.clone(), delay_ms).await {
            return false;
        }
        if *shutdown_rx.borrow() {
            info!("Shutdown signal received, aborting reconnection");
            return false;
        }

        match Self::create_connection(device_id, config) {
            Ok((new_client, new_event_loop)) => {
                *current_event_loop = Arc::new(Mutex::new(new_event_loop));
                let mut client_guard = shared_client.lock().await;
                *client_guard = new_client;
                info!("Created new connection for reconnection attempt");
            }
            Err(e) => {
                // Keep looping; the next poll fails and we back off again
                error!("Failed to create new connection: {}", e);
            }
        }
        true
    }

    /// Re-subscribe to all tracked topics after (re)connection
    async fn resubscribe_to_topics(
        client: &Arc<Mutex<AsyncClient>>,
        topics: &Arc<Mutex<Vec<String>>>,
    ) {
        let topics = topics.lock().await.clone();
        let client_guard = client.lock().await;
        for topic in topics {
            if let Err(e) = client_guard.subscribe(&topic, QoS::AtLeastOnce).await {
                error!("Failed to re-subscribe to {}: {}", topic, e);
            } else {
                debug!(target: "mqtt_transport", "Re-subscribed to: {}", topic);
            }
        }
    }

    /// Disconnect from the broker and stop the supervisor
    pub async fn disconnect(&mut self) -> Result<(), MqttError> {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
            info!("Sent shutdown signal to connection supervisor");
        }

        {
            let client = self.client.lock().await;
            client
                .disconnect()
                .await
                .map_err(|e| MqttError::ConnectionFailed(Box::new(e)))?;
        }

        if let Some(state_tx) = &self.state_tx {
            let _ = state_tx.send(ConnectionState::Disconnected(
                "Client disconnected".to_string(),
            ));
        }

        if let Some(handle) = self.event_loop_handle.take() {
            let graceful_shutdown = tokio::time::timeout(Duration::from_secs(2), handle).await;
            match graceful_shutdown {
                Ok(Ok(())) => {
                    info!("Connection supervisor shut down gracefully");
                }
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("Connection supervisor ended with error: {}", e);
                }
                Err(_) => {
                    warn!("Connection supervisor didn't shut down gracefully, forcing abort");
                }
                _ => {}
            }
        }

        info!("MQTT client disconnected");
        Ok(())
    }

    /// Get current connection state; None before connect()
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.state_rx.as_ref().map(|rx| rx.borrow().clone())
    }

    /// Publishes are refused before connect() has started the supervisor
    fn ensure_started(&self) -> Result<(), MqttError> {
        if self.state_rx.is_none() {
            return Err(MqttError::ConnectionFailedStr(
                "Client not connected: connect() has not been called".to_string(),
            ));
        }
        Ok(())
    }

    /// Enqueue a telemetry payload under the device's stream topic.
    ///
    /// Deliberately not gated on the live connection state: rumqttc queues
    /// requests across reconnects, and a synchronous error here means the
    /// request channel itself is gone - the fatal submission case.
    pub async fn publish_stream(
        &self,
        stream_key: &str,
        content_type: &str,
        payload: Vec<u8>,
    ) -> Result<(), MqttError> {
        self.ensure_started()?;

        let topic = TopicBuilder::stream_topic(&self.device_id, stream_key);
        let props = PublishProperties {
            content_type: Some(content_type.to_string()),
            ..Default::default()
        };

        let client = self.client.lock().await;
        client
            .publish_with_properties(&topic, QoS::AtLeastOnce, false, payload, props)
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;

        debug!("Submitted telemetry payload to {}", topic);
        Ok(())
    }

    /// Publish a setting outcome report to the status topic
    pub async fn publish_settings_status(&self, report: &SettingReport) -> Result<(), MqttError> {
        self.ensure_started()?;

        let topic = TopicBuilder::settings_status_topic(&self.device_id);
        let payload = serde_json::to_string(report).map_err(MqttError::SerializationError)?;

        let client = self.client.lock().await;
        client
            .publish_with_properties(
                &topic,
                QoS::AtLeastOnce,
                false,
                payload,
                PublishProperties::default(),
            )
            .await
            .map_err(|e| MqttError::PublishFailed(Box::new(e)))?;

        debug!("Published setting report to {}: {:?}", topic, report.status);
        Ok(())
    }

    /// Subscribe to the remote settings topic and track it for re-subscription
    pub async fn subscribe_to_settings(&mut self) -> Result<(), MqttError> {
        let topic = TopicBuilder::settings_topic(&self.device_id);
        info!("Subscribing to settings topic: {}", topic);

        {
            let client = self.client.lock().await;
            client
                .subscribe(&topic, QoS::AtLeastOnce)
                .await
                .map_err(|e| {
                    MqttError::SubscriptionFailed(
                        format!("Failed to subscribe to {topic}: {e}").into(),
                    )
                })?;
        }

        let mut topics = self.subscribed_topics.lock().await;
        if !topics.contains(&topic) {
            topics.push(topic);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        MqttClient::connect(self).await
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        MqttClient::disconnect(self).await
    }

    async fn wait_connected(&self) -> Result<(), Self::Error> {
        MqttClient::wait_connected(self).await
    }

    async fn subscribe_to_settings(&mut self) -> Result<(), Self::Error> {
        MqttClient::subscribe_to_settings(self).await
    }

    async fn publish_stream(
        &self,
        stream_key: &str,
        content_type: &str,
        payload: Vec<u8>,
    ) -> Result<(), Self::Error> {
        MqttClient::publish_stream(self, stream_key, content_type, payload).await
    }

    async fn publish_settings_status(&self, report: &SettingReport) -> Result<(), Self::Error> {
        MqttClient::publish_settings_status(self, report).await
    }

    fn is_connected(&self) -> bool {
        matches!(self.connection_state(), Some(ConnectionState::Connected))
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        MqttClient::connection_state(self)
    }

    // Installs the sender synchronously: once this returns, the supervisor
    // task can no longer see an absent sender, so a retained settings
    // message delivered right after subscription is never dropped
    fn set_settings_sender(&self, sender: mpsc::Sender<SettingUpdate>) {
        self.settings_forwarder.set_sender(sender);
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        // Signal shutdown to the supervisor if it is still running
        if let Some(shutdown_tx) = &self.shutdown_tx {
            let _ = shutdown_tx.send(true);
        }

        if let Some(handle) = self.event_loop_handle.take() {
            handle.abort();
        }

        // No async in Drop; callers wanting graceful teardown use disconnect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_mqtt_config() -> MqttSection {
        MqttSection {
            broker_url: "mqtt://localhost:1883".to_string(),
            username_env: None,
            password_env: None,
        }
    }

    #[test]
    fn test_setup_connection_channels() {
        let ((state_tx, state_rx), (shutdown_tx, shutdown_rx)) =
            MqttClient::setup_connection_channels();

        assert_eq!(*state_rx.borrow(), ConnectionState::Connecting);
        assert!(!(*shutdown_rx.borrow()));

        state_tx.send(ConnectionState::Connected).unwrap();
        assert_eq!(*state_rx.borrow(), ConnectionState::Connected);

        shutdown_tx.send(true).unwrap();
        assert!(*shutdown_rx.borrow());
    }

    #[tokio::test]
    async fn test_interruptible_sleep_completes() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let result = MqttClient::interruptible_sleep(shutdown_rx, 10).await;
        assert!(result, "Sleep should complete without interruption");
    }

    #[tokio::test]
    async fn test_interruptible_sleep_interrupted() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            let _ = shutdown_tx.send(true);
        });

        let result = MqttClient::interruptible_sleep(shutdown_rx, 1000).await;
        assert!(!result, "Sleep should be interrupted by shutdown signal");
    }

    #[tokio::test]
    async fn test_connection_state_before_connect() {
        let client = MqttClient::new("test-device-state", test_mqtt_config()).unwrap();
        assert!(client.connection_state().is_none());
        assert!(!Transport::is_connected(&client));
    }

    #[tokio::test]
    async fn test_publish_fails_before_connect() {
        let client = MqttClient::new("test-device-publish", test_mqtt_config()).unwrap();

        let result = client
            .publish_stream("temp", "application/json", b"21.500000".to_vec())
            .await;
        assert!(result.is_err(), "publish_stream should fail before connect()");

        let report = SettingReport::new("LOOP_DELAY_S", crate::protocol::SettingStatus::Success);
        assert!(
            client.publish_settings_status(&report).await.is_err(),
            "publish_settings_status should fail before connect()"
        );
    }

    #[tokio::test]
    async fn test_wait_connected_fails_before_connect() {
        let client = MqttClient::new("test-device-wait", test_mqtt_config()).unwrap();
        assert!(client.wait_connected().await.is_err());
    }

    #[tokio::test]
    async fn test_disconnect_without_connection() {
        let mut client = MqttClient::new("test-device-disc", test_mqtt_config()).unwrap();
        let result = client.disconnect().await;
        assert!(
            result.is_ok(),
            "Disconnect should not fail even if not connected"
        );
    }

    #[tokio::test]
    async fn test_settings_sender_installed_synchronously() {
        let client = MqttClient::new("test-device-sender", test_mqtt_config()).unwrap();
        let (tx, mut rx) = mpsc::channel(1);
        Transport::set_settings_sender(&client, tx);

        // No task yield between install and use: the sender is already live
        let update = SettingUpdate {
            key: "LOOP_DELAY_S".to_string(),
            value: serde_json::json!(30),
        };
        client
            .settings_forwarder
            .forward(update.clone())
            .await
            .unwrap();
        assert_eq!(rx.try_recv().unwrap(), update);
    }

    #[tokio::test]
    async fn test_subscription_is_tracked() {
        let mut client = MqttClient::new("test-device-sub", test_mqtt_config()).unwrap();
        client.subscribe_to_settings().await.unwrap();
        client.subscribe_to_settings().await.unwrap();

        let topics = client.subscribed_topics.lock().await;
        assert_eq!(topics.as_slice(), ["/devices/test-device-sub/settings"]);
    }
}
