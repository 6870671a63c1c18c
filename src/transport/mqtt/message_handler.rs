//! Pure event routing and settings message handling
//!
//! Routing decisions over rumqttc events are kept free of I/O so they can be
//! tested directly; the [`SettingsForwarder`] is the one impure piece, moving
//! parsed updates onto the reconciler's channel.

use crate::protocol::SettingUpdate;
use rumqttc::v5::Event;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Pure routing and parsing over MQTT events
pub struct MessageHandler;

impl MessageHandler {
    /// Parse a setting update from a settings-topic payload
    pub fn parse_setting_update(payload: &[u8]) -> Result<SettingUpdate, String> {
        serde_json::from_slice::<SettingUpdate>(payload)
            .map_err(|e| format!("Failed to parse setting update: {e}"))
    }

    /// Whether a received message belongs to the settings downlink.
    ///
    /// Retained messages ARE processed: the broker's retained setting is the
    /// current desired value and applying it on (re)subscribe is idempotent.
    pub fn is_settings_message(topic: &str, expected_topic: &str) -> bool {
        if topic != expected_topic {
            debug!("Topic mismatch: expected {}, got {}", expected_topic, topic);
            return false;
        }
        true
    }

    /// Route an MQTT event to its handler
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => {
                use rumqttc::v5::mqttbytes::v5::{Packet, PubAckReason};
                match incoming {
                    Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                    Packet::Publish(publish) => EventRoute::MessageReceived {
                        topic: String::from_utf8_lossy(&publish.topic).to_string(),
                        payload: publish.payload.to_vec(),
                    },
                    Packet::PubAck(ack) => {
                        let failure = match ack.reason {
                            PubAckReason::Success | PubAckReason::NoMatchingSubscribers => None,
                            other => Some(format!("{other:?}")),
                        };
                        EventRoute::PublishAcknowledged {
                            packet_id: ack.pkid,
                            failure,
                        }
                    }
                    Packet::Disconnect(_) => EventRoute::Disconnected,
                    Packet::SubAck(suback) => EventRoute::SubscriptionConfirmed {
                        packet_id: suback.pkid,
                    },
                    other => EventRoute::InfrastructureEvent(format!("{other:?}")),
                }
            }
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }
}

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnectionAcknowledged,
    /// Message received on a subscribed topic
    MessageReceived { topic: String, payload: Vec<u8> },
    /// Broker acknowledged an earlier publish; the asynchronous completion
    /// of a fire-and-forget submission
    PublishAcknowledged {
        packet_id: u16,
        failure: Option<String>,
    },
    /// MQTT broker disconnected
    Disconnected,
    /// Subscription confirmed
    SubscriptionConfirmed { packet_id: u16 },
    /// Infrastructure event (PingResp, etc.)
    InfrastructureEvent(String),
    /// Outgoing event (handled automatically)
    OutgoingEvent,
}

/// Forwards parsed setting updates to the reconciler service (impure I/O)
///
/// The sender sits behind a `std::sync::Mutex` so installing it is
/// synchronous: once `set_sender` returns, a message arriving on the
/// supervisor task can no longer race past an absent sender. The lock is
/// never held across an await; `forward` clones the sender out first.
pub struct SettingsForwarder {
    sender: std::sync::Mutex<Option<mpsc::Sender<SettingUpdate>>>,
}

impl SettingsForwarder {
    pub fn new() -> Self {
        Self {
            sender: std::sync::Mutex::new(None),
        }
    }

    pub fn set_sender(&self, sender: mpsc::Sender<SettingUpdate>) {
        *self
            .sender
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(sender);
    }

    /// Forward one parsed update to the reconciler
    pub async fn forward(&self, update: SettingUpdate) -> Result<(), String> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        if let Some(sender) = sender {
            debug!(key = %update.key, "Forwarding setting update to reconciler");
            sender
                .send(update)
                .await
                .map_err(|e| format!("Failed to forward setting update: {e}"))
        } else {
            warn!("Received setting update but no reconciler sender configured - dropped");
            Err("No settings sender configured".to_string())
        }
    }
}

impl Default for SettingsForwarder {
    fn default() -> Self {
        Self::new()
    }
}
