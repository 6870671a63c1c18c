//! MQTT transport implementation
//!
//! Split into pure connection/state handling, pure event routing, and the
//! impure client that drives the rumqttc event loop.

pub mod client;
pub mod connection;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{ConnectionState, MqttError, ReconnectConfig, TopicBuilder};
pub use message_handler::{EventRoute, MessageHandler, SettingsForwarder};
