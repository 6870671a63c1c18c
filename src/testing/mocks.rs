//! Mock implementations for testing
//!
//! Provides mock Transport and SensorReader implementations to enable
//! comprehensive testing without external dependencies.

use crate::protocol::{SettingReport, SettingUpdate};
use crate::sensor::{SampleSet, SensorError, SensorReader};
use crate::transport::{mqtt::ConnectionState, Transport};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};

/// Error type for mock transport operations
#[derive(Debug, Error)]
#[error("mock transport failure: {0}")]
pub struct MockTransportError(pub String);

/// One recorded telemetry publish
#[derive(Debug, Clone, PartialEq)]
pub struct StreamPublish {
    pub stream_key: String,
    pub content_type: String,
    pub payload: Vec<u8>,
}

/// Mock transport recording every publish
///
/// Clones share state, so a clone kept outside the lifecycle serves as a
/// probe into what the device published. Connection state is driven manually
/// via [`MockTransport::set_connected`].
#[derive(Debug, Clone)]
pub struct MockTransport {
    published_streams: Arc<Mutex<Vec<StreamPublish>>>,
    published_reports: Arc<Mutex<Vec<SettingReport>>>,
    fail_publish: bool,
    connected_tx: Arc<watch::Sender<bool>>,
    connected_rx: watch::Receiver<bool>,
    settings_sender: Arc<std::sync::Mutex<Option<mpsc::Sender<SettingUpdate>>>>,
    subscribe_calls: Arc<AtomicUsize>,
    sender_present_at_subscribe: Arc<std::sync::Mutex<Vec<bool>>>,
}

impl MockTransport {
    /// A transport that reports connected from the start
    pub fn new() -> Self {
        Self::with_initial_state(true, false)
    }

    /// A transport that stays disconnected until `set_connected(true)`
    pub fn disconnected() -> Self {
        Self::with_initial_state(false, false)
    }

    /// A connected transport whose publish submissions always fail
    pub fn with_publish_failure() -> Self {
        Self::with_initial_state(true, true)
    }

    fn with_initial_state(connected: bool, fail_publish: bool) -> Self {
        let (connected_tx, connected_rx) = watch::channel(connected);
        Self {
            published_streams: Arc::new(Mutex::new(Vec::new())),
            published_reports: Arc::new(Mutex::new(Vec::new())),
            fail_publish,
            connected_tx: Arc::new(connected_tx),
            connected_rx,
            settings_sender: Arc::new(std::sync::Mutex::new(None)),
            subscribe_calls: Arc::new(AtomicUsize::new(0)),
            sender_present_at_subscribe: Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Drive the simulated connection state
    pub fn set_connected(&self, connected: bool) {
        self.connected_tx.send_replace(connected);
    }

    /// Deliver a setting update as if it arrived over the wire
    pub async fn inject_setting(&self, update: SettingUpdate) {
        let sender = self
            .settings_sender
            .lock()
            .unwrap()
            .clone()
            .expect("no settings sender configured on mock transport");
        sender
            .send(update)
            .await
            .expect("settings channel closed");
    }

    pub async fn published_streams(&self) -> Vec<StreamPublish> {
        self.published_streams.lock().await.clone()
    }

    pub async fn published_reports(&self) -> Vec<SettingReport> {
        self.published_reports.lock().await.clone()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::Relaxed)
    }

    /// Whether a settings sender was already installed when each
    /// `subscribe_to_settings` call landed
    pub fn sender_present_at_subscribe(&self) -> Vec<bool> {
        self.sender_present_at_subscribe.lock().unwrap().clone()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockTransportError;

    async fn connect(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.set_connected(false);
        Ok(())
    }

    async fn wait_connected(&self) -> Result<(), Self::Error> {
        let mut rx = self.connected_rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return Ok(());
            }
            if rx.changed().await.is_err() {
                return Err(MockTransportError("connection channel closed".to_string()));
            }
        }
    }

    async fn subscribe_to_settings(&mut self) -> Result<(), Self::Error> {
        self.subscribe_calls.fetch_add(1, Ordering::Relaxed);
        let sender_set = self.settings_sender.lock().unwrap().is_some();
        self.sender_present_at_subscribe
            .lock()
            .unwrap()
            .push(sender_set);
        Ok(())
    }

    async fn publish_stream(
        &self,
        stream_key: &str,
        content_type: &str,
        payload: Vec<u8>,
    ) -> Result<(), Self::Error> {
        if self.fail_publish {
            return Err(MockTransportError("publish submission refused".to_string()));
        }
        self.published_streams.lock().await.push(StreamPublish {
            stream_key: stream_key.to_string(),
            content_type: content_type.to_string(),
            payload,
        });
        Ok(())
    }

    async fn publish_settings_status(&self, report: &SettingReport) -> Result<(), Self::Error> {
        self.published_reports.lock().await.push(report.clone());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *self.connected_rx.borrow()
    }

    fn connection_state(&self) -> Option<ConnectionState> {
        Some(if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected("mock disconnected".to_string())
        })
    }

    fn set_settings_sender(&self, sender: mpsc::Sender<SettingUpdate>) {
        *self.settings_sender.lock().unwrap() = Some(sender);
    }
}

/// Mock sensor driven by a script of results
///
/// Scripted results are returned first, one per call; once the script is
/// exhausted the steady sample (if any) repeats forever.
pub struct MockSensor {
    script: VecDeque<Result<SampleSet, SensorError>>,
    steady: Option<SampleSet>,
    sample_count: Arc<AtomicUsize>,
    ready: bool,
}

impl MockSensor {
    /// A sensor returning the same sample on every read
    pub fn steady(sample: SampleSet) -> Self {
        Self {
            script: VecDeque::new(),
            steady: Some(sample),
            sample_count: Arc::new(AtomicUsize::new(0)),
            ready: true,
        }
    }

    /// A sensor following a fixed script of results
    pub fn scripted(script: Vec<Result<SampleSet, SensorError>>) -> Self {
        Self {
            script: script.into(),
            steady: None,
            sample_count: Arc::new(AtomicUsize::new(0)),
            ready: true,
        }
    }

    /// Mark the sensor as failing its readiness check
    pub fn unready(mut self) -> Self {
        self.ready = false;
        self
    }

    /// Shared counter of sample() calls, for asserting cadence
    pub fn sample_counter(&self) -> Arc<AtomicUsize> {
        self.sample_count.clone()
    }
}

impl SensorReader for MockSensor {
    fn is_ready(&self) -> bool {
        self.ready
    }

    fn sample(&mut self) -> Result<SampleSet, SensorError> {
        self.sample_count.fetch_add(1, Ordering::Relaxed);
        if let Some(result) = self.script.pop_front() {
            return result;
        }
        match self.steady {
            Some(sample) => Ok(sample),
            None => Err(SensorError::ChannelUnavailable("script exhausted")),
        }
    }
}
