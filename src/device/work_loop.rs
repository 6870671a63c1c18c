//! The periodic sample-encode-publish loop
//!
//! One cycle reads the sensor, encodes the sample, and submits it to the
//! transport. Between cycles the loop sleeps for the remotely tunable delay;
//! an accepted settings change preempts the sleep so the new cadence takes
//! effect immediately.

use crate::config::{SensorFailurePolicy, TelemetrySection};
use crate::encoding::encode;
use crate::error::DeviceError;
use crate::sensor::{SampleSet, SensorReader};
use crate::settings::{SettingsHandle, SleepOutcome};
use crate::transport::Transport;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Observable phase of the work loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Blocked on the transport's startup gate
    AwaitingConnection,
    /// Cycling normally
    Running,
    /// Terminal: a publish submission failed and the loop stopped
    Aborted,
}

/// The device's main telemetry loop
pub struct WorkLoop<T: Transport, S: SensorReader> {
    telemetry: TelemetrySection,
    transport: Arc<T>,
    sensor: S,
    settings: SettingsHandle,
    state: LoopState,
    last_sample: Option<SampleSet>,
}

impl<T: Transport, S: SensorReader> WorkLoop<T, S> {
    pub fn new(
        telemetry: TelemetrySection,
        transport: Arc<T>,
        sensor: S,
        settings: SettingsHandle,
    ) -> Self {
        Self {
            telemetry,
            transport,
            sensor,
            settings,
            state: LoopState::AwaitingConnection,
            last_sample: None,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Run the loop until a fatal error.
    ///
    /// Blocks on the transport's startup gate first; an unreachable broker
    /// holds the loop in `AwaitingConnection` indefinitely. Once running,
    /// only a failed publish submission terminates the loop.
    pub async fn run(&mut self) -> Result<(), DeviceError> {
        self.state = LoopState::AwaitingConnection;
        info!("Work loop waiting for transport connection");
        self.transport
            .wait_connected()
            .await
            .map_err(DeviceError::transport)?;

        self.state = LoopState::Running;
        info!(
            stream_key = %self.telemetry.stream_key,
            delay_s = self.settings.loop_delay_secs(),
            "Work loop running"
        );

        loop {
            self.run_cycle().await?;
            match self.settings.sleep_one_cycle().await {
                SleepOutcome::Elapsed => {}
                SleepOutcome::Woken => {
                    debug!(
                        delay_s = self.settings.loop_delay_secs(),
                        "Sleep preempted by settings change, starting next cycle early"
                    );
                }
            }
        }
    }

    /// One sample-encode-publish cycle
    async fn run_cycle(&mut self) -> Result<(), DeviceError> {
        let sample = match self.sensor.sample() {
            Ok(sample) => {
                self.last_sample = Some(sample);
                sample
            }
            Err(e) => match self.telemetry.on_sensor_failure {
                SensorFailurePolicy::Skip => {
                    warn!(error = %e, "Sensor read failed, skipping this cycle");
                    return Ok(());
                }
                SensorFailurePolicy::PublishLastKnown => match self.last_sample {
                    Some(prev) => {
                        warn!(error = %e, "Sensor read failed, re-publishing last known sample");
                        prev
                    }
                    None => {
                        warn!(error = %e, "Sensor read failed with no last known sample, skipping");
                        return Ok(());
                    }
                },
            },
        };

        let payload = encode(&sample, self.telemetry.schema);
        debug!(payload = %payload.body, "Submitting telemetry sample");

        if let Err(e) = self
            .transport
            .publish_stream(
                &self.telemetry.stream_key,
                payload.content_type,
                payload.into_bytes(),
            )
            .await
        {
            // Submission failure means the transport's request path is gone
            error!(error = %e, "Telemetry publish submission failed, aborting work loop");
            self.state = LoopState::Aborted;
            return Err(DeviceError::publish_submission(e));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SensorFailurePolicy;
    use crate::sensor::SensorError;
    use crate::testing::mocks::{MockSensor, MockTransport};

    fn telemetry_section(policy: SensorFailurePolicy) -> TelemetrySection {
        TelemetrySection {
            on_sensor_failure: policy,
            ..TelemetrySection::default()
        }
    }

    fn sample(temp: f64) -> SampleSet {
        SampleSet {
            temperature: crate::sensor::Measurement::from_f64(temp),
            ..SampleSet::default()
        }
    }

    #[tokio::test]
    async fn test_cycle_publishes_encoded_sample() {
        let transport = Arc::new(MockTransport::new());
        let sensor = MockSensor::steady(sample(21.5));
        let settings = SettingsHandle::new(5);
        let mut work_loop = WorkLoop::new(
            telemetry_section(SensorFailurePolicy::Skip),
            transport.clone(),
            sensor,
            settings,
        );

        work_loop.run_cycle().await.unwrap();

        let published = transport.published_streams().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].stream_key, "temp");
        assert_eq!(published[0].content_type, "application/json");
        assert_eq!(published[0].payload, b"21.500000");
    }

    #[tokio::test]
    async fn test_skip_policy_drops_failed_cycle() {
        let transport = Arc::new(MockTransport::new());
        let sensor = MockSensor::scripted(vec![Err(SensorError::FetchFailed(
            "bus timeout".to_string(),
        ))]);
        let settings = SettingsHandle::new(5);
        let mut work_loop = WorkLoop::new(
            telemetry_section(SensorFailurePolicy::Skip),
            transport.clone(),
            sensor,
            settings,
        );

        work_loop.run_cycle().await.unwrap();

        assert!(transport.published_streams().await.is_empty());
        assert_eq!(work_loop.state(), LoopState::AwaitingConnection);
    }

    #[tokio::test]
    async fn test_last_known_policy_republishes() {
        let transport = Arc::new(MockTransport::new());
        let sensor = MockSensor::scripted(vec![
            Ok(sample(20.0)),
            Err(SensorError::FetchFailed("bus timeout".to_string())),
        ]);
        let settings = SettingsHandle::new(5);
        let mut work_loop = WorkLoop::new(
            telemetry_section(SensorFailurePolicy::PublishLastKnown),
            transport.clone(),
            sensor,
            settings,
        );

        work_loop.run_cycle().await.unwrap();
        work_loop.run_cycle().await.unwrap();

        let published = transport.published_streams().await;
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].payload, published[1].payload);
    }

    #[tokio::test]
    async fn test_last_known_policy_skips_without_history() {
        let transport = Arc::new(MockTransport::new());
        let sensor = MockSensor::scripted(vec![Err(SensorError::NotReady)]);
        let settings = SettingsHandle::new(5);
        let mut work_loop = WorkLoop::new(
            telemetry_section(SensorFailurePolicy::PublishLastKnown),
            transport.clone(),
            sensor,
            settings,
        );

        work_loop.run_cycle().await.unwrap();
        assert!(transport.published_streams().await.is_empty());
    }

    #[tokio::test]
    async fn test_publish_failure_aborts_loop() {
        let transport = Arc::new(MockTransport::with_publish_failure());
        let sensor = MockSensor::steady(sample(21.5));
        let settings = SettingsHandle::new(5);
        let mut work_loop = WorkLoop::new(
            telemetry_section(SensorFailurePolicy::Skip),
            transport,
            sensor,
            settings,
        );

        let result = work_loop.run_cycle().await;
        assert!(matches!(result, Err(DeviceError::PublishSubmission(_))));
        assert_eq!(work_loop.state(), LoopState::Aborted);
    }
}
