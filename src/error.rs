//! Device-level error taxonomy
//!
//! Settings rejections are deliberately absent here: they are reported back
//! to the remote caller as structured statuses and never propagate into the
//! work loop.

use crate::sensor::SensorError;
use thiserror::Error;

/// Errors surfaced by the telemetry device
#[derive(Debug, Error)]
pub enum DeviceError {
    /// A sensor read failed; recoverable per the configured policy
    #[error("Sensor failure: {0}")]
    Sensor(#[from] SensorError),

    /// Synchronous publish submission failed; the transport itself is broken
    /// and the work loop terminates
    #[error("Publish submission failed")]
    PublishSubmission(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Transport-level failure outside a publish call
    #[error("Transport error")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Configuration loading or validation failure
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl DeviceError {
    pub fn publish_submission<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::PublishSubmission(Box::new(source))
    }

    pub fn transport<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transport(Box::new(source))
    }

    /// Whether this error terminates the work loop
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DeviceError::PublishSubmission(_) | DeviceError::Transport(_)
        )
    }
}

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;
