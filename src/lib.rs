//! telemetryd - embedded-style cloud telemetry device
//!
//! A periodic sensor-to-cloud telemetry loop with remote settings
//! reconciliation over MQTT.
//!
//! # Overview
//!
//! This crate provides the full device runtime, including:
//! - Fixed-point sensor sampling and bounded payload encoding
//! - MQTT transport layer with a supervised connection and reconnect backoff
//! - Remote settings reconciliation with validated, reported outcomes
//! - The telemetry work loop with an interruptible inter-cycle sleep
//!
//! # Quick Start
//!
//! ```rust
//! use telemetryd::protocol::SettingUpdate;
//! use telemetryd::settings::{SettingsHandle, SettingsReconciler, LOOP_DELAY_KEY};
//! use serde_json::json;
//!
//! // The work loop and the reconciler share one settings handle
//! let handle = SettingsHandle::new(5);
//! let reconciler = SettingsReconciler::new(handle.clone());
//!
//! // An in-range remote update is applied and reported as success
//! let report = reconciler.apply(&SettingUpdate {
//!     key: LOOP_DELAY_KEY.to_string(),
//!     value: json!(60),
//! });
//! assert!(report.is_success());
//! assert_eq!(handle.loop_delay_secs(), 60);
//! ```

pub mod config;
pub mod device;
pub mod encoding;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod sensor;
pub mod settings;
pub mod testing;
pub mod transport;

pub use config::DeviceConfig;
pub use device::{DeviceLifecycle, LoopState, WorkLoop};
pub use error::{DeviceError, DeviceResult};
pub use settings::{SettingsHandle, SettingsReconciler};
