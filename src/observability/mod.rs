//! Observability infrastructure for the telemetry device

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};
