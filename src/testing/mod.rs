//! Testing utilities and mock implementations
//!
//! Provides mock Transport and SensorReader implementations so the work loop,
//! settings service, and lifecycle can be tested without a broker or hardware.

pub mod mocks;

pub use mocks::*;
