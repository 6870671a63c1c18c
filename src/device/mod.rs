//! Device orchestration: lifecycle wiring and the telemetry work loop

pub mod lifecycle;
pub mod work_loop;

pub use lifecycle::DeviceLifecycle;
pub use work_loop::{LoopState, WorkLoop};
