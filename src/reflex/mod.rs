//! Reflex tier: the fixed-rate, low-latency control path
//!
//! Everything here runs every tick and must stay allocation-free and
//! deterministic: tilt estimation, the PID law, and battery scaling.

mod battery;
mod pid;
mod tilt;

pub use battery::BatteryCompensator;
pub use pid::{PidController, PidParams};
pub use tilt::TiltEstimator;
