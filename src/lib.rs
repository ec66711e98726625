//! Tula - Tiered adaptive balance controller for two-wheeled robots
//!
//! Keeps a top-heavy two-wheeled robot upright on imperfect hardware by
//! running three cooperating tiers on a single fixed-period tick:
//!
//! - **Reflex tier**: complementary-filter tilt estimation and a PID
//!   control law, every tick.
//! - **Adaptation tier**: continuous gain tuning, balance-point finding,
//!   and battery compensation, on a subsampled tick.
//! - **Behavior tier**: the state machine sequencing calibration,
//!   kick-up, balancing, fall detection, and recovery.
//!
//! Hardware access goes through the capability traits in [`rig`]; a
//! simulated inverted-pendulum rig is provided for hardware-free runs
//! and testing.

pub mod adaptation;
pub mod behavior;
pub mod config;
pub mod error;
pub mod reflex;
pub mod rig;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{Error, Result};
