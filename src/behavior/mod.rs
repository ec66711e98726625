//! Behavior tier: sequencing and the fixed-period agent loop
//!
//! The state machine decides which tiers are active and where the
//! setpoint comes from; the agent owns the tick and is the single writer
//! for every tunable parameter.

mod agent;
mod state;

pub use agent::Agent;
pub use state::{BalanceStateMachine, Calibration, RobotState, StepResult, TickCommand};
