//! Adaptation tier: the slow loop that retunes the reflex tier
//!
//! Runs on a subsampled tick, never concurrently with the reflex tier.
//! Components here only propose values; the agent is the single writer
//! that applies them to the controller.

mod balance;
mod recovery;
mod tuner;

pub use balance::BalancePointFinder;
pub use recovery::RecoveryPlanner;
pub use tuner::{ContinuousTuner, GainProposal};
