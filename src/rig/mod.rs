//! Hardware rig abstraction
//!
//! The agent core is written against two narrow capabilities: a sensor
//! source it polls once per tick and a motor sink it writes once per
//! tick. The built-in simulation rig implements both against a small
//! inverted-pendulum model; bus-attached hardware drivers implement the
//! same traits out of tree.

mod noise;
mod sim;

pub use noise::NoiseGenerator;
pub use sim::{SimParams, SimRig};

use crate::config::RigConfig;
use crate::error::{Error, Result};
use crate::types::{SensorFrame, WheelCommand};

/// Polled sensor provider
pub trait SensorSource: Send {
    /// Read one frame; an `Err` counts as a fault tick for the agent's
    /// escalation logic and must return promptly either way
    fn read(&mut self) -> Result<SensorFrame>;
}

/// Motor command consumer
pub trait MotorSink: Send {
    /// Apply the command for this tick
    fn drive(&mut self, command: WheelCommand) -> Result<()>;

    /// Cut torque immediately
    fn stop(&mut self) -> Result<()> {
        self.drive(WheelCommand::zero())
    }
}

/// Build the configured rig as a sensor/motor pair
pub fn create_rig(
    config: &RigConfig,
    tick_seconds: f32,
) -> Result<(Box<dyn SensorSource>, Box<dyn MotorSink>)> {
    match config.kind.as_str() {
        "sim" => {
            let rig = SimRig::new(config.seed, tick_seconds);
            let (sensors, motors) = rig.split();
            Ok((Box::new(sensors), Box::new(motors)))
        }
        other => Err(Error::UnknownRig(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_sim_rig() {
        let config = RigConfig::default();
        assert!(create_rig(&config, 0.01).is_ok());
    }

    #[test]
    fn test_unknown_rig_rejected() {
        let config = RigConfig {
            kind: "warp-drive".to_string(),
            ..RigConfig::default()
        };
        match create_rig(&config, 0.01) {
            Err(Error::UnknownRig(name)) => assert_eq!(name, "warp-drive"),
            other => panic!("expected UnknownRig, got {:?}", other.map(|_| ())),
        }
    }
}
