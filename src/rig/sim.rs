//! Inverted-pendulum simulation rig
//!
//! A two-wheeled balancer reduced to a planar pendulum on a torque
//! source. Positive pitch leans forward; positive drive moves the wheels
//! forward, which rotates the body backward. The model is deliberately
//! crude - it exists to exercise the control stack, not to predict a
//! real chassis.
//!
//! One shared physics state backs both rig handles. The motor handle
//! latches the command, the sensor handle advances the physics by one
//! tick on every read, so the simulation runs at exactly the agent's
//! tick rate.

use super::noise::NoiseGenerator;
use super::{MotorSink, SensorSource};
use crate::error::{Error, Result};
use crate::types::{SensorFrame, WheelCommand};
use std::sync::{Arc, Mutex};

/// Physical and noise parameters of the simulated chassis
#[derive(Debug, Clone)]
pub struct SimParams {
    /// Angular acceleration from gravity at 90 degrees of lean (deg/s^2)
    pub gravity_gain: f32,
    /// Angular acceleration per unit of mean drive command (deg/s^2)
    pub torque_gain: f32,
    /// Velocity damping (1/s)
    pub damping: f32,
    /// Accelerometer noise per axis (g)
    pub accel_noise: f32,
    /// Gyro noise (deg/s)
    pub gyro_noise: f32,
    /// Constant gyro bias the calibration hold should discover (deg/s)
    pub gyro_bias: f32,
    /// Fully charged pack voltage
    pub start_voltage: f32,
    /// Idle discharge rate (V/s)
    pub drain_rate: f32,
    /// Additional voltage sag at full drive (V)
    pub load_sag: f32,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            gravity_gain: 600.0,
            torque_gain: 12.0,
            damping: 2.0,
            accel_noise: 0.02,
            gyro_noise: 0.5,
            gyro_bias: 1.5,
            start_voltage: 8.4,
            drain_rate: 0.001,
            load_sag: 0.3,
        }
    }
}

struct SimState {
    params: SimParams,
    noise: NoiseGenerator,
    tick_seconds: f32,
    /// Body pitch (degrees, positive = forward)
    angle: f32,
    /// Body pitch rate (deg/s)
    rate: f32,
    voltage: f32,
    command: WheelCommand,
    /// Probability per read of a transport-level fault
    fault_chance: f32,
}

impl SimState {
    fn step(&mut self) {
        let drive = (self.command.left + self.command.right) / 2.0;
        let accel = self.params.gravity_gain * self.angle.to_radians().sin()
            - self.params.torque_gain * drive
            - self.params.damping * self.rate;
        self.rate += accel * self.tick_seconds;
        self.angle += self.rate * self.tick_seconds;

        let load = 1.0 + drive.abs() / 100.0;
        self.voltage = (self.voltage - self.params.drain_rate * self.tick_seconds * load)
            .max(6.0);
    }

    fn frame(&mut self) -> SensorFrame {
        let pitch = self.angle.to_radians();
        let drive = (self.command.left + self.command.right) / 2.0;
        SensorFrame {
            // Gravity splits between the body-up and vertical axes as the
            // body pitches; the forward axis only sees noise
            accel: [
                self.noise.gaussian(self.params.accel_noise),
                pitch.sin() + self.noise.gaussian(self.params.accel_noise),
                pitch.cos() + self.noise.gaussian(self.params.accel_noise),
            ],
            gyro_rate: self.rate
                + self.params.gyro_bias
                + self.noise.gaussian(self.params.gyro_noise),
            voltage: self.voltage - self.params.load_sag * drive.abs() / 100.0,
        }
    }
}

/// Simulation rig; [`split`](Self::split) yields the sensor and motor
/// handles the agent consumes, while the rig itself keeps a handle for
/// test instrumentation
pub struct SimRig {
    state: Arc<Mutex<SimState>>,
}

impl SimRig {
    pub fn new(seed: u64, tick_seconds: f32) -> Self {
        Self::with_params(seed, tick_seconds, SimParams::default())
    }

    pub fn with_params(seed: u64, tick_seconds: f32, params: SimParams) -> Self {
        let state = SimState {
            voltage: params.start_voltage,
            noise: NoiseGenerator::new(seed),
            tick_seconds,
            angle: 0.0,
            rate: 0.0,
            command: WheelCommand::zero(),
            fault_chance: 0.0,
            params,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn split(&self) -> (SimSensors, SimMotors) {
        (
            SimSensors {
                state: Arc::clone(&self.state),
            },
            SimMotors {
                state: Arc::clone(&self.state),
            },
        )
    }

    /// Current body pitch (degrees)
    pub fn pitch(&self) -> f32 {
        self.lock().angle
    }

    /// Place the body at a tilt, at rest (knock it over, prop it up)
    pub fn set_pitch(&self, angle: f32) {
        let mut state = self.lock();
        state.angle = angle;
        state.rate = 0.0;
    }

    /// Impulsive shove: adds angular rate without moving the body
    pub fn push(&self, rate: f32) {
        self.lock().rate += rate;
    }

    pub fn set_voltage(&self, voltage: f32) {
        self.lock().voltage = voltage;
    }

    /// Probability per read of a simulated transport fault
    pub fn set_fault_chance(&self, probability: f32) {
        self.lock().fault_chance = probability;
    }

    /// Command latched by the motor handle on the most recent tick
    pub fn last_command(&self) -> WheelCommand {
        self.lock().command
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Sensor handle onto the shared simulation state
pub struct SimSensors {
    state: Arc<Mutex<SimState>>,
}

impl SensorSource for SimSensors {
    fn read(&mut self) -> Result<SensorFrame> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::SensorFault("simulation state poisoned".to_string()))?;
        if state.fault_chance > 0.0 {
            let chance = state.fault_chance;
            if state.noise.chance(chance) {
                return Err(Error::SensorFault("simulated transport dropout".to_string()));
            }
        }
        state.step();
        Ok(state.frame())
    }
}

/// Motor handle onto the shared simulation state
pub struct SimMotors {
    state: Arc<Mutex<SimState>>,
}

impl MotorSink for SimMotors {
    fn drive(&mut self, command: WheelCommand) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| Error::MotorFault("simulation state poisoned".to_string()))?;
        state.command = command;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rig() -> SimRig {
        SimRig::new(42, 0.01)
    }

    #[test]
    fn test_upright_reads_near_one_g() {
        let rig = rig();
        let (mut sensors, _motors) = rig.split();
        let frame = sensors.read().unwrap();
        assert!((frame.accel[2] - 1.0).abs() < 0.1);
        assert!(frame.accel[1].abs() < 0.1);
        assert!((frame.voltage - 8.4).abs() < 0.1);
    }

    #[test]
    fn test_unbalanced_pendulum_falls() {
        let rig = rig();
        let (mut sensors, _motors) = rig.split();
        rig.set_pitch(2.0);
        for _ in 0..200 {
            sensors.read().unwrap();
        }
        assert!(rig.pitch() > 30.0, "pitch={}", rig.pitch());
    }

    #[test]
    fn test_forward_drive_pushes_pitch_back() {
        let rig = rig();
        let (mut sensors, mut motors) = rig.split();
        motors.drive(WheelCommand::from_balance(50.0, 0.0)).unwrap();
        for _ in 0..10 {
            sensors.read().unwrap();
        }
        assert!(rig.pitch() < 0.0);
    }

    #[test]
    fn test_gyro_carries_configured_bias() {
        let rig = SimRig::with_params(
            42,
            0.01,
            SimParams {
                gyro_noise: 0.0,
                ..SimParams::default()
            },
        );
        let (mut sensors, _motors) = rig.split();
        let frame = sensors.read().unwrap();
        // At rest the only rate content is the bias
        assert!((frame.gyro_rate - 1.5).abs() < 0.2);
    }

    #[test]
    fn test_voltage_sags_under_load() {
        let rig = rig();
        let (mut sensors, mut motors) = rig.split();
        let idle = sensors.read().unwrap().voltage;
        motors.drive(WheelCommand::from_balance(100.0, 0.0)).unwrap();
        let loaded = sensors.read().unwrap().voltage;
        assert!(loaded < idle - 0.2);
    }

    #[test]
    fn test_fault_injection() {
        let rig = rig();
        let (mut sensors, _motors) = rig.split();
        rig.set_fault_chance(1.0);
        assert!(sensors.read().is_err());
        rig.set_fault_chance(0.0);
        assert!(sensors.read().is_ok());
    }

    #[test]
    fn test_motor_command_latched() {
        let rig = rig();
        let (_sensors, mut motors) = rig.split();
        let cmd = WheelCommand::from_balance(25.0, 5.0);
        motors.drive(cmd).unwrap();
        assert_eq!(rig.last_command(), cmd);
    }
}
