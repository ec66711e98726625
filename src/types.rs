//! Core data types shared across the reflex, adaptation, and behavior tiers

/// One raw reading from the sensor source
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorFrame {
    /// Accelerometer data (g) - x forward, y up-the-body, z vertical when upright
    pub accel: [f32; 3],
    /// Gyroscope pitch rate (deg/s), bias-uncorrected
    pub gyro_rate: f32,
    /// Battery supply voltage (V)
    pub voltage: f32,
}

impl SensorFrame {
    /// Frame for a robot resting perfectly upright at full charge
    pub fn upright(voltage: f32) -> Self {
        Self {
            accel: [0.0, 0.0, 1.0],
            gyro_rate: 0.0,
            voltage,
        }
    }
}

impl Default for SensorFrame {
    fn default() -> Self {
        Self::upright(8.4)
    }
}

/// Filtered orientation estimate produced each tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationSample {
    /// Pitch angle (degrees, signed, 0 = upright target)
    pub pitch_angle: f32,
    /// Pitch rate (deg/s)
    pub pitch_rate: f32,
    /// True when the estimator reused its previous estimate because the
    /// raw sample was missing or out of range
    pub stale: bool,
}

impl OrientationSample {
    /// Create a fresh (non-stale) sample
    pub fn new(pitch_angle: f32, pitch_rate: f32) -> Self {
        Self {
            pitch_angle,
            pitch_rate,
            stale: false,
        }
    }
}

impl Default for OrientationSample {
    fn default() -> Self {
        Self::new(0.0, 0.0)
    }
}

/// Externally requested drive intent, sampled once per tick
///
/// Nonzero intent disables balance-point learning for that tick since
/// sustained motor effort is then intentional, not a lean.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotionRequest {
    /// Forward/backward velocity intent, -1.0 to 1.0
    pub velocity: f32,
    /// Turn intent, -1.0 to 1.0 (positive = right)
    pub turn: f32,
}

impl MotionRequest {
    /// True when no intentional drive is present
    pub fn is_idle(&self) -> bool {
        self.velocity == 0.0 && self.turn == 0.0
    }
}

/// Final per-wheel motor commands, each guaranteed within [-100, 100]
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WheelCommand {
    pub left: f32,
    pub right: f32,
}

impl WheelCommand {
    /// Build a command pair from a balance output and turn differential,
    /// clamping each side to the motor range
    pub fn from_balance(balance: f32, turn: f32) -> Self {
        Self {
            left: (balance + turn).clamp(-100.0, 100.0),
            right: (balance - turn).clamp(-100.0, 100.0),
        }
    }

    /// Zero-torque command
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        self.left == 0.0 && self.right == 0.0
    }
}

/// Out-of-band inputs sampled once per tick, non-blocking
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExternalEvent {
    /// Robot has been propped upright again by hand after a fall
    ProppedUpright,
    /// Discard learned calibration and redo discovery on next cycle
    ForceRecalibration,
    /// Graceful shutdown request
    Shutdown,
}
