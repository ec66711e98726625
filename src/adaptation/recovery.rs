//! Recovery setpoint planning
//!
//! After a fall (or a manual prop-up) the robot is caught at a steep
//! tilt. Snapping the setpoint straight to upright would demand a
//! violent correction; instead the planner ramps the target angle from
//! the current tilt down to zero over a fixed duration, and the ordinary
//! balancing control law follows it. Recovery differs from balancing
//! only in where the setpoint comes from - there is no separate motor
//! path and no battery-compensation bypass.

use std::time::Duration;

pub struct RecoveryPlanner {
    duration: Duration,
    from_angle: f32,
}

impl RecoveryPlanner {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            from_angle: 0.0,
        }
    }

    /// Begin a ramp from the given tilt down to upright
    pub fn start(&mut self, from_angle: f32) {
        self.from_angle = from_angle;
    }

    /// Target angle `elapsed` into the ramp: linear from `from_angle` to 0
    pub fn target_at(&self, elapsed: Duration) -> f32 {
        if self.duration.is_zero() || elapsed >= self.duration {
            return 0.0;
        }
        let progress = elapsed.as_secs_f32() / self.duration.as_secs_f32();
        self.from_angle * (1.0 - progress)
    }

    /// The ramp has reached upright
    pub fn is_complete(&self, elapsed: Duration) -> bool {
        elapsed >= self.duration
    }
}
