//! PID control law
//!
//! Stateless between calls apart from the integral accumulator and the
//! previous error; both are owned here and reset on every transition
//! into balancing so windup never carries across a fall.

/// Motor command range
const OUTPUT_LIMIT: f32 = 100.0;

/// Tunable controller parameters
///
/// Owned exclusively by [`PidController`]; the adaptation tier only
/// proposes new values, the agent applies them through the setters here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidParams {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// Balance setpoint (degrees from factory zero)
    pub target_angle: f32,
}

impl PidParams {
    pub fn new(kp: f32, ki: f32, kd: f32, target_angle: f32) -> Self {
        Self {
            kp: kp.max(0.0),
            ki: ki.max(0.0),
            kd: kd.max(0.0),
            target_angle,
        }
    }
}

/// Proportional/integral/derivative controller with anti-windup
pub struct PidController {
    params: PidParams,
    integral_limit: f32,
    integral: f32,
    prev_error: f32,
}

impl PidController {
    pub fn new(params: PidParams, integral_limit: f32) -> Self {
        Self {
            params,
            integral_limit,
            integral: 0.0,
            prev_error: 0.0,
        }
    }

    /// Compute the next drive command, clamped to [-100, 100]
    ///
    /// `measured_rate`, when provided (from the gyro), replaces the error
    /// difference in the derivative term: d(error)/dt = d(pitch)/dt for
    /// a constant setpoint. This avoids derivative kick while the
    /// recovery ramp moves the target and is far less noisy than
    /// differencing.
    ///
    /// `dt <= 0` contributes nothing to the integral or the derivative;
    /// it never divides by zero.
    pub fn update(
        &mut self,
        current_angle: f32,
        target_angle: f32,
        dt: f32,
        measured_rate: Option<f32>,
    ) -> f32 {
        let error = current_angle - target_angle;

        if dt > 0.0 {
            self.integral = (self.integral + error * dt)
                .clamp(-self.integral_limit, self.integral_limit);
        }

        let derivative = match measured_rate {
            Some(rate) => rate,
            None if dt > 0.0 => (error - self.prev_error) / dt,
            None => 0.0,
        };

        let output = self.params.kp * error
            + self.params.ki * self.integral
            + self.params.kd * derivative;

        self.prev_error = error;
        output.clamp(-OUTPUT_LIMIT, OUTPUT_LIMIT)
    }

    /// Zero the integral accumulator and error history
    ///
    /// Invoked by the state machine on every transition into balancing.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = 0.0;
    }

    pub fn params(&self) -> &PidParams {
        &self.params
    }

    /// Replace the gains; negative values are clamped to zero
    pub fn set_gains(&mut self, kp: f32, ki: f32, kd: f32) {
        self.params.kp = kp.max(0.0);
        self.params.ki = ki.max(0.0);
        self.params.kd = kd.max(0.0);
    }

    /// Set the balance setpoint directly (calibration bootstrap)
    pub fn set_target_angle(&mut self, target: f32) {
        self.params.target_angle = target;
    }

    /// Shift the balance setpoint, clamped to ±`max_deviation` of factory
    /// zero. Returns the applied value and whether the clamp was hit.
    pub fn shift_target_angle(&mut self, delta: f32, max_deviation: f32) -> (f32, bool) {
        let unclamped = self.params.target_angle + delta;
        let applied = unclamped.clamp(-max_deviation, max_deviation);
        self.params.target_angle = applied;
        (applied, applied != unclamped)
    }
}
