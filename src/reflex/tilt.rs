//! Complementary-filter tilt estimation
//!
//! Fuses the accelerometer gravity angle (accurate but noisy under motor
//! vibration) with the integrated gyro rate (smooth but drifting). The
//! gyro dominates short-term, the accelerometer corrects long-term drift.

use crate::types::{OrientationSample, SensorFrame};

/// Raw accel component beyond this is treated as a bad sample (g)
const ACCEL_RANGE: f32 = 4.0;
/// Raw gyro rate beyond this is treated as a bad sample (deg/s)
const GYRO_RANGE: f32 = 2000.0;

/// Pitch estimator fusing accelerometer and gyroscope samples
pub struct TiltEstimator {
    /// Gyro blend weight, close to 1
    alpha: f32,
    /// Gyro bias captured during calibration (deg/s)
    gyro_bias: f32,
    pitch: f32,
    last_rate: f32,
}

impl TiltEstimator {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha,
            gyro_bias: 0.0,
            pitch: 0.0,
            last_rate: 0.0,
        }
    }

    /// Fuse one raw frame into the pitch estimate
    ///
    /// Fails soft: a missing or out-of-range sample reuses the previous
    /// estimate and flags the result stale instead of propagating NaN.
    pub fn update(&mut self, frame: &SensorFrame, dt: f32) -> OrientationSample {
        if !Self::frame_usable(frame) {
            return OrientationSample {
                pitch_angle: self.pitch,
                pitch_rate: self.last_rate,
                stale: true,
            };
        }

        let accel_angle = frame.accel[1].atan2(frame.accel[2]).to_degrees();
        let rate = frame.gyro_rate - self.gyro_bias;

        self.pitch =
            self.alpha * (self.pitch + rate * dt) + (1.0 - self.alpha) * accel_angle;
        self.last_rate = rate;

        OrientationSample::new(self.pitch, rate)
    }

    /// Current pitch estimate without consuming a new frame
    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    /// Seed the filter state so the loop does not jerk-start after
    /// calibration or a long idle period
    pub fn seed(&mut self, pitch: f32) {
        self.pitch = pitch;
        self.last_rate = 0.0;
    }

    /// Set the gyro bias captured during the static-hold calibration
    pub fn set_gyro_bias(&mut self, bias: f32) {
        self.gyro_bias = bias;
    }

    fn frame_usable(frame: &SensorFrame) -> bool {
        frame.accel.iter().all(|a| a.is_finite() && a.abs() <= ACCEL_RANGE)
            && frame.gyro_rate.is_finite()
            && frame.gyro_rate.abs() <= GYRO_RANGE
            // atan2(0, 0) is defined but meaningless for a gravity vector
            && (frame.accel[1] != 0.0 || frame.accel[2] != 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upright_frame() -> SensorFrame {
        SensorFrame {
            accel: [0.0, 0.0, 1.0],
            gyro_rate: 0.0,
            voltage: 8.4,
        }
    }

    #[test]
    fn test_converges_under_zero_motion() {
        let mut est = TiltEstimator::new(0.98);
        est.seed(30.0);

        // Constant gravity vector, zero rate: estimate must converge to 0
        let mut sample = OrientationSample::default();
        for _ in 0..2000 {
            sample = est.update(&upright_frame(), 0.01);
        }
        assert!(sample.pitch_angle.abs() < 0.1, "pitch={}", sample.pitch_angle);
        assert!(!sample.stale);

        // And stay there: no further drift
        let settled = sample.pitch_angle;
        for _ in 0..500 {
            sample = est.update(&upright_frame(), 0.01);
        }
        assert!((sample.pitch_angle - settled).abs() < 1e-3);
    }

    #[test]
    fn test_tilted_gravity_vector() {
        let mut est = TiltEstimator::new(0.98);
        let tilted = SensorFrame {
            // 30 degrees of pitch: gravity splits between y and z
            accel: [0.0, 0.5, 0.866],
            gyro_rate: 0.0,
            voltage: 8.4,
        };
        let mut sample = OrientationSample::default();
        for _ in 0..3000 {
            sample = est.update(&tilted, 0.01);
        }
        assert!((sample.pitch_angle - 30.0).abs() < 0.5, "pitch={}", sample.pitch_angle);
    }

    #[test]
    fn test_bad_sample_reuses_previous() {
        let mut est = TiltEstimator::new(0.98);
        est.seed(5.0);
        est.update(&upright_frame(), 0.01);
        let before = est.pitch();

        let bad = SensorFrame {
            accel: [f32::NAN, 0.0, 1.0],
            gyro_rate: 0.0,
            voltage: 8.4,
        };
        let sample = est.update(&bad, 0.01);
        assert!(sample.stale);
        assert_eq!(sample.pitch_angle, before);
        assert!(sample.pitch_angle.is_finite());
    }

    #[test]
    fn test_out_of_range_gyro_is_stale() {
        let mut est = TiltEstimator::new(0.98);
        let bad = SensorFrame {
            accel: [0.0, 0.0, 1.0],
            gyro_rate: 5000.0,
            voltage: 8.4,
        };
        assert!(est.update(&bad, 0.01).stale);
    }

    #[test]
    fn test_gyro_bias_subtracted() {
        let mut est = TiltEstimator::new(0.98);
        est.set_gyro_bias(2.0);
        let frame = SensorFrame {
            accel: [0.0, 0.0, 1.0],
            gyro_rate: 2.0,
            voltage: 8.4,
        };
        let sample = est.update(&frame, 0.01);
        assert_eq!(sample.pitch_rate, 0.0);
    }

    #[test]
    fn test_gyro_integration_dominates_short_term() {
        let mut est = TiltEstimator::new(0.98);
        let rotating = SensorFrame {
            accel: [0.0, 0.0, 1.0],
            gyro_rate: 100.0,
            voltage: 8.4,
        };
        // One tick at 100 deg/s for 10ms: roughly +1 degree, barely pulled
        // down by the (upright) accel angle
        let sample = est.update(&rotating, 0.01);
        assert!(sample.pitch_angle > 0.9 && sample.pitch_angle < 1.0);
    }
}
