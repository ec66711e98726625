//! Battery sag compensation
//!
//! Motor torque per command unit drops as the supply voltage sags over a
//! discharge cycle. Scaling commands by reference_voltage / voltage keeps
//! torque roughly constant; the factor bounds prevent runaway
//! amplification near depleted-battery readings.

use crate::config::BatteryConfig;

/// Maps measured supply voltage to a bounded motor command scale factor
pub struct BatteryCompensator {
    config: BatteryConfig,
    factor: f32,
}

impl BatteryCompensator {
    pub fn new(config: BatteryConfig) -> Self {
        Self {
            config,
            factor: 1.0,
        }
    }

    /// Refresh the compensation factor from a voltage sample
    ///
    /// Non-finite or non-positive readings keep the last factor. The
    /// factor itself is EMA-smoothed so a noisy voltage rail cannot make
    /// the drive command step discontinuously.
    pub fn observe_voltage(&mut self, voltage: f32) -> f32 {
        if voltage.is_finite() && voltage > 0.0 {
            let raw = (self.config.reference_voltage / voltage)
                .clamp(self.config.min_factor, self.config.max_factor);
            let s = self.config.factor_smoothing;
            self.factor = s * raw + (1.0 - s) * self.factor;
        }
        self.factor
    }

    /// Scale a raw drive command by the current factor, re-clamped to the
    /// motor range
    pub fn compensate(&self, raw_command: f32) -> f32 {
        (raw_command * self.factor).clamp(-100.0, 100.0)
    }

    /// Current compensation factor
    pub fn factor(&self) -> f32 {
        self.factor
    }

    /// True when the last voltage sample warrants a low-battery warning
    pub fn is_low(&self, voltage: f32) -> bool {
        voltage.is_finite() && voltage > 0.0 && voltage < self.config.low_voltage_warn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compensator() -> BatteryCompensator {
        // No smoothing in tests unless stated: factor tracks voltage directly
        BatteryCompensator::new(BatteryConfig {
            factor_smoothing: 1.0,
            ..BatteryConfig::default()
        })
    }

    #[test]
    fn test_full_battery_no_scaling() {
        let mut comp = compensator();
        comp.observe_voltage(8.4);
        assert!((comp.factor() - 1.0).abs() < 1e-5);
        assert!((comp.compensate(50.0) - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_sagging_battery_boosts_command() {
        let mut comp = compensator();
        comp.observe_voltage(7.0);
        // 8.4 / 7.0 = 1.2
        assert!((comp.factor() - 1.2).abs() < 1e-5);
        assert!((comp.compensate(50.0) - 60.0).abs() < 1e-3);
    }

    #[test]
    fn test_factor_bounds() {
        let mut comp = compensator();
        comp.observe_voltage(1.0); // would be 8.4x unbounded
        assert_eq!(comp.factor(), 1.5);

        comp.observe_voltage(20.0); // would be 0.42x unbounded
        assert_eq!(comp.factor(), 0.8);
    }

    #[test]
    fn test_output_reclamped() {
        let mut comp = compensator();
        comp.observe_voltage(7.0);
        assert_eq!(comp.compensate(95.0), 100.0);
        assert_eq!(comp.compensate(-95.0), -100.0);
    }

    #[test]
    fn test_monotonic_in_voltage() {
        // For a fixed positive command, output never increases as voltage rises
        let mut last = f32::INFINITY;
        for v in [6.0_f32, 6.5, 7.0, 7.5, 8.0, 8.4, 9.0, 10.0, 12.0] {
            let mut comp = compensator();
            comp.observe_voltage(v);
            let out = comp.compensate(40.0);
            assert!(out <= last + 1e-5, "voltage={} out={} last={}", v, out, last);
            last = out;
        }
    }

    #[test]
    fn test_bad_reading_keeps_last_factor() {
        let mut comp = compensator();
        comp.observe_voltage(7.0);
        let before = comp.factor();

        comp.observe_voltage(f32::NAN);
        assert_eq!(comp.factor(), before);
        comp.observe_voltage(0.0);
        assert_eq!(comp.factor(), before);
        comp.observe_voltage(-3.0);
        assert_eq!(comp.factor(), before);
    }

    #[test]
    fn test_smoothing_limits_step() {
        let mut comp = BatteryCompensator::new(BatteryConfig {
            factor_smoothing: 0.1,
            ..BatteryConfig::default()
        });
        comp.observe_voltage(6.0); // raw factor 1.4, smoothed from 1.0
        assert!((comp.factor() - 1.04).abs() < 1e-4);
    }

    #[test]
    fn test_low_battery_flag() {
        let comp = compensator();
        assert!(comp.is_low(6.8));
        assert!(!comp.is_low(7.8));
        assert!(!comp.is_low(f32::NAN));
    }
}
