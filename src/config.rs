//! Configuration for the Tula daemon
//!
//! Loads configuration from a TOML file. Every section has sane factory
//! defaults so the daemon can start with no config file at all.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub tuner: TunerConfig,
    #[serde(default)]
    pub balance: BalanceConfig,
    #[serde(default)]
    pub battery: BatteryConfig,
    #[serde(default)]
    pub calibration: CalibrationConfig,
    #[serde(default)]
    pub kickup: KickupConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub rig: RigConfig,
}

/// Reflex-tier loop parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControlConfig {
    /// Reflex tick rate (Hz)
    pub loop_hz: f32,
    /// Adaptation tier runs every N reflex ticks
    pub adaptation_interval: u32,
    /// Pitch beyond which the robot is considered fallen (degrees)
    pub fall_angle_limit: f32,
    /// Complementary filter blend: gyro weight, close to 1
    pub complementary_alpha: f32,
    /// Anti-windup clamp for the PID integral accumulator
    pub integral_limit: f32,
    /// Target tilt at full velocity intent (degrees)
    pub max_tilt_angle: f32,
    /// Consecutive sensor faults before escalating to a safe stop
    pub sensor_fault_limit: u32,
    /// Consecutive tick overruns before the adaptation interval is doubled
    pub overrun_shed_threshold: u32,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            loop_hz: 100.0,
            adaptation_interval: 10,
            fall_angle_limit: 45.0,
            complementary_alpha: 0.98,
            integral_limit: 20.0,
            max_tilt_angle: 10.0,
            sensor_fault_limit: 25,
            overrun_shed_threshold: 50,
        }
    }
}

impl ControlConfig {
    /// Tick period in seconds
    pub fn loop_time(&self) -> f32 {
        1.0 / self.loop_hz
    }
}

/// Continuous gain tuning heuristics
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TunerConfig {
    /// Error window length in reflex ticks (100 @ 100Hz = 1 s)
    pub buffer_size: usize,
    /// Adaptation ticks to wait between accepted adjustments
    /// (5 @ the default 10-tick interval = 0.5 s)
    pub cooldown: u32,
    /// Zero-crossing fraction of the buffer that counts as oscillation
    pub oscillation_fraction: f32,
    /// Error amplitude below this is treated as sensor noise, not oscillation
    pub noise_floor: f32,
    /// Error stddev below this counts as stable
    pub stability_stddev: f32,
    /// Mean |error| below this counts as upright
    pub stability_mean: f32,
    /// Mean |error| above this counts as steady-state lean
    pub steady_error: f32,
    /// Gain nudge magnitudes at aggression 1.0
    pub kp_oscillation_step: f32,
    pub kd_oscillation_step: f32,
    pub kp_stability_step: f32,
    pub ki_steady_step: f32,
    /// Aggression decay applied per adaptation tick
    pub aggression_decay: f32,
    /// Aggression never drops below this fraction of its base
    pub aggression_floor: f32,
    /// Starting aggression on a fresh run (first boot / forced recalibration)
    pub fresh_aggression: f32,
    /// Starting aggression on a mature run with learned gains
    pub mature_aggression: f32,
    /// Safe gain ranges; proposals are clamped here
    pub kp_max: f32,
    pub ki_max: f32,
    pub kd_max: f32,
    /// Consecutive clamped proposals before tuning is frozen as a fault
    pub clamp_strike_limit: u32,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            buffer_size: 100,
            cooldown: 5,
            oscillation_fraction: 0.15,
            noise_floor: 0.5,
            stability_stddev: 1.0,
            stability_mean: 1.0,
            steady_error: 3.0,
            kp_oscillation_step: 0.1,
            kd_oscillation_step: 0.05,
            kp_stability_step: 0.02,
            ki_steady_step: 0.005,
            aggression_decay: 0.9995,
            aggression_floor: 0.1,
            fresh_aggression: 1.0,
            mature_aggression: 0.25,
            kp_max: 60.0,
            ki_max: 2.0,
            kd_max: 5.0,
            clamp_strike_limit: 5,
        }
    }
}

/// Balance-point finder parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BalanceConfig {
    /// Effort window length in reflex ticks (~5 s @ 100 Hz)
    pub window_size: usize,
    /// Mean |effort| below this is considered already balanced
    pub deadband: f32,
    /// Target shift per unit of mean effort
    pub learning_rate: f32,
    /// Largest single target adjustment (degrees)
    pub max_step: f32,
    /// Samples are only collected while |pitch_rate| is below this (deg/s)
    pub stability_threshold: f32,
    /// Total target deviation from factory zero is clamped here (degrees)
    pub max_deviation: f32,
    /// Consecutive clamp hits before the finder is frozen as a fault
    pub clamp_strike_limit: u32,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            window_size: 500,
            deadband: 5.0,
            learning_rate: 0.01,
            max_step: 0.1,
            stability_threshold: 15.0,
            max_deviation: 10.0,
            clamp_strike_limit: 3,
        }
    }
}

/// Battery compensation parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatteryConfig {
    /// Nominal full-charge voltage the gains were tuned at
    pub reference_voltage: f32,
    /// Compensation factor bounds; the upper bound prevents runaway
    /// amplification near depleted-battery readings
    pub min_factor: f32,
    pub max_factor: f32,
    /// EMA smoothing applied to the factor so it cannot step discontinuously
    pub factor_smoothing: f32,
    /// Voltage below this logs a low-battery warning
    pub low_voltage_warn: f32,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            reference_voltage: 8.4,
            min_factor: 0.8,
            max_factor: 1.5,
            factor_smoothing: 0.1,
            low_voltage_warn: 7.0,
        }
    }
}

/// Static-hold calibration parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CalibrationConfig {
    /// Ticks of low pitch-rate variance required to accept the hold
    pub hold_ticks: u32,
    /// Pitch-rate stddev threshold over the hold window (deg/s)
    pub max_rate_stddev: f32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            hold_ticks: 100,
            max_rate_stddev: 2.0,
        }
    }
}

/// Scripted stand-up maneuver parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KickupConfig {
    /// First attempt power
    pub start_power: f32,
    /// Power escalation after each failed catch
    pub power_step: f32,
    /// Give up past this power
    pub max_power: f32,
    /// Duration of the power pulse (ticks)
    pub pulse_ticks: u32,
    /// Ticks allowed for the PID to catch the robot after the pulse
    pub catch_ticks: u32,
    /// Pitch band around target that counts as caught (degrees)
    pub catch_band: f32,
    /// |pitch| above this means the robot is resting on a wheel
    pub rest_angle: f32,
}

impl Default for KickupConfig {
    fn default() -> Self {
        Self {
            start_power: 30.0,
            power_step: 5.0,
            max_power: 100.0,
            pulse_ticks: 25,
            catch_ticks: 250,
            catch_band: 10.0,
            rest_angle: 10.0,
        }
    }
}

/// Post-fall recovery parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecoveryConfig {
    /// Setpoint ramp duration from current tilt to upright (seconds)
    pub ramp_duration: f32,
    /// Ticks pitch must hold inside the upright band before recovery arms
    pub confirm_ticks: u32,
    /// Band around upright that counts as propped back up (degrees)
    pub upright_band: f32,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            ramp_duration: 0.75,
            confirm_ticks: 50,
            upright_band: 15.0,
        }
    }
}

/// Hardware rig selection and persistence paths
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RigConfig {
    /// Rig implementation: "sim" is built in; bus drivers plug in externally
    pub kind: String,
    /// Simulation noise seed (0 = entropy)
    pub seed: u64,
    /// Learned parameter store path
    pub store_path: String,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            kind: "sim".to_string(),
            seed: 0,
            store_path: "tula_params.json".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Factory default configuration, suitable for the simulation rig
    pub fn defaults() -> Self {
        Self {
            control: ControlConfig::default(),
            tuner: TunerConfig::default(),
            balance: BalanceConfig::default(),
            battery: BatteryConfig::default(),
            calibration: CalibrationConfig::default(),
            kickup: KickupConfig::default(),
            recovery: RecoveryConfig::default(),
            rig: RigConfig::default(),
        }
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::defaults();
        assert_eq!(config.control.loop_hz, 100.0);
        assert_eq!(config.control.adaptation_interval, 10);
        assert_eq!(config.control.fall_angle_limit, 45.0);
        assert_eq!(config.balance.max_deviation, 10.0);
        assert_eq!(config.rig.kind, "sim");
    }

    #[test]
    fn test_loop_time() {
        let config = ControlConfig::default();
        assert!((config.loop_time() - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = AppConfig::defaults();
        let toml_string = toml::to_string_pretty(&config).unwrap();

        assert!(toml_string.contains("[control]"));
        assert!(toml_string.contains("[tuner]"));
        assert!(toml_string.contains("[balance]"));
        assert!(toml_string.contains("[battery]"));
        assert!(toml_string.contains("fall_angle_limit = 45.0"));

        let parsed: AppConfig = toml::from_str(&toml_string).unwrap();
        assert_eq!(parsed.control.loop_hz, config.control.loop_hz);
        assert_eq!(parsed.tuner.buffer_size, config.tuner.buffer_size);
    }

    #[test]
    fn test_partial_config_falls_back_to_defaults() {
        let toml_content = r#"
[control]
loop_hz = 50.0
adaptation_interval = 20
fall_angle_limit = 40.0
complementary_alpha = 0.95
integral_limit = 20.0
max_tilt_angle = 10.0
sensor_fault_limit = 25
overrun_shed_threshold = 50
"#;
        let config: AppConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.control.loop_hz, 50.0);
        // Unspecified sections keep factory defaults
        assert_eq!(config.tuner.buffer_size, 100);
        assert_eq!(config.battery.reference_voltage, 8.4);
    }
}
