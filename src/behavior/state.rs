//! Balance behavior state machine
//!
//! Sequences CALIBRATING -> KICK_UP -> BALANCING -> FALLEN -> RECOVERING
//! -> BALANCING and gates which components are active in each state. The
//! fall check is evaluated first on every tick regardless of state:
//! safety overrides everything, and the tick that detects a fall also
//! commands zero torque.

use crate::adaptation::RecoveryPlanner;
use crate::config::{CalibrationConfig, KickupConfig, RecoveryConfig};
use crate::types::OrientationSample;
use log::{error, info, warn};
use std::time::Duration;

/// Behavior states; exactly one is active at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RobotState {
    /// Static-hold capture of gyro bias and the bootstrap balance point
    Calibrating,
    /// Scripted stand-up maneuver from resting on a wheel
    KickUp,
    /// Steady balancing with the adaptation tier active
    Balancing,
    /// On the ground, motors off, waiting to be propped back up
    Fallen,
    /// Setpoint ramping from the propped tilt back to upright
    Recovering,
}

/// What the reflex tier should do this tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TickCommand {
    /// Zero torque
    Idle,
    /// Fixed open-loop power (kick-up pulse), both wheels
    OpenLoop { power: f32 },
    /// Run the PID toward this setpoint
    Balance { target_angle: f32 },
}

/// Result of the static-hold calibration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// Mean resting gyro rate (deg/s), subtracted from every later sample
    pub gyro_bias: f32,
    /// Mean pitch while held vertical: the geometric bootstrap estimate
    /// of the balance point. The balance-point finder owns all
    /// refinement from here on.
    pub bootstrap_target: f32,
}

/// One state-machine step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepResult {
    pub command: TickCommand,
    /// Controller runtime state must be cleared before this tick's update
    pub reset_pid: bool,
    /// Set on the tick calibration completes
    pub calibration: Option<Calibration>,
}

enum KickPhase {
    /// Decide whether a kick is needed at all
    Assess,
    Pulse { ticks_left: u32, direction: f32 },
    Catch { ticks_left: u32 },
}

pub struct BalanceStateMachine {
    state: RobotState,
    fall_angle_limit: f32,

    // Calibration
    calibration_config: CalibrationConfig,
    hold_rates: Vec<f32>,
    hold_pitch_sum: f32,

    // Kick-up
    kickup_config: KickupConfig,
    kick_phase: KickPhase,
    kick_power: f32,

    // Fall / recovery
    recovery_config: RecoveryConfig,
    planner: RecoveryPlanner,
    upright_hold: u32,
    recovery_elapsed: Duration,
}

impl BalanceStateMachine {
    pub fn new(
        fall_angle_limit: f32,
        calibration: CalibrationConfig,
        kickup: KickupConfig,
        recovery: RecoveryConfig,
    ) -> Self {
        let planner = RecoveryPlanner::new(Duration::from_secs_f32(recovery.ramp_duration));
        let hold_capacity = calibration.hold_ticks as usize;
        // Each kick-up phase counts down from its configured length and
        // transitions when the countdown hits zero; a zero-length phase
        // would underflow the counter, so both are floored at one tick
        let mut kickup = kickup;
        kickup.pulse_ticks = kickup.pulse_ticks.max(1);
        kickup.catch_ticks = kickup.catch_ticks.max(1);
        Self {
            state: RobotState::Calibrating,
            fall_angle_limit,
            calibration_config: calibration,
            hold_rates: Vec::with_capacity(hold_capacity),
            hold_pitch_sum: 0.0,
            kick_power: kickup.start_power,
            kickup_config: kickup,
            kick_phase: KickPhase::Assess,
            recovery_config: recovery,
            planner,
            upright_hold: 0,
            recovery_elapsed: Duration::ZERO,
        }
    }

    pub fn state(&self) -> RobotState {
        self.state
    }

    /// Discard calibration progress and start over (forced recalibration)
    pub fn restart_calibration(&mut self) {
        info!("State: Forced recalibration, returning to CALIBRATING");
        self.hold_rates.clear();
        self.hold_pitch_sum = 0.0;
        self.kick_power = self.kickup_config.start_power;
        self.kick_phase = KickPhase::Assess;
        self.state = RobotState::Calibrating;
    }

    /// Safe stop from outside the normal transition table (sensor loss)
    pub fn force_fallen(&mut self, reason: &str) {
        if self.state != RobotState::Fallen {
            warn!("State: Safe stop -> FALLEN ({})", reason);
            self.enter_fallen();
        }
    }

    /// Advance one tick
    ///
    /// `base_target` is the tuned steady-state setpoint (target angle
    /// plus any intentional tilt); `propped` is the external
    /// propped-upright signal sampled this tick.
    pub fn step(
        &mut self,
        sample: &OrientationSample,
        base_target: f32,
        dt: f32,
        propped: bool,
    ) -> StepResult {
        // Fall check first, every tick, regardless of state
        if sample.pitch_angle.abs() > self.fall_angle_limit
            && self.state != RobotState::Fallen
        {
            warn!(
                "State: Fell over (pitch {:.1} deg), motors off",
                sample.pitch_angle
            );
            self.enter_fallen();
            return StepResult {
                command: TickCommand::Idle,
                reset_pid: false,
                calibration: None,
            };
        }

        match self.state {
            RobotState::Calibrating => self.step_calibrating(sample),
            RobotState::KickUp => self.step_kickup(sample, base_target),
            RobotState::Balancing => StepResult {
                command: TickCommand::Balance {
                    target_angle: base_target,
                },
                reset_pid: false,
                calibration: None,
            },
            RobotState::Fallen => self.step_fallen(sample, propped),
            RobotState::Recovering => self.step_recovering(dt),
        }
    }

    fn step_calibrating(&mut self, sample: &OrientationSample) -> StepResult {
        self.hold_rates.push(sample.pitch_rate);
        self.hold_pitch_sum += sample.pitch_angle;

        let mut calibration = None;
        if self.hold_rates.len() >= self.calibration_config.hold_ticks as usize {
            let n = self.hold_rates.len() as f32;
            let mean_rate = self.hold_rates.iter().sum::<f32>() / n;
            let variance = self
                .hold_rates
                .iter()
                .map(|r| (r - mean_rate).powi(2))
                .sum::<f32>()
                / n;

            if variance.sqrt() < self.calibration_config.max_rate_stddev {
                let bootstrap_target = self.hold_pitch_sum / n;
                info!(
                    "State: Calibration captured (bias {:.2} deg/s, target {:.2} deg) -> KICK_UP",
                    mean_rate, bootstrap_target
                );
                calibration = Some(Calibration {
                    gyro_bias: mean_rate,
                    bootstrap_target,
                });
                self.state = RobotState::KickUp;
                self.kick_phase = KickPhase::Assess;
                self.kick_power = self.kickup_config.start_power;
            } else {
                // Still moving: restart the hold window
                info!("State: Hold not still enough, restarting calibration window");
            }
            self.hold_rates.clear();
            self.hold_pitch_sum = 0.0;
        }

        StepResult {
            command: TickCommand::Idle,
            reset_pid: false,
            calibration,
        }
    }

    fn step_kickup(&mut self, sample: &OrientationSample, base_target: f32) -> StepResult {
        match &mut self.kick_phase {
            KickPhase::Assess => {
                if sample.pitch_angle.abs() < self.kickup_config.rest_angle {
                    // Already near upright: no maneuver needed
                    info!("State: Already upright -> BALANCING");
                    self.state = RobotState::Balancing;
                    return StepResult {
                        command: TickCommand::Balance {
                            target_angle: base_target,
                        },
                        reset_pid: true,
                        calibration: None,
                    };
                }
                // Resting on the front wheel (positive pitch) needs forward
                // drive to kick the back up, and vice versa
                let direction = sample.pitch_angle.signum();
                info!(
                    "State: Kick-up pulse at power {:.0} (pitch {:.1} deg)",
                    self.kick_power, sample.pitch_angle
                );
                self.kick_phase = KickPhase::Pulse {
                    ticks_left: self.kickup_config.pulse_ticks,
                    direction,
                };
                StepResult {
                    command: TickCommand::OpenLoop {
                        power: self.kick_power * direction,
                    },
                    reset_pid: false,
                    calibration: None,
                }
            }
            KickPhase::Pulse {
                ticks_left,
                direction,
            } => {
                let power = self.kick_power * *direction;
                *ticks_left -= 1;
                if *ticks_left == 0 {
                    self.kick_phase = KickPhase::Catch {
                        ticks_left: self.kickup_config.catch_ticks,
                    };
                    // Fresh controller for the catch attempt
                    return StepResult {
                        command: TickCommand::Balance {
                            target_angle: base_target,
                        },
                        reset_pid: true,
                        calibration: None,
                    };
                }
                StepResult {
                    command: TickCommand::OpenLoop { power },
                    reset_pid: false,
                    calibration: None,
                }
            }
            KickPhase::Catch { ticks_left } => {
                *ticks_left -= 1;
                if *ticks_left == 0 {
                    let err = (sample.pitch_angle - base_target).abs();
                    if err < self.kickup_config.catch_band {
                        info!("State: Caught upright -> BALANCING");
                        self.state = RobotState::Balancing;
                        return StepResult {
                            command: TickCommand::Balance {
                                target_angle: base_target,
                            },
                            reset_pid: true,
                            calibration: None,
                        };
                    }
                    self.kick_power += self.kickup_config.power_step;
                    if self.kick_power > self.kickup_config.max_power {
                        error!(
                            "State: Kick-up failed at max power, giving up -> FALLEN"
                        );
                        self.enter_fallen();
                        return StepResult {
                            command: TickCommand::Idle,
                            reset_pid: false,
                            calibration: None,
                        };
                    }
                    info!(
                        "State: Catch missed (pitch {:.1} deg), escalating to power {:.0}",
                        sample.pitch_angle, self.kick_power
                    );
                    self.kick_phase = KickPhase::Assess;
                    return StepResult {
                        command: TickCommand::Idle,
                        reset_pid: false,
                        calibration: None,
                    };
                }
                StepResult {
                    command: TickCommand::Balance {
                        target_angle: base_target,
                    },
                    reset_pid: false,
                    calibration: None,
                }
            }
        }
    }

    fn step_fallen(&mut self, sample: &OrientationSample, propped: bool) -> StepResult {
        // A stale estimate cannot testify that the robot is upright
        let upright =
            !sample.stale && sample.pitch_angle.abs() < self.recovery_config.upright_band;

        // The external signal is an explicit human assertion and skips the
        // confirmation wait; otherwise pitch must hold inside the band.
        let armed = if propped && upright {
            true
        } else if upright {
            self.upright_hold += 1;
            self.upright_hold >= self.recovery_config.confirm_ticks
        } else {
            self.upright_hold = 0;
            false
        };

        if armed {
            info!(
                "State: Propped upright (pitch {:.1} deg) -> RECOVERING",
                sample.pitch_angle
            );
            self.planner.start(sample.pitch_angle);
            self.recovery_elapsed = Duration::ZERO;
            self.state = RobotState::Recovering;
            // Clear windup inherited from before the fall
            return StepResult {
                command: TickCommand::Balance {
                    target_angle: self.planner.target_at(Duration::ZERO),
                },
                reset_pid: true,
                calibration: None,
            };
        }

        StepResult {
            command: TickCommand::Idle,
            reset_pid: false,
            calibration: None,
        }
    }

    fn step_recovering(&mut self, dt: f32) -> StepResult {
        self.recovery_elapsed += Duration::from_secs_f32(dt.max(0.0));

        if self.planner.is_complete(self.recovery_elapsed) {
            info!("State: Recovery ramp complete -> BALANCING");
            self.state = RobotState::Balancing;
            return StepResult {
                command: TickCommand::Balance { target_angle: 0.0 },
                reset_pid: true,
                calibration: None,
            };
        }

        StepResult {
            command: TickCommand::Balance {
                target_angle: self.planner.target_at(self.recovery_elapsed),
            },
            reset_pid: false,
            calibration: None,
        }
    }

    fn enter_fallen(&mut self) {
        self.state = RobotState::Fallen;
        self.upright_hold = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> BalanceStateMachine {
        BalanceStateMachine::new(
            45.0,
            CalibrationConfig {
                hold_ticks: 10,
                max_rate_stddev: 2.0,
            },
            KickupConfig {
                pulse_ticks: 3,
                catch_ticks: 5,
                ..KickupConfig::default()
            },
            RecoveryConfig {
                ramp_duration: 0.5,
                confirm_ticks: 5,
                upright_band: 15.0,
            },
        )
    }

    fn still(pitch: f32) -> OrientationSample {
        OrientationSample::new(pitch, 0.0)
    }

    /// Drive a still calibration hold to completion
    fn calibrate(m: &mut BalanceStateMachine) {
        for _ in 0..10 {
            m.step(&still(0.5), 0.0, 0.01, false);
        }
    }

    #[test]
    fn test_calibration_captures_bias_and_target() {
        let mut m = machine();
        let sample = OrientationSample::new(1.0, 0.4);

        let mut result = None;
        for _ in 0..10 {
            result = m.step(&sample, 0.0, 0.01, false).calibration;
        }
        let cal = result.expect("calibration should complete");
        assert!((cal.gyro_bias - 0.4).abs() < 1e-5);
        assert!((cal.bootstrap_target - 1.0).abs() < 1e-5);
        assert_eq!(m.state(), RobotState::KickUp);
    }

    #[test]
    fn test_noisy_hold_restarts_window() {
        let mut m = machine();
        for i in 0..10 {
            let rate = if i % 2 == 0 { 10.0 } else { -10.0 };
            let r = m.step(&OrientationSample::new(0.0, rate), 0.0, 0.01, false);
            assert!(r.calibration.is_none());
        }
        assert_eq!(m.state(), RobotState::Calibrating);
    }

    #[test]
    fn test_upright_skips_kickup() {
        let mut m = machine();
        calibrate(&mut m);
        assert_eq!(m.state(), RobotState::KickUp);

        let r = m.step(&still(0.5), 0.0, 0.01, false);
        assert_eq!(m.state(), RobotState::Balancing);
        assert!(r.reset_pid, "entering BALANCING must reset the controller");
    }

    #[test]
    fn test_kickup_pulses_then_catches() {
        let mut m = machine();
        calibrate(&mut m);

        // Resting on the front wheel
        let resting = still(40.0);
        let r = m.step(&resting, 0.0, 0.01, false);
        match r.command {
            TickCommand::OpenLoop { power } => assert!(power > 0.0),
            other => panic!("expected pulse, got {:?}", other),
        }

        // Pulse runs its remaining ticks, then the catch begins with a reset
        m.step(&resting, 0.0, 0.01, false);
        m.step(&resting, 0.0, 0.01, false);
        let r = m.step(&resting, 0.0, 0.01, false);
        assert!(r.reset_pid);
        assert!(matches!(r.command, TickCommand::Balance { .. }));

        // Robot comes upright during the catch window
        for _ in 0..4 {
            m.step(&still(1.0), 0.0, 0.01, false);
        }
        let r = m.step(&still(1.0), 0.0, 0.01, false);
        assert_eq!(m.state(), RobotState::Balancing);
        assert!(r.reset_pid);
    }

    #[test]
    fn test_kickup_escalates_power_on_miss() {
        let mut m = machine();
        calibrate(&mut m);

        let resting = still(40.0);
        // First full attempt fails (still resting at catch end): one assess
        // tick, three pulse ticks, five catch ticks
        for _ in 0..9 {
            m.step(&resting, 0.0, 0.01, false);
        }
        assert_eq!(m.state(), RobotState::KickUp);

        // Next pulse is stronger
        let r = m.step(&resting, 0.0, 0.01, false);
        match r.command {
            TickCommand::OpenLoop { power } => {
                assert!((power - 35.0).abs() < 1e-3, "power={}", power)
            }
            other => panic!("expected pulse, got {:?}", other),
        }
    }

    #[test]
    fn test_kickup_survives_zero_tick_phases() {
        // Phase lengths of zero are floored to one tick instead of
        // wrapping the countdown
        let mut m = BalanceStateMachine::new(
            45.0,
            CalibrationConfig {
                hold_ticks: 10,
                max_rate_stddev: 2.0,
            },
            KickupConfig {
                pulse_ticks: 0,
                catch_ticks: 0,
                ..KickupConfig::default()
            },
            RecoveryConfig {
                ramp_duration: 0.5,
                confirm_ticks: 5,
                upright_band: 15.0,
            },
        );
        calibrate(&mut m);
        assert_eq!(m.state(), RobotState::KickUp);

        // Assess emits the single pulse tick
        let resting = still(40.0);
        let r = m.step(&resting, 0.0, 0.01, false);
        assert!(matches!(r.command, TickCommand::OpenLoop { .. }));
        // Pulse ends, catch begins with a fresh controller
        let r = m.step(&resting, 0.0, 0.01, false);
        assert!(r.reset_pid);
        // One-tick catch concludes upright and enters balancing
        let r = m.step(&still(1.0), 0.0, 0.01, false);
        assert_eq!(m.state(), RobotState::Balancing);
        assert!(r.reset_pid);
    }

    #[test]
    fn test_fall_from_any_state_zeroes_same_tick() {
        for prep in [false, true] {
            let mut m = machine();
            if prep {
                calibrate(&mut m);
                m.step(&still(0.5), 0.0, 0.01, false); // -> Balancing
            }
            let r = m.step(&still(50.0), 0.0, 0.01, false);
            assert_eq!(m.state(), RobotState::Fallen);
            assert_eq!(r.command, TickCommand::Idle);
        }
    }

    #[test]
    fn test_fallen_waits_for_confirmation() {
        let mut m = machine();
        calibrate(&mut m);
        m.step(&still(0.5), 0.0, 0.01, false);
        m.step(&still(50.0), 0.0, 0.01, false);
        assert_eq!(m.state(), RobotState::Fallen);

        // Upright but not yet held long enough
        for _ in 0..4 {
            m.step(&still(5.0), 0.0, 0.01, false);
            assert_eq!(m.state(), RobotState::Fallen);
        }
        let r = m.step(&still(5.0), 0.0, 0.01, false);
        assert_eq!(m.state(), RobotState::Recovering);
        assert!(r.reset_pid);
    }

    #[test]
    fn test_propped_signal_skips_confirmation() {
        let mut m = machine();
        calibrate(&mut m);
        m.step(&still(0.5), 0.0, 0.01, false);
        m.step(&still(50.0), 0.0, 0.01, false);

        let r = m.step(&still(10.0), 0.0, 0.01, true);
        assert_eq!(m.state(), RobotState::Recovering);
        assert!(r.reset_pid);
        // Ramp starts from the propped tilt
        match r.command {
            TickCommand::Balance { target_angle } => {
                assert!((target_angle - 10.0).abs() < 1e-3)
            }
            other => panic!("expected balance command, got {:?}", other),
        }
    }

    #[test]
    fn test_recovery_ramps_to_balancing() {
        let mut m = machine();
        calibrate(&mut m);
        m.step(&still(0.5), 0.0, 0.01, false);
        m.step(&still(50.0), 0.0, 0.01, false);
        m.step(&still(10.0), 0.0, 0.01, true); // -> Recovering

        let mut last_target = 10.0;
        let mut entered_balancing = false;
        for _ in 0..60 {
            let r = m.step(&still(2.0), 0.0, 0.01, false);
            if let TickCommand::Balance { target_angle } = r.command {
                assert!(target_angle <= last_target + 1e-4, "ramp must be monotonic");
                last_target = target_angle;
            }
            if m.state() == RobotState::Balancing {
                assert!(r.reset_pid);
                entered_balancing = true;
                break;
            }
        }
        assert!(entered_balancing, "ramp should complete within 0.5 s");
    }

    #[test]
    fn test_interrupted_fall_during_recovery() {
        let mut m = machine();
        calibrate(&mut m);
        m.step(&still(0.5), 0.0, 0.01, false);
        m.step(&still(50.0), 0.0, 0.01, false);
        m.step(&still(10.0), 0.0, 0.01, true); // -> Recovering

        // Knocked over mid-recovery: fall check still fires
        let r = m.step(&still(60.0), 0.0, 0.01, false);
        assert_eq!(m.state(), RobotState::Fallen);
        assert_eq!(r.command, TickCommand::Idle);
    }

    #[test]
    fn test_stale_estimate_never_confirms_upright() {
        let mut m = machine();
        calibrate(&mut m);
        m.step(&still(0.5), 0.0, 0.01, false);
        m.step(&still(50.0), 0.0, 0.01, false);
        assert_eq!(m.state(), RobotState::Fallen);

        // A held (stale) estimate inside the band, even with the propped
        // signal, must not arm recovery
        let stale = OrientationSample {
            pitch_angle: 5.0,
            pitch_rate: 0.0,
            stale: true,
        };
        for _ in 0..20 {
            m.step(&stale, 0.0, 0.01, true);
        }
        assert_eq!(m.state(), RobotState::Fallen);
    }

    #[test]
    fn test_force_fallen() {
        let mut m = machine();
        calibrate(&mut m);
        m.step(&still(0.5), 0.0, 0.01, false);
        m.force_fallen("sensor loss");
        assert_eq!(m.state(), RobotState::Fallen);
    }

    #[test]
    fn test_restart_calibration() {
        let mut m = machine();
        calibrate(&mut m);
        m.step(&still(0.5), 0.0, 0.01, false);
        assert_eq!(m.state(), RobotState::Balancing);

        m.restart_calibration();
        assert_eq!(m.state(), RobotState::Calibrating);
    }
}
