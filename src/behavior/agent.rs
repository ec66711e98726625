//! Fixed-period balance agent
//!
//! Single-threaded tick loop and the sole writer of every tunable
//! parameter. Each tick: drain external events, read sensors, estimate
//! tilt, step the state machine, run the control law, write motors. The
//! adaptation tier observes every balancing tick but only gets to act on
//! every Nth tick, so a slow adaptation pass can never starve the reflex
//! path.

use crate::adaptation::{BalancePointFinder, ContinuousTuner};
use crate::behavior::state::{BalanceStateMachine, RobotState, TickCommand};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::reflex::{BatteryCompensator, PidController, PidParams, TiltEstimator};
use crate::rig::{MotorSink, SensorSource};
use crate::store::{ParamStore, StoredParams, SCHEMA_VERSION};
use crate::types::{ExternalEvent, MotionRequest, OrientationSample, SensorFrame, WheelCommand};
use crossbeam_channel::Receiver;
use log::{error, info, warn};
use std::time::{Duration, Instant};

/// Turn differential at full turn intent
const TURN_GAIN: f32 = 30.0;

/// Consecutive rejected motor writes before the loop gives up
const MOTOR_FAULT_LIMIT: u32 = 10;

pub struct Agent {
    config: AppConfig,
    sensors: Box<dyn SensorSource>,
    motors: Box<dyn MotorSink>,
    store: Box<dyn ParamStore>,
    events: Receiver<ExternalEvent>,

    estimator: TiltEstimator,
    pid: PidController,
    battery: BatteryCompensator,
    tuner: ContinuousTuner,
    finder: BalancePointFinder,
    machine: BalanceStateMachine,

    motion: MotionRequest,
    last_frame: SensorFrame,
    /// No stored parameters existed at startup; bootstrap calibration
    /// seeds the target and tuning starts aggressive
    first_run: bool,

    fault_streak: u32,
    motor_fault_streak: u32,
    sensors_lost: bool,
    low_battery_warned: bool,

    tick_count: u64,
    /// Runtime copy; doubled under sustained overruns
    adaptation_interval: u32,
    overrun_streak: u32,
    running: bool,
}

impl Agent {
    pub fn new(
        config: AppConfig,
        sensors: Box<dyn SensorSource>,
        motors: Box<dyn MotorSink>,
        mut store: Box<dyn ParamStore>,
        events: Receiver<ExternalEvent>,
    ) -> Result<Self> {
        let stored = store.load()?;
        let first_run = stored.is_none();
        let params = stored.unwrap_or_else(StoredParams::factory);
        if first_run {
            info!("Agent: No stored parameters, starting from factory defaults");
        } else {
            info!(
                "Agent: Loaded parameters (kp={:.2} ki={:.3} kd={:.2} target={:.2})",
                params.kp, params.ki, params.kd, params.target_angle
            );
        }

        // A stored record is untrusted input: a target outside the safe
        // deviation band would aim the controller off vertical at boot
        let max_deviation = config.balance.max_deviation;
        let target = params.target_angle.clamp(-max_deviation, max_deviation);
        if target != params.target_angle {
            warn!(
                "Agent: Stored target {:.2} deg outside the safe band, clamped to {:.2} deg",
                params.target_angle, target
            );
        }
        let pid = PidController::new(
            PidParams::new(params.kp, params.ki, params.kd, target),
            config.control.integral_limit,
        );
        let mut tuner = ContinuousTuner::new(config.tuner.clone());
        tuner.reset_aggression(first_run);
        let machine = BalanceStateMachine::new(
            config.control.fall_angle_limit,
            config.calibration.clone(),
            config.kickup.clone(),
            config.recovery.clone(),
        );

        Ok(Self {
            estimator: TiltEstimator::new(config.control.complementary_alpha),
            pid,
            battery: BatteryCompensator::new(config.battery.clone()),
            finder: BalancePointFinder::new(config.balance.clone()),
            tuner,
            machine,
            adaptation_interval: config.control.adaptation_interval,
            config,
            sensors,
            motors,
            store,
            events,
            motion: MotionRequest::default(),
            last_frame: SensorFrame::default(),
            first_run,
            fault_streak: 0,
            motor_fault_streak: 0,
            sensors_lost: false,
            low_battery_warned: false,
            tick_count: 0,
            overrun_streak: 0,
            running: true,
        })
    }

    pub fn state(&self) -> RobotState {
        self.machine.state()
    }

    pub fn pid_params(&self) -> PidParams {
        *self.pid.params()
    }

    pub fn battery_factor(&self) -> f32 {
        self.battery.factor()
    }

    pub fn is_adaptation_frozen(&self) -> bool {
        self.tuner.is_frozen() || self.finder.is_frozen()
    }

    /// Externally requested drive intent; sampled by the next tick
    pub fn set_motion(&mut self, motion: MotionRequest) {
        self.motion = motion;
    }

    /// Run the loop at the configured rate until shutdown
    pub fn run(&mut self) -> Result<()> {
        let period = Duration::from_secs_f32(self.config.control.loop_time());
        info!(
            "Agent: Control loop at {} Hz, adaptation every {} ticks",
            self.config.control.loop_hz, self.adaptation_interval
        );

        let mut next_tick = Instant::now() + period;
        while self.running {
            self.tick(period.as_secs_f32())?;

            let now = Instant::now();
            if now > next_tick {
                self.note_overrun();
                // Resynchronize instead of bursting to catch up
                next_tick = now + period;
            } else {
                self.overrun_streak = 0;
                std::thread::sleep(next_tick - now);
                next_tick += period;
            }
        }

        self.shutdown()
    }

    /// One reflex tick; public so scenario tests can drive the agent at
    /// simulated time
    pub fn tick(&mut self, dt: f32) -> Result<()> {
        let propped = self.drain_events();
        if !self.running {
            return Ok(());
        }

        let sample = self.sense(dt);
        let base_target =
            self.pid.params().target_angle + self.motion.velocity * self.config.control.max_tilt_angle;

        let step = self.machine.step(&sample, base_target, dt, propped);
        if let Some(cal) = step.calibration {
            self.apply_calibration(cal.gyro_bias, cal.bootstrap_target);
        }
        if step.reset_pid {
            self.pid.reset();
        }

        let mut balance_effort = None;
        let command = match step.command {
            TickCommand::Idle => WheelCommand::zero(),
            TickCommand::OpenLoop { power } => {
                WheelCommand::from_balance(self.battery.compensate(power), 0.0)
            }
            TickCommand::Balance { target_angle } => {
                let raw = self.pid.update(
                    sample.pitch_angle,
                    target_angle,
                    dt,
                    Some(sample.pitch_rate),
                );
                balance_effort = Some((raw, sample.pitch_angle - target_angle));
                let turn = self.motion.turn * TURN_GAIN;
                WheelCommand::from_balance(self.battery.compensate(raw), turn)
            }
        };
        self.write_motors(command)?;

        // Adaptation observes steady balancing only; stale estimates and
        // scripted maneuvers say nothing about the tune
        if self.machine.state() == RobotState::Balancing && !sample.stale {
            if let Some((raw, err)) = balance_effort {
                self.tuner.observe(err);
                self.finder
                    .observe(raw, sample.pitch_rate, self.motion.is_idle());
            }
        }

        if self.tick_count % self.adaptation_interval as u64 == 0 {
            self.adaptation_tick();
        }
        self.tick_count += 1;
        Ok(())
    }

    /// Drain pending events; returns whether a propped-upright signal
    /// arrived this tick
    fn drain_events(&mut self) -> bool {
        let mut propped = false;
        while let Ok(event) = self.events.try_recv() {
            match event {
                ExternalEvent::ProppedUpright => propped = true,
                ExternalEvent::ForceRecalibration => self.force_recalibration(),
                ExternalEvent::Shutdown => {
                    info!("Agent: Shutdown requested");
                    self.running = false;
                }
            }
        }
        propped
    }

    fn sense(&mut self, dt: f32) -> OrientationSample {
        match self.sensors.read() {
            Ok(frame) => {
                self.last_frame = frame;
                if self.fault_streak > 0 {
                    info!(
                        "Agent: Sensor source recovered after {} faults",
                        self.fault_streak
                    );
                }
                self.fault_streak = 0;
                self.sensors_lost = false;
                self.estimator.update(&frame, dt)
            }
            Err(e) => {
                self.fault_streak += 1;
                if self.fault_streak == 1 {
                    warn!("Agent: Sensor fault: {}", e);
                }
                if self.fault_streak >= self.config.control.sensor_fault_limit
                    && !self.sensors_lost
                {
                    self.sensors_lost = true;
                    error!(
                        "Agent: Sensor source lost after {} consecutive faults, safe stop",
                        self.fault_streak
                    );
                    self.machine.force_fallen("sensor source lost");
                }
                // Hold the last estimate, flagged stale
                let mut sample = self.estimator.update(&self.last_frame, dt);
                sample.stale = true;
                sample
            }
        }
    }

    fn write_motors(&mut self, command: WheelCommand) -> Result<()> {
        match self.motors.drive(command) {
            Ok(()) => {
                self.motor_fault_streak = 0;
                Ok(())
            }
            Err(e) => {
                self.motor_fault_streak += 1;
                warn!("Agent: Motor write failed: {}", e);
                if self.motor_fault_streak >= MOTOR_FAULT_LIMIT {
                    let _ = self.motors.stop();
                    return Err(Error::MotorFault(format!(
                        "{} consecutive rejected commands",
                        self.motor_fault_streak
                    )));
                }
                Ok(())
            }
        }
    }

    fn apply_calibration(&mut self, gyro_bias: f32, bootstrap_target: f32) {
        self.estimator.set_gyro_bias(gyro_bias);
        // The hold average is the best estimate of where the body actually
        // is; seeding avoids a jerk-start from accumulated bias drift
        self.estimator.seed(bootstrap_target);
        if self.first_run {
            // Geometric bootstrap only; the balance-point finder owns all
            // refinement from here
            let target = bootstrap_target
                .clamp(-self.config.balance.max_deviation, self.config.balance.max_deviation);
            self.pid.set_target_angle(target);
            self.first_run = false;
            self.persist();
        }
    }

    /// Subsampled adaptation pass
    fn adaptation_tick(&mut self) {
        self.battery.observe_voltage(self.last_frame.voltage);
        if self.battery.is_low(self.last_frame.voltage) {
            if !self.low_battery_warned {
                warn!(
                    "Agent: Battery low ({:.2} V), compensation near its ceiling",
                    self.last_frame.voltage
                );
                self.low_battery_warned = true;
            }
        } else {
            self.low_battery_warned = false;
        }

        if self.machine.state() != RobotState::Balancing {
            return;
        }

        let mut mutated = false;
        if let Some(proposal) = self.tuner.maybe_retune(self.pid.params()) {
            info!(
                "Agent: Gains retuned to kp={:.2} ki={:.3} kd={:.2}",
                proposal.kp, proposal.ki, proposal.kd
            );
            self.pid.set_gains(proposal.kp, proposal.ki, proposal.kd);
            mutated = true;
        }
        if let Some(delta) = self.finder.maybe_adjust() {
            let (applied, clamped) = self
                .pid
                .shift_target_angle(delta, self.config.balance.max_deviation);
            self.finder.note_applied(clamped);
            info!(
                "Agent: Balance point shifted {:+.3} deg to {:.2} deg",
                delta, applied
            );
            mutated = true;
        }
        if mutated {
            self.persist();
        }
    }

    fn force_recalibration(&mut self) {
        info!("Agent: Forced recalibration, discarding learned parameters");
        let factory = StoredParams::factory();
        self.pid.set_gains(factory.kp, factory.ki, factory.kd);
        self.pid.set_target_angle(factory.target_angle);
        self.pid.reset();
        self.tuner.clear_fault();
        self.tuner.reset_aggression(true);
        self.finder.clear_fault();
        self.machine.restart_calibration();
        self.first_run = true;
        self.persist();
    }

    /// Write-through of the current tuned parameters
    fn persist(&mut self) {
        let params = self.pid.params();
        let record = StoredParams {
            schema_version: SCHEMA_VERSION,
            kp: params.kp,
            ki: params.ki,
            kd: params.kd,
            target_angle: params.target_angle,
        };
        if let Err(e) = self.store.save(&record) {
            // Persistence is best-effort; the live controller keeps running
            warn!("Agent: Failed to persist parameters: {}", e);
        }
    }

    fn note_overrun(&mut self) {
        self.overrun_streak += 1;
        if self.overrun_streak >= self.config.control.overrun_shed_threshold {
            self.overrun_streak = 0;
            let doubled = (self.adaptation_interval * 2).min(1000);
            if doubled != self.adaptation_interval {
                warn!(
                    "Agent: Sustained tick overruns, shedding adaptation to every {} ticks",
                    doubled
                );
                self.adaptation_interval = doubled;
            }
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        self.motors.stop()?;
        self.persist();
        info!("Agent: Stopped, parameters flushed");
        Ok(())
    }
}
