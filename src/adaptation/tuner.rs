//! Continuous gain tuning
//!
//! Observes closed-loop error history and nudges the PID gains toward a
//! better operating point. This is a soft, bounded hill-climb driven by
//! three heuristics, not a full re-identification:
//!
//! - sustained oscillation (frequent sign changes with amplitude above
//!   the noise floor) -> back off Kp, add damping via Kd
//! - very stable and upright -> tighten control by raising Kp
//! - sustained one-directional lean -> raise Ki
//!
//! Each step is scaled by a decaying aggression factor: a fresh run
//! (first boot, forced recalibration) tunes fast, a mature run barely
//! moves. Aggression is an explicit piece of state with its own decay
//! law so it can be tested on its own.

use crate::config::TunerConfig;
use crate::reflex::PidParams;
use log::warn;
use std::collections::VecDeque;

/// Proposed absolute gains, produced by [`ContinuousTuner::maybe_retune`]
/// and applied by the agent
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GainProposal {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

pub struct ContinuousTuner {
    config: TunerConfig,
    errors: VecDeque<f32>,
    cooldown: u32,
    aggression: f32,
    aggression_base: f32,
    clamp_strikes: u32,
    frozen: bool,
}

impl ContinuousTuner {
    pub fn new(config: TunerConfig) -> Self {
        let base = config.mature_aggression;
        Self {
            errors: VecDeque::with_capacity(config.buffer_size),
            cooldown: 0,
            aggression: base,
            aggression_base: base,
            clamp_strikes: 0,
            frozen: false,
            config,
        }
    }

    /// Restart the aggression schedule
    ///
    /// A fresh run (no stored gains, or forced recalibration) starts
    /// aggressive; a mature run starts gentle. Either way it decays
    /// toward the floor from there.
    pub fn reset_aggression(&mut self, fresh: bool) {
        self.aggression_base = if fresh {
            self.config.fresh_aggression
        } else {
            self.config.mature_aggression
        };
        self.aggression = self.aggression_base;
    }

    /// Record one reflex-tick error sample
    pub fn observe(&mut self, error: f32) {
        if self.errors.len() == self.config.buffer_size {
            self.errors.pop_front();
        }
        self.errors.push_back(error);
    }

    /// Evaluate the heuristics at the adaptation rate
    ///
    /// Returns the full set of proposed gains, already clamped to the
    /// configured safe range, or `None` when no adjustment is warranted.
    /// Never proposes a target-angle change.
    pub fn maybe_retune(&mut self, current: &PidParams) -> Option<GainProposal> {
        // Aggression decays whether or not we act
        let floor = self.config.aggression_floor * self.aggression_base;
        self.aggression = (self.aggression * self.config.aggression_decay).max(floor);

        if self.frozen {
            return None;
        }
        if self.cooldown > 0 {
            self.cooldown -= 1;
            return None;
        }
        if self.errors.len() < self.config.buffer_size {
            return None;
        }

        let mean = self.errors.iter().sum::<f32>() / self.errors.len() as f32;
        let variance = self
            .errors
            .iter()
            .map(|e| (e - mean).powi(2))
            .sum::<f32>()
            / self.errors.len() as f32;
        let stddev = variance.sqrt();
        let crossings = self.count_zero_crossings();
        let oscillation_limit =
            (self.config.buffer_size as f32 * self.config.oscillation_fraction) as usize;

        let mut kp = current.kp;
        let mut ki = current.ki;
        let mut kd = current.kd;
        let mut tuned = false;

        if crossings > oscillation_limit && stddev > self.config.noise_floor {
            // Ringing: too much proportional action, not enough damping
            kp -= self.config.kp_oscillation_step * self.aggression;
            kd += self.config.kd_oscillation_step * self.aggression;
            tuned = true;
        } else if stddev < self.config.stability_stddev
            && mean.abs() < self.config.stability_mean
        {
            // Calm and upright: tighten
            kp += self.config.kp_stability_step * self.aggression;
            tuned = true;
        }

        if mean.abs() > self.config.steady_error {
            // Persistent lean the P term is not closing
            ki += self.config.ki_steady_step * self.aggression;
            tuned = true;
        }

        if !tuned {
            return None;
        }

        let clamped_kp = kp.clamp(0.0, self.config.kp_max);
        let clamped_ki = ki.clamp(0.0, self.config.ki_max);
        let clamped_kd = kd.clamp(0.0, self.config.kd_max);

        if clamped_kp != kp || clamped_ki != ki || clamped_kd != kd {
            self.clamp_strikes += 1;
            if self.clamp_strikes >= self.config.clamp_strike_limit {
                self.frozen = true;
                warn!(
                    "Tuner: Gain proposals hit the safe range {} times in a row, \
                     freezing adaptation (mechanical fault?)",
                    self.clamp_strikes
                );
            }
        } else {
            self.clamp_strikes = 0;
        }

        self.cooldown = self.config.cooldown;
        Some(GainProposal {
            kp: clamped_kp,
            ki: clamped_ki,
            kd: clamped_kd,
        })
    }

    /// Adaptation frozen after repeated clamp strikes; cleared only by an
    /// external reset
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// External fault reset: thaw and restart the schedule
    pub fn clear_fault(&mut self) {
        self.frozen = false;
        self.clamp_strikes = 0;
        self.errors.clear();
        self.cooldown = 0;
    }

    pub fn aggression(&self) -> f32 {
        self.aggression
    }

    fn count_zero_crossings(&self) -> usize {
        let mut crossings = 0;
        let mut iter = self.errors.iter();
        let Some(mut prev) = iter.next().copied() else {
            return 0;
        };
        for &e in iter {
            if (prev > 0.0 && e <= 0.0) || (prev < 0.0 && e >= 0.0) {
                crossings += 1;
            }
            prev = e;
        }
        crossings
    }
}
