//! Balance-point finding
//!
//! A perfectly tuned controller holding the wrong target angle shows up
//! as sustained one-directional motor effort: the robot is upright only
//! because the wheels keep pushing against a lean. Averaging effort over
//! a window while stable and idle, then shifting the target against the
//! mean, walks the setpoint toward the true zero-effort balance point.

use crate::config::BalanceConfig;
use log::warn;
use std::collections::VecDeque;

pub struct BalancePointFinder {
    config: BalanceConfig,
    window: VecDeque<f32>,
    clamp_strikes: u32,
    frozen: bool,
}

impl BalancePointFinder {
    pub fn new(config: BalanceConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(config.window_size),
            clamp_strikes: 0,
            frozen: false,
            config,
        }
    }

    /// Record one reflex-tick effort sample
    ///
    /// Samples only count while the robot is steady (low pitch rate) and
    /// no intentional drive is present; effort during a wobble or a
    /// commanded move says nothing about the balance point. `effort` is
    /// the raw PID output before battery compensation.
    pub fn observe(&mut self, effort: f32, pitch_rate: f32, drive_idle: bool) {
        if self.frozen || !drive_idle || pitch_rate.abs() >= self.config.stability_threshold
        {
            return;
        }
        if self.window.len() == self.config.window_size {
            self.window.pop_front();
        }
        self.window.push_back(effort);
    }

    /// Propose a target-angle shift at the adaptation rate
    ///
    /// Returns a small delta (degrees) when mean effort exceeds the
    /// deadband; the window is cleared after a proposal so each
    /// adjustment is judged on fresh evidence. The agent applies the
    /// delta through the controller's clamped target setter and reports
    /// the result back via [`note_applied`](Self::note_applied).
    pub fn maybe_adjust(&mut self) -> Option<f32> {
        if self.frozen || self.window.len() < self.config.window_size {
            return None;
        }

        let mean = self.window.iter().sum::<f32>() / self.window.len() as f32;
        if mean.abs() <= self.config.deadband {
            return None;
        }
        self.window.clear();

        let delta = (-mean * self.config.learning_rate)
            .clamp(-self.config.max_step, self.config.max_step);
        Some(delta)
    }

    /// Feedback from the single writer: whether the applied adjustment
    /// hit the ±deviation clamp
    ///
    /// Repeated clamp hits mean the mechanical balance point sits outside
    /// the safe range - a bent chassis or a slipped wheel, not something
    /// adaptation can fix. Surface it and freeze rather than push the
    /// setpoint against the wall forever.
    pub fn note_applied(&mut self, clamped: bool) {
        if !clamped {
            self.clamp_strikes = 0;
            return;
        }
        self.clamp_strikes += 1;
        if self.clamp_strikes >= self.config.clamp_strike_limit && !self.frozen {
            self.frozen = true;
            warn!(
                "BalanceFinder: Target clamp hit {} times in a row, freezing \
                 adaptation (check the chassis)",
                self.clamp_strikes
            );
        }
    }

    /// Frozen after repeated clamp hits; cleared only by an external reset
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn clear_fault(&mut self) {
        self.frozen = false;
        self.clamp_strikes = 0;
        self.window.clear();
    }

    #[cfg(test)]
    fn window_len(&self) -> usize {
        self.window.len()
    }
}
