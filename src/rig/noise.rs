//! Seedable noise source for the simulation rig

use rand::prelude::*;
use rand::rngs::SmallRng;
use rand_distr::{Distribution, StandardNormal, Uniform};

/// Gaussian noise generator with deterministic seeding
///
/// Seed 0 draws from entropy; any other seed reproduces the same
/// sequence, which the scenario tests rely on.
pub struct NoiseGenerator {
    rng: SmallRng,
}

impl NoiseGenerator {
    pub fn new(seed: u64) -> Self {
        let rng = if seed == 0 {
            SmallRng::from_entropy()
        } else {
            SmallRng::seed_from_u64(seed)
        };
        Self { rng }
    }

    /// Zero-mean Gaussian sample with the given standard deviation
    #[inline]
    pub fn gaussian(&mut self, stddev: f32) -> f32 {
        if stddev == 0.0 {
            return 0.0;
        }
        let n: f32 = self.rng.sample(StandardNormal);
        n * stddev
    }

    /// Returns true with the given probability
    #[inline]
    pub fn chance(&mut self, probability: f32) -> bool {
        if probability <= 0.0 {
            return false;
        }
        Uniform::new(0.0f32, 1.0).sample(&mut self.rng) < probability
    }
}
