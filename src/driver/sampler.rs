//! Samplers that need no Markov chain.

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::traits::Sampler;
use crate::batch::ConfigurationBatch;
use crate::error::Result;

/// Replays the same batch on every call.
#[derive(Clone, Debug)]
pub struct FixedSampler {
    batch: ConfigurationBatch,
    n_resets: usize,
}

impl FixedSampler {
    pub fn new(batch: ConfigurationBatch) -> Self {
        Self { batch, n_resets: 0 }
    }

    pub fn n_resets(&self) -> usize {
        self.n_resets
    }
}

impl Sampler for FixedSampler {
    fn reset(&mut self) {
        self.n_resets += 1;
    }

    fn sample(&mut self) -> Result<ConfigurationBatch> {
        Ok(self.batch.clone())
    }
}

/// Independent uniformly random ±1 configurations.
#[derive(Clone, Debug)]
pub struct UniformSpinSampler {
    n_samples: usize,
    n_sites: usize,
    rng: StdRng,
}

impl UniformSpinSampler {
    pub fn new(n_samples: usize, n_sites: usize, seed: u64) -> Self {
        Self {
            n_samples,
            n_sites,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Sampler for UniformSpinSampler {
    fn reset(&mut self) {}

    fn sample(&mut self) -> Result<ConfigurationBatch> {
        ConfigurationBatch::random_spins(self.n_samples, self.n_sites, &mut self.rng)
    }
}
