//! Traits for the collaborators the step driver consumes.

use nalgebra::DVector;
use num_complex::Complex64;

use super::stats::Stats;
use crate::batch::ConfigurationBatch;
use crate::error::Result;
use crate::machine::Machine;

/// Source of configuration batches.
pub trait Sampler {
    /// Discard chain state so the next batch reflects the current parameters.
    fn reset(&mut self);
    fn sample(&mut self) -> Result<ConfigurationBatch>;
}

/// Loss statistics and bare gradient over one batch.
pub trait Expectation {
    fn expect_and_grad(
        &mut self,
        machine: &mut Machine,
        batch: &ConfigurationBatch,
    ) -> Result<(Stats, DVector<Complex64>)>;
}

/// Parameter update rule.
pub trait Optimizer {
    fn init(&mut self, _n_par: usize, _holomorphic: bool) {}
    fn update(&mut self, dp: &DVector<Complex64>, params: &DVector<Complex64>) -> DVector<Complex64>;
    fn reset(&mut self) {}
}

/// Operator with a sparse row structure in the configuration basis.
pub trait LocalOperator {
    /// Non-zero elements `⟨x|O|x'⟩` of the row for `x`, with their `x'`.
    fn connections(&self, x: &[f64]) -> Vec<(Complex64, Vec<f64>)>;
}
