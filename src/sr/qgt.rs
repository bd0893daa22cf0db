//! Quantum geometric tensor applied without materializing it.
//!
//! For the batch Jacobian `J` and sample weights `W` (uniform `1/B` unless
//! the batch carries its own), the operator is
//!
//!   S = J̃ᴴ diag(W) J̃ + λ I,   J̃ = J - ⟨J⟩_W
//!
//! Because `W ∘ (J̃ v)` has zero sum, `J̃ᴴ` can be replaced by `Jᴴ` on it,
//! so one application costs one JVP and one VJP.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;

use super::traits::LinearOperator;
use crate::batch::{check_weights, ConfigurationBatch};
use crate::error::Result;
use crate::machine::Machine;

pub struct QuantumGeometricTensor<'a> {
    machine: &'a mut Machine,
    batch: &'a ConfigurationBatch,
    weights: DVector<f64>,
    diag_shift: f64,
    centered: bool,
}

impl<'a> QuantumGeometricTensor<'a> {
    pub fn new(machine: &'a mut Machine, batch: &'a ConfigurationBatch, diag_shift: f64) -> Self {
        let weights = batch.weights_or_uniform();
        Self {
            machine,
            batch,
            weights,
            diag_shift,
            centered: true,
        }
    }

    /// Use the raw `Jᴴ W J` instead of the covariance form.
    pub fn with_centered(mut self, centered: bool) -> Self {
        self.centered = centered;
        self
    }

    /// Override the per-sample weights.
    ///
    /// They must be non-negative and sum to one: `apply` relies on the
    /// weighted centered vector summing to zero.
    pub fn with_weights(mut self, weights: DVector<f64>) -> Result<Self> {
        check_weights("QuantumGeometricTensor::with_weights", self.batch.len(), &weights)?;
        self.weights = weights;
        Ok(self)
    }

    pub fn diag_shift(&self) -> f64 {
        self.diag_shift
    }

    /// Dense `S` built from the materialized Jacobian.
    pub fn to_dense(&mut self) -> Result<DMatrix<Complex64>> {
        let mut jac = self.machine.der_log(self.batch)?;
        if self.centered {
            for k in 0..jac.ncols() {
                let mean: Complex64 = jac
                    .column(k)
                    .iter()
                    .zip(self.weights.iter())
                    .map(|(z, w)| *z * *w)
                    .sum();
                for z in jac.column_mut(k).iter_mut() {
                    *z -= mean;
                }
            }
        }
        let weighted = DMatrix::from_fn(jac.nrows(), jac.ncols(), |i, k| jac[(i, k)] * self.weights[i]);
        let mut s = jac.adjoint() * weighted;
        for k in 0..s.nrows() {
            s[(k, k)] += Complex64::from(self.diag_shift);
        }
        Ok(s)
    }
}

impl LinearOperator for QuantumGeometricTensor<'_> {
    fn dim(&self) -> usize {
        self.machine.n_par()
    }

    fn apply(&mut self, x: &DVector<Complex64>) -> Result<DVector<Complex64>> {
        let jv = self.machine.jacobian_vector_prod(self.batch, x)?;
        let mean: Complex64 = if self.centered {
            jv.iter().zip(self.weights.iter()).map(|(z, w)| *z * *w).sum()
        } else {
            Complex64::new(0.0, 0.0)
        };
        let y = DVector::from_fn(jv.len(), |i, _| (jv[i] - mean) * self.weights[i]);
        let s = self.machine.vector_jacobian_prod(self.batch, &y)?;
        Ok(s + x * Complex64::from(self.diag_shift))
    }
}
