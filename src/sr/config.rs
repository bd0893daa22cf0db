//! Stochastic reconfiguration settings and the preconditioned solve.

use std::fmt;

use log::debug;
use nalgebra::DVector;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::qgt::QuantumGeometricTensor;
use super::solver::{conjugate_gradient, lu_solve, SolveInfo};
use crate::batch::ConfigurationBatch;
use crate::error::{Error, Result};
use crate::machine::Machine;

/// Diagonal shift λ added to S before solving.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DiagShift {
    Constant(f64),
    /// `max(initial * factor^step, minimum)`
    Decay { initial: f64, factor: f64, minimum: f64 },
}

impl DiagShift {
    pub fn at(&self, step: usize) -> f64 {
        match *self {
            DiagShift::Constant(lambda) => lambda,
            DiagShift::Decay { initial, factor, minimum } => {
                (initial * factor.powi(step.min(i32::MAX as usize) as i32)).max(minimum)
            }
        }
    }
}

impl fmt::Display for DiagShift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagShift::Constant(lambda) => write!(f, "{:.1e}", lambda),
            DiagShift::Decay { initial, factor, minimum } => {
                write!(f, "{:.1e}*{}^t (min {:.1e})", initial, factor, minimum)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SolverKind {
    /// Matrix-free conjugate gradient.
    Cg { tol: f64, max_iters: usize },
    /// Dense LU on the materialized S.
    Lu,
}

impl fmt::Display for SolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverKind::Cg { tol, max_iters } => write!(f, "cg(tol={:.1e}, max_iters={})", tol, max_iters),
            SolverKind::Lu => write!(f, "lu"),
        }
    }
}

/// Configuration for the natural-gradient correction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SrConfig {
    /// Regularization added to the diagonal of S
    pub diag_shift: DiagShift,
    /// Linear solver for S x = g
    pub solver: SolverKind,
    /// Use the covariance (mean-subtracted) form of S
    pub centered: bool,
    /// Seed each solve with the previous step's solution
    pub reuse_previous_solution: bool,
}

impl Default for SrConfig {
    fn default() -> Self {
        Self {
            diag_shift: DiagShift::Constant(0.01),
            solver: SolverKind::Cg { tol: 1e-5, max_iters: 100 },
            centered: true,
            reuse_previous_solution: true,
        }
    }
}

impl SrConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a constant diagonal shift.
    pub fn with_diag_shift(mut self, lambda: f64) -> Self {
        self.diag_shift = DiagShift::Constant(lambda);
        self
    }

    /// Set a diagonal shift schedule.
    pub fn with_diag_shift_schedule(mut self, shift: DiagShift) -> Self {
        self.diag_shift = shift;
        self
    }

    /// Set the linear solver.
    pub fn with_solver(mut self, solver: SolverKind) -> Self {
        self.solver = solver;
        self
    }

    /// Use the centered (covariance) form of S.
    pub fn with_centered(mut self, centered: bool) -> Self {
        self.centered = centered;
        self
    }

    /// Seed each solve with the previous direction.
    pub fn with_reuse_previous_solution(mut self, reuse: bool) -> Self {
        self.reuse_previous_solution = reuse;
        self
    }

    /// Solve `S x = grad` for the current batch.
    ///
    /// `step` selects the diagonal shift when it follows a schedule.
    pub fn solve(
        &self,
        machine: &mut Machine,
        batch: &ConfigurationBatch,
        grad: &DVector<Complex64>,
        x0: Option<&DVector<Complex64>>,
        step: usize,
    ) -> Result<(DVector<Complex64>, SolveInfo)> {
        if grad.len() != machine.n_par() {
            return Err(Error::shape("SrConfig::solve gradient", machine.n_par(), grad.len()));
        }
        let lambda = self.diag_shift.at(step);
        let mut s = QuantumGeometricTensor::new(machine, batch, lambda).with_centered(self.centered);
        let (x, info) = match self.solver {
            SolverKind::Cg { tol, max_iters } => conjugate_gradient(&mut s, grad, x0, tol, max_iters)?,
            SolverKind::Lu => lu_solve(s.to_dense()?, grad)?,
        };
        debug!(
            "SR solve with {} (λ = {:.3e}): {} iterations, residual {:.3e}",
            self.solver, lambda, info.iterations, info.residual_norm
        );
        Ok((x, info))
    }
}
