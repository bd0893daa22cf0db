//! Linear solvers for `S x = g`.

use log::{debug, warn};
use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;

use super::traits::LinearOperator;
use crate::error::{Error, Result};

/// Outcome of one linear solve.
#[derive(Clone, Debug, PartialEq)]
pub struct SolveInfo {
    /// Operator applications after the initial residual.
    pub iterations: usize,
    /// Residual norm of the returned iterate.
    pub residual_norm: f64,
    pub converged: bool,
}

/// Conjugate gradient for Hermitian positive-definite operators.
///
/// Stops once `‖b - A x‖ ≤ tol ‖b‖`. If the cap is hit first, the iterate
/// with the smallest residual is returned and a warning is logged; with a
/// stochastic `S` exact convergence is not meaningful anyway.
pub fn conjugate_gradient<A: LinearOperator + ?Sized>(
    op: &mut A,
    b: &DVector<Complex64>,
    x0: Option<&DVector<Complex64>>,
    tol: f64,
    max_iters: usize,
) -> Result<(DVector<Complex64>, SolveInfo)> {
    let n = op.dim();
    if b.len() != n {
        return Err(Error::shape("conjugate_gradient rhs", n, b.len()));
    }
    if let Some(x0) = x0 {
        if x0.len() != n {
            return Err(Error::shape("conjugate_gradient x0", n, x0.len()));
        }
    }

    let b_norm = b.norm();
    if b_norm == 0.0 {
        return Ok((
            DVector::zeros(n),
            SolveInfo { iterations: 0, residual_norm: 0.0, converged: true },
        ));
    }
    let threshold = tol * b_norm;

    let (mut x, mut r) = match x0 {
        Some(x0) => (x0.clone(), b - op.apply(x0)?),
        None => (DVector::zeros(n), b.clone()),
    };
    let mut r_norm = r.norm();
    let mut best = (x.clone(), r_norm);
    if r_norm <= threshold {
        return Ok((x, SolveInfo { iterations: 0, residual_norm: r_norm, converged: true }));
    }

    let mut p = r.clone();
    let mut rs_old = r_norm * r_norm;
    let mut iterations = 0;

    while iterations < max_iters {
        iterations += 1;
        let ap = op.apply(&p)?;
        let curvature = p.dotc(&ap).re;
        if curvature <= 0.0 {
            warn!("conjugate gradient breakdown: non-positive curvature {:.3e}", curvature);
            break;
        }
        let alpha = Complex64::from(rs_old / curvature);
        x += &p * alpha;
        r -= &ap * alpha;
        r_norm = r.norm();
        if r_norm < best.1 {
            best = (x.clone(), r_norm);
        }
        if r_norm <= threshold {
            debug!("conjugate gradient converged in {} iterations, residual {:.3e}", iterations, r_norm);
            return Ok((x, SolveInfo { iterations, residual_norm: r_norm, converged: true }));
        }
        let rs_new = r_norm * r_norm;
        p = &r + &p * Complex64::from(rs_new / rs_old);
        rs_old = rs_new;
    }

    warn!(
        "SR solver did not converge after {} iterations: residual {:.3e}, target {:.3e}",
        iterations, best.1, threshold
    );
    let (x_best, residual_norm) = best;
    Ok((x_best, SolveInfo { iterations, residual_norm, converged: false }))
}

/// Dense LU solve. A singular matrix falls back to the right-hand side.
pub fn lu_solve(s: DMatrix<Complex64>, b: &DVector<Complex64>) -> Result<(DVector<Complex64>, SolveInfo)> {
    if s.nrows() != b.len() || s.ncols() != b.len() {
        return Err(Error::shape("lu_solve", s.nrows(), b.len()));
    }
    let residual = |s: &DMatrix<Complex64>, x: &DVector<Complex64>| (b - s * x).norm();
    match s.clone().lu().solve(b) {
        Some(x) => {
            let residual_norm = residual(&s, &x);
            Ok((x, SolveInfo { iterations: 1, residual_norm, converged: true }))
        }
        None => {
            warn!("S matrix is singular, falling back to the bare gradient");
            let residual_norm = residual(&s, b);
            Ok((b.clone(), SolveInfo { iterations: 1, residual_norm, converged: false }))
        }
    }
}
