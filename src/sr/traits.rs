//! Linear operator seam for the iterative solvers.

use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;

use crate::error::{Error, Result};

/// A square complex operator known only through its action on vectors.
pub trait LinearOperator {
    fn dim(&self) -> usize;

    fn apply(&mut self, x: &DVector<Complex64>) -> Result<DVector<Complex64>>;
}

impl LinearOperator for DMatrix<Complex64> {
    fn dim(&self) -> usize {
        self.nrows()
    }

    fn apply(&mut self, x: &DVector<Complex64>) -> Result<DVector<Complex64>> {
        if x.len() != self.ncols() {
            return Err(Error::shape("DMatrix::apply", self.ncols(), x.len()));
        }
        Ok(&*self * x)
    }
}
