//! Plain gradient descent.

use nalgebra::DVector;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::traits::Optimizer;

/// `p ← p - η dp`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sgd {
    pub learning_rate: f64,
}

impl Default for Sgd {
    fn default() -> Self {
        Self { learning_rate: 0.05 }
    }
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for Sgd {
    fn update(&mut self, dp: &DVector<Complex64>, params: &DVector<Complex64>) -> DVector<Complex64> {
        params - dp * Complex64::from(self.learning_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sgd_update() {
        let mut sgd = Sgd::new(0.5);
        let params = DVector::from_vec(vec![Complex64::new(1.0, 0.0), Complex64::new(0.0, 1.0)]);
        let dp = DVector::from_vec(vec![Complex64::new(2.0, 0.0), Complex64::new(0.0, -2.0)]);
        let next = sgd.update(&dp, &params);
        assert_relative_eq!(next[0].re, 0.0);
        assert_relative_eq!(next[1].im, 2.0);
    }
}
