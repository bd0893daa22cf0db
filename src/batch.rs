//! Batches of sample configurations.

use nalgebra::{DMatrix, DVector};
use rand::Rng;

use crate::error::{Error, Result};

/// An ordered batch of configurations, one per row.
///
/// Produced by a sampler and consumed read-only by the model. Every entry
/// is finite and the batch is never empty.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfigurationBatch {
    samples: DMatrix<f64>,
    weights: Option<DVector<f64>>,
}

impl ConfigurationBatch {
    pub fn new(samples: DMatrix<f64>) -> Result<Self> {
        if samples.nrows() == 0 || samples.ncols() == 0 {
            return Err(Error::MalformedBatch(format!(
                "batch must be non-empty, got shape {}x{}",
                samples.nrows(),
                samples.ncols()
            )));
        }
        if let Some((idx, v)) = samples.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(Error::MalformedBatch(format!(
                "non-finite entry {} at flat index {}",
                v, idx
            )));
        }
        Ok(Self {
            samples,
            weights: None,
        })
    }

    /// Build a batch from row vectors of equal length.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let n_sites = rows.first().map(Vec::len).unwrap_or(0);
        if let Some(bad) = rows.iter().find(|r| r.len() != n_sites) {
            return Err(Error::MalformedBatch(format!(
                "ragged batch: expected rows of length {}, found {}",
                n_sites,
                bad.len()
            )));
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        Self::new(DMatrix::from_row_slice(rows.len(), n_sites, &flat))
    }

    /// Uniformly random ±1 spin configurations.
    pub fn random_spins<R: Rng>(n_samples: usize, n_sites: usize, rng: &mut R) -> Result<Self> {
        let samples = DMatrix::from_fn(n_samples, n_sites, |_, _| {
            if rng.gen::<bool>() { 1.0 } else { -1.0 }
        });
        Self::new(samples)
    }

    /// Attach per-sample probability weights (non-negative, summing to one).
    pub fn with_weights(mut self, weights: DVector<f64>) -> Result<Self> {
        check_weights("ConfigurationBatch::with_weights", self.len(), &weights)?;
        self.weights = Some(weights);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.samples.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.nrows() == 0
    }

    pub fn n_sites(&self) -> usize {
        self.samples.ncols()
    }

    pub fn samples(&self) -> &DMatrix<f64> {
        &self.samples
    }

    /// Per-sample weights, uniform `1/B` when none were attached.
    pub fn weights_or_uniform(&self) -> DVector<f64> {
        self.weights
            .clone()
            .unwrap_or_else(|| DVector::from_element(self.len(), 1.0 / self.len() as f64))
    }

    pub fn row(&self, i: usize) -> Vec<f64> {
        self.samples.row(i).iter().copied().collect()
    }
}

/// Sample weights must be a probability vector over the batch.
pub(crate) fn check_weights(context: &'static str, n_samples: usize, weights: &DVector<f64>) -> Result<()> {
    if weights.len() != n_samples {
        return Err(Error::shape(context, n_samples, weights.len()));
    }
    let total: f64 = weights.iter().sum();
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) || (total - 1.0).abs() > 1e-10 {
        return Err(Error::MalformedBatch(format!(
            "weights must be non-negative and sum to one, sum = {}",
            total
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_rejects_empty_and_non_finite() {
        assert!(matches!(
            ConfigurationBatch::new(DMatrix::zeros(0, 3)),
            Err(Error::MalformedBatch(_))
        ));
        let mut m = DMatrix::from_element(2, 2, 1.0);
        m[(1, 0)] = f64::NAN;
        assert!(matches!(ConfigurationBatch::new(m), Err(Error::MalformedBatch(_))));
    }

    #[test]
    fn test_from_rows_keeps_row_order() {
        let batch = ConfigurationBatch::from_rows(&[vec![1.0, -1.0], vec![-1.0, -1.0], vec![1.0, 1.0]]).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.n_sites(), 2);
        assert_eq!(batch.row(1), vec![-1.0, -1.0]);
        assert!(ConfigurationBatch::from_rows(&[vec![1.0], vec![1.0, 2.0]]).is_err());
    }

    #[test]
    fn test_random_spins_are_plus_minus_one() {
        let mut rng = StdRng::seed_from_u64(7);
        let batch = ConfigurationBatch::random_spins(16, 5, &mut rng).unwrap();
        assert!(batch.samples().iter().all(|v| *v == 1.0 || *v == -1.0));
    }

    #[test]
    fn test_weights_validation() {
        let batch = ConfigurationBatch::from_rows(&[vec![1.0], vec![-1.0]]).unwrap();
        assert!(batch.clone().with_weights(DVector::from_vec(vec![0.5, 0.6])).is_err());
        assert!(batch.clone().with_weights(DVector::from_vec(vec![1.0])).is_err());
        let weighted = batch.with_weights(DVector::from_vec(vec![0.25, 0.75])).unwrap();
        assert_eq!(weighted.weights_or_uniform()[1], 0.75);
    }
}
