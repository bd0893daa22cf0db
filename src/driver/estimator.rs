//! Monte Carlo estimate of `⟨O⟩` and its gradient.

use log::debug;
use nalgebra::DVector;
use num_complex::Complex64;

use super::stats::Stats;
use super::traits::{Expectation, LocalOperator};
use crate::batch::ConfigurationBatch;
use crate::error::{Error, Result};
use crate::machine::Machine;

/// Expectation of a local operator from the local estimator
///
///   O_loc(x) = Σ_x' ⟨x|O|x'⟩ ψ(x') / ψ(x)
///
/// with the force `F = Jᴴ W (O_loc - ⟨O_loc⟩_W)` as gradient.
///
/// The connected configurations `x'` are evaluated as a batch of their
/// own, so machines with batch-mixing layers are rejected: their ψ(x')
/// would depend on which batch it was evaluated in.
#[derive(Clone, Debug)]
pub struct MonteCarloEstimator<O: LocalOperator> {
    operator: O,
}

impl<O: LocalOperator> MonteCarloEstimator<O> {
    pub fn new(operator: O) -> Self {
        Self { operator }
    }

    /// Local values for every sample in the batch.
    pub fn local_values(&self, machine: &Machine, batch: &ConfigurationBatch) -> Result<DVector<Complex64>> {
        if let Some((index, layer)) = machine.network().batch_mixing_layer() {
            return Err(Error::InvalidNetwork(format!(
                "layer `{}` at position {} mixes the batch, local values are undefined",
                layer, index
            )));
        }
        let log_psi = machine.log_val(batch)?;
        let mut local = DVector::zeros(batch.len());
        for i in 0..batch.len() {
            let connections = self.operator.connections(&batch.row(i));
            if connections.is_empty() {
                continue;
            }
            let (elements, rows): (Vec<Complex64>, Vec<Vec<f64>>) = connections.into_iter().unzip();
            let log_psi_conn = machine.log_val(&ConfigurationBatch::from_rows(&rows)?)?;
            local[i] = elements
                .iter()
                .zip(log_psi_conn.iter())
                .map(|(mel, lp)| mel * (lp - log_psi[i]).exp())
                .sum();
        }
        Ok(local)
    }
}

impl<O: LocalOperator> Expectation for MonteCarloEstimator<O> {
    fn expect_and_grad(
        &mut self,
        machine: &mut Machine,
        batch: &ConfigurationBatch,
    ) -> Result<(Stats, DVector<Complex64>)> {
        let local = self.local_values(machine, batch)?;
        let stats = Stats::from_samples(local.as_slice());

        let weights = batch.weights_or_uniform();
        let center: Complex64 = local.iter().zip(weights.iter()).map(|(z, w)| *z * *w).sum();
        let seed = DVector::from_fn(local.len(), |i, _| (local[i] - center) * weights[i]);
        let grad = machine.vector_jacobian_prod(batch, &seed)?;
        debug!("estimated {} with |F| = {:.3e}", stats, grad.norm());
        Ok((stats, grad))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jacobian::BatchGradCapability;
    use crate::machine::{BatchCenter, Dense, Diagonal, LogCosh, Sequential};
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Σ_i x_i, diagonal in the configuration basis.
    struct Magnetization;

    impl LocalOperator for Magnetization {
        fn connections(&self, x: &[f64]) -> Vec<(Complex64, Vec<f64>)> {
            vec![(Complex64::from(x.iter().sum::<f64>()), x.to_vec())]
        }
    }

    /// Σ_i X_i, flips one site at a time.
    struct TransverseField;

    impl LocalOperator for TransverseField {
        fn connections(&self, x: &[f64]) -> Vec<(Complex64, Vec<f64>)> {
            (0..x.len())
                .map(|i| {
                    let mut flipped = x.to_vec();
                    flipped[i] = -flipped[i];
                    (Complex64::from(1.0), flipped)
                })
                .collect()
        }
    }

    fn machine() -> Machine {
        let layers: Vec<Box<dyn crate::machine::Layer>> =
            vec![Box::new(Dense::new(3, 4)), Box::new(LogCosh), Box::new(Dense::new(4, 2))];
        let mut m = Machine::new(Sequential::new(layers, 3).unwrap(), BatchGradCapability::Available);
        m.init_random_parameters(5, 0.3).unwrap();
        m
    }

    #[test]
    fn test_diagonal_local_values() {
        let m = machine();
        let batch = ConfigurationBatch::from_rows(&[vec![1.0, 1.0, -1.0], vec![-1.0, -1.0, -1.0]]).unwrap();
        let local = MonteCarloEstimator::new(Magnetization).local_values(&m, &batch).unwrap();
        assert_relative_eq!(local[0].re, 1.0, epsilon = 1e-12);
        assert_relative_eq!(local[1].re, -3.0, epsilon = 1e-12);
        assert_relative_eq!(local[0].im, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_off_diagonal_local_values() {
        let m = machine();
        let x = vec![1.0, -1.0, 1.0];
        let batch = ConfigurationBatch::from_rows(&[x.clone()]).unwrap();
        let local = MonteCarloEstimator::new(TransverseField).local_values(&m, &batch).unwrap();

        let log_psi = m.log_val(&batch).unwrap()[0];
        let mut expected = Complex64::new(0.0, 0.0);
        for i in 0..3 {
            let mut y = x.clone();
            y[i] = -y[i];
            let lp = m.log_val(&ConfigurationBatch::from_rows(&[y]).unwrap()).unwrap()[0];
            expected += (lp - log_psi).exp();
        }
        assert_relative_eq!(local[0].re, expected.re, epsilon = 1e-12);
        assert_relative_eq!(local[0].im, expected.im, epsilon = 1e-12);
    }

    #[test]
    fn test_force_matches_materialized_jacobian() {
        let mut m = machine();
        let mut rng = StdRng::seed_from_u64(2);
        let batch = ConfigurationBatch::random_spins(16, 3, &mut rng).unwrap();
        let mut estimator = MonteCarloEstimator::new(TransverseField);
        let (stats, grad) = estimator.expect_and_grad(&mut m, &batch).unwrap();

        let local = estimator.local_values(&m, &batch).unwrap();
        let jac = m.der_log(&batch).unwrap();
        let centered = local.map(|z| (z - stats.mean) / 16.0);
        let expected = jac.adjoint() * centered;
        assert_eq!(grad.len(), m.n_par());
        for k in 0..m.n_par() {
            assert_relative_eq!(grad[k].re, expected[k].re, epsilon = 1e-10);
            assert_relative_eq!(grad[k].im, expected[k].im, epsilon = 1e-10);
        }
        assert!(m.grads_zeroed());
    }

    #[test]
    fn test_constant_local_values_give_zero_force() {
        let layers: Vec<Box<dyn crate::machine::Layer>> = vec![Box::new(Diagonal::new(2))];
        let mut m = Machine::new(Sequential::new(layers, 2).unwrap(), BatchGradCapability::Available);
        let batch = ConfigurationBatch::from_rows(&[vec![1.0, -1.0], vec![-1.0, 1.0]]).unwrap();
        let (stats, grad) = MonteCarloEstimator::new(Magnetization).expect_and_grad(&mut m, &batch).unwrap();
        assert_relative_eq!(stats.mean.re, 0.0);
        assert_relative_eq!(grad.norm(), 0.0);
    }

    /// ⟨x|1|x'⟩ = δ(x, x'), local value one everywhere.
    struct Identity;

    impl LocalOperator for Identity {
        fn connections(&self, x: &[f64]) -> Vec<(Complex64, Vec<f64>)> {
            vec![(Complex64::from(1.0), x.to_vec())]
        }
    }

    #[test]
    fn test_identity_local_values_are_one() {
        let m = machine();
        let mut rng = StdRng::seed_from_u64(6);
        let batch = ConfigurationBatch::random_spins(5, 3, &mut rng).unwrap();
        let local = MonteCarloEstimator::new(Identity).local_values(&m, &batch).unwrap();
        for z in local.iter() {
            assert_relative_eq!(z.re, 1.0, epsilon = 1e-12);
            assert_relative_eq!(z.im, 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_rejects_batch_mixing_machine() {
        let layers: Vec<Box<dyn crate::machine::Layer>> = vec![
            Box::new(Dense::new(3, 3)),
            Box::new(BatchCenter::new(3)),
            Box::new(LogCosh),
            Box::new(Dense::new(3, 2)),
        ];
        let mut m = Machine::new(Sequential::new(layers, 3).unwrap(), BatchGradCapability::Available);
        m.init_random_parameters(5, 0.3).unwrap();
        let mut rng = StdRng::seed_from_u64(6);
        let batch = ConfigurationBatch::random_spins(3, 3, &mut rng).unwrap();
        let mut estimator = MonteCarloEstimator::new(Identity);
        assert!(matches!(estimator.local_values(&m, &batch), Err(Error::InvalidNetwork(_))));
        assert!(matches!(estimator.expect_and_grad(&mut m, &batch), Err(Error::InvalidNetwork(_))));
    }
}
