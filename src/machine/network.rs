//! Sequential layer stack with reverse- and forward-mode differentiation.

use nalgebra::{DMatrix, DVector};

use super::traits::Layer;
use crate::error::{Error, Result};
use crate::params::{ParamGroup, ParameterSet};

/// Number of real output channels: log|ψ| and the phase.
pub const N_CHANNELS: usize = 2;

/// Channel holding log|ψ|, i.e. the real part of log ψ.
pub const LOG_AMPLITUDE: usize = 0;

/// Channel holding the phase, i.e. the imaginary part of log ψ.
pub const PHASE: usize = 1;

/// Activations recorded by a forward pass.
///
/// `activations[k]` is the input of layer `k`; the last entry is the
/// network output. Backward passes may reuse one tape any number of times.
#[derive(Clone, Debug)]
pub struct Tape {
    activations: Vec<DMatrix<f64>>,
}

#[derive(Debug)]
pub struct Sequential {
    layers: Vec<Box<dyn Layer>>,
    input_dim: usize,
}

impl Sequential {
    /// Build a stack and check that its last layer yields two channels.
    pub fn new(layers: Vec<Box<dyn Layer>>, input_dim: usize) -> Result<Self> {
        if layers.is_empty() {
            return Err(Error::InvalidNetwork("network has no layers".into()));
        }
        let mut dim = input_dim;
        for layer in &layers {
            dim = layer.output_dim(dim)?;
        }
        if dim != N_CHANNELS {
            return Err(Error::InvalidNetwork(format!(
                "network must output {} channels (log-amplitude, phase), got {}",
                N_CHANNELS, dim
            )));
        }
        Ok(Self { layers, input_dim })
    }

    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn n_par(&self) -> usize {
        self.layers.iter().map(|l| l.n_params()).sum()
    }

    /// First layer whose output rows depend on other samples, with its index.
    pub fn batch_mixing_layer(&self) -> Option<(usize, &'static str)> {
        self.layers
            .iter()
            .enumerate()
            .find(|(_, layer)| layer.mixes_batch())
            .map(|(index, layer)| (index, layer.name()))
    }

    /// Ok if every layer admits fused per-sample gradients, otherwise the
    /// first offending layer.
    pub fn check_grad_batch_support(&self) -> Result<()> {
        for (index, layer) in self.layers.iter().enumerate() {
            if layer.mixes_batch() || !layer.supports_grad_batch() {
                return Err(Error::UnsupportedArchitecture {
                    layer: layer.name(),
                    index,
                });
            }
        }
        Ok(())
    }

    pub fn forward(&self, input: &DMatrix<f64>) -> DMatrix<f64> {
        self.layers
            .iter()
            .fold(input.clone(), |x, layer| layer.forward(&x))
    }

    pub fn forward_tape(&self, input: &DMatrix<f64>) -> Tape {
        let mut activations = Vec::with_capacity(self.layers.len() + 1);
        activations.push(input.clone());
        for layer in &self.layers {
            let next = layer.forward(&activations[activations.len() - 1]);
            activations.push(next);
        }
        Tape { activations }
    }

    /// Back-propagate `seed` (shape `(batch, N_CHANNELS)`) through the tape,
    /// accumulating parameter gradients.
    pub fn backward(&mut self, tape: &Tape, seed: &DMatrix<f64>, retain_per_sample: bool) {
        let mut grad = seed.clone();
        for (k, layer) in self.layers.iter_mut().enumerate().rev() {
            grad = layer.backward(&tape.activations[k], &grad, retain_per_sample);
        }
    }

    /// Forward-mode derivative of the output along a flat parameter tangent.
    pub fn jvp(&self, input: &DMatrix<f64>, param_tangent: &DVector<f64>) -> DMatrix<f64> {
        let mut x = input.clone();
        let mut dx = DMatrix::zeros(input.nrows(), input.ncols());
        let mut offset = 0;
        for layer in &self.layers {
            let tangents: Vec<DMatrix<f64>> = layer
                .params()
                .iter()
                .map(|p| {
                    let (r, c) = p.value.shape();
                    let t = DMatrix::from_column_slice(r, c, &param_tangent.as_slice()[offset..offset + p.len()]);
                    offset += p.len();
                    t
                })
                .collect();
            dx = layer.jvp(&x, &dx, &tangents);
            x = layer.forward(&x);
        }
        dx
    }

    pub fn zero_grad(&mut self) {
        for layer in self.layers.iter_mut() {
            for p in layer.params_mut() {
                p.zero_grad();
            }
        }
    }

    pub fn grads_zeroed(&self) -> bool {
        self.layers
            .iter()
            .all(|l| l.params().iter().all(|p| p.grad_is_zero()))
    }

    /// Accumulated gradients, flattened in parameter order.
    pub fn flat_grad(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.n_par(),
            self.layers
                .iter()
                .flat_map(|l| l.params().iter())
                .flat_map(|p| p.grad.iter().copied()),
        )
    }

    /// Per-sample gradients of the last retaining backward pass, shape
    /// `(batch, n_par)`. `None` if any parameter did not retain them.
    pub fn flat_grad_batch(&self, batch_size: usize) -> Option<DMatrix<f64>> {
        let mut out = DMatrix::zeros(batch_size, self.n_par());
        let mut offset = 0;
        for p in self.layers.iter().flat_map(|l| l.params().iter()) {
            let gb = p.grad_batch.as_ref()?;
            if gb.shape() != (batch_size, p.len()) {
                return None;
            }
            out.columns_mut(offset, p.len()).copy_from(gb);
            offset += p.len();
        }
        Some(out)
    }

    pub fn flat_values(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.n_par(),
            self.layers
                .iter()
                .flat_map(|l| l.params().iter())
                .flat_map(|p| p.value.iter().copied()),
        )
    }

    pub fn set_flat_values(&mut self, values: &DVector<f64>) -> Result<()> {
        let n_par = self.n_par();
        if values.len() != n_par {
            return Err(Error::shape("Sequential::set_flat_values", n_par, values.len()));
        }
        let mut offset = 0;
        for layer in self.layers.iter_mut() {
            for p in layer.params_mut() {
                let n = p.len();
                p.value
                    .as_mut_slice()
                    .copy_from_slice(&values.as_slice()[offset..offset + n]);
                offset += n;
            }
        }
        Ok(())
    }

    /// Structured view, groups named `"{layer}.{param}"`.
    pub fn parameter_set(&self) -> ParameterSet {
        let groups = self
            .layers
            .iter()
            .enumerate()
            .flat_map(|(i, l)| {
                l.params()
                    .iter()
                    .map(move |p| ParamGroup::real(format!("{}.{}", i, p.name), &p.value))
            })
            .collect();
        ParameterSet::new(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::layers::{BatchCenter, Dense, LogCosh};
    use approx::assert_relative_eq;

    fn network() -> Sequential {
        let mut first = Dense::new(3, 4);
        let mut second = Dense::new(4, 2);
        for (s, layer) in [&mut first, &mut second].into_iter().enumerate() {
            for p in layer.params_mut() {
                let (r, c) = p.value.shape();
                p.value = DMatrix::from_fn(r, c, |i, j| ((s + 1) as f64 * 0.3 + i as f64 * 0.7 - j as f64 * 0.4).cos());
            }
        }
        Sequential::new(vec![Box::new(first), Box::new(LogCosh), Box::new(second)], 3).unwrap()
    }

    #[test]
    fn test_rejects_wrong_output_channels() {
        let err = Sequential::new(vec![Box::new(Dense::new(3, 3))], 3).unwrap_err();
        assert!(matches!(err, Error::InvalidNetwork(_)));
        assert!(Sequential::new(vec![], 3).is_err());
    }

    #[test]
    fn test_parameter_set_layout_matches_flat_values() {
        let net = network();
        let set = net.parameter_set();
        assert_eq!(set.n_par(), net.n_par());
        assert_eq!(set.groups()[0].name, "0.weight");
        assert_eq!(set.groups()[3].name, "2.bias");
        let flat = set.flatten();
        let values = net.flat_values();
        for k in 0..values.len() {
            assert_eq!(flat[k].re, values[k]);
        }
    }

    #[test]
    fn test_jvp_matches_backward() {
        // <seed, J t> computed forward must equal <J^T seed, t> computed backward
        let mut net = network();
        let x = DMatrix::from_row_slice(2, 3, &[1.0, -1.0, 1.0, 0.5, 0.25, -1.0]);
        let seed = DMatrix::from_row_slice(2, 2, &[0.3, -0.7, 1.1, 0.2]);
        let t = DVector::from_fn(net.n_par(), |k, _| (k as f64 * 0.37).sin());

        let forward = net.jvp(&x, &t).component_mul(&seed).sum();
        let tape = net.forward_tape(&x);
        net.backward(&tape, &seed, false);
        let backward = net.flat_grad().dot(&t);
        assert_relative_eq!(forward, backward, epsilon = 1e-10);

        net.zero_grad();
        assert!(net.grads_zeroed());
    }

    #[test]
    fn test_grad_batch_support() {
        assert!(network().check_grad_batch_support().is_ok());
        let mixed = Sequential::new(
            vec![Box::new(Dense::new(3, 2)), Box::new(BatchCenter::new(2))],
            3,
        )
        .unwrap();
        assert_eq!(network().batch_mixing_layer(), None);
        assert_eq!(mixed.batch_mixing_layer(), Some((1, "BatchCenter")));
        let names: Vec<&str> = mixed.layers().iter().map(|l| l.name()).collect();
        assert_eq!(names, ["Dense", "BatchCenter"]);
        match mixed.check_grad_batch_support() {
            Err(Error::UnsupportedArchitecture { layer, index }) => {
                assert_eq!(layer, "BatchCenter");
                assert_eq!(index, 1);
            }
            other => panic!("expected UnsupportedArchitecture, got {:?}", other),
        }
    }

    #[test]
    fn test_set_flat_values_checks_length() {
        let mut net = network();
        assert!(net.set_flat_values(&DVector::zeros(3)).is_err());
        let v = DVector::from_fn(net.n_par(), |k, _| k as f64);
        net.set_flat_values(&v).unwrap();
        assert_eq!(net.flat_values(), v);
    }
}
