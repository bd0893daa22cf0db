//! The variational machine: a layer stack plus its Jacobian backend.

use log::warn;
use nalgebra::{DMatrix, DVector};
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use super::network::Sequential;
use crate::batch::ConfigurationBatch;
use crate::error::{Error, Result};
use crate::jacobian::{self, select_backend, BatchGradCapability, JacobianBackend};
use crate::params::ParameterSet;

/// Model of log ψ with real parameters.
///
/// The Jacobian backend is chosen once, here, from the declared layer
/// composition and the startup capability flag.
#[derive(Debug)]
pub struct Machine {
    network: Sequential,
    backend: Box<dyn JacobianBackend>,
}

impl Machine {
    pub fn new(network: Sequential, capability: BatchGradCapability) -> Self {
        let backend = select_backend(&network, capability);
        Self { network, backend }
    }

    pub fn network(&self) -> &Sequential {
        &self.network
    }

    pub fn n_par(&self) -> usize {
        self.network.n_par()
    }

    pub fn n_sites(&self) -> usize {
        self.network.input_dim()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Parameters are real, so the model is never holomorphic.
    pub fn is_holomorphic(&self) -> bool {
        false
    }

    pub fn parameters(&self) -> ParameterSet {
        self.network.parameter_set()
    }

    pub fn flat_parameters(&self) -> DVector<Complex64> {
        self.network.flat_values().map(|v| Complex64::new(v, 0.0))
    }

    /// Assign parameters from a flat complex vector.
    ///
    /// Imaginary parts cannot be represented and are dropped with a warning.
    pub fn set_parameters(&mut self, params: &DVector<Complex64>) -> Result<()> {
        if params.len() != self.n_par() {
            return Err(Error::shape("Machine::set_parameters", self.n_par(), params.len()));
        }
        if params.iter().any(|z| z.im != 0.0) {
            warn!("machine parameters are real, imaginary part will be discarded");
        }
        self.network.set_flat_values(&params.map(|z| z.re))
    }

    /// Draw every parameter from `N(0, sigma²)`.
    pub fn init_random_parameters(&mut self, seed: u64, sigma: f64) -> Result<()> {
        let normal = Normal::new(0.0, sigma)
            .map_err(|e| Error::InvalidNetwork(format!("invalid sigma {}: {}", sigma, e)))?;
        let mut rng = StdRng::seed_from_u64(seed);
        let values = DVector::from_fn(self.n_par(), |_, _| normal.sample(&mut rng));
        self.network.set_flat_values(&values)
    }

    /// log ψ for every sample.
    pub fn log_val(&self, batch: &ConfigurationBatch) -> Result<DVector<Complex64>> {
        self.check_batch(batch)?;
        let out = self.network.forward(batch.samples());
        Ok(DVector::from_fn(batch.len(), |i, _| Complex64::new(out[(i, 0)], out[(i, 1)])))
    }

    pub fn der_log(&mut self, batch: &ConfigurationBatch) -> Result<DMatrix<Complex64>> {
        let mut out = DMatrix::zeros(batch.len(), self.n_par());
        self.der_log_into(batch, &mut out)?;
        Ok(out)
    }

    /// Per-sample log-derivatives written into a caller-supplied buffer.
    pub fn der_log_into(
        &mut self,
        batch: &ConfigurationBatch,
        out: &mut DMatrix<Complex64>,
    ) -> Result<()> {
        self.check_batch(batch)?;
        if out.nrows() != batch.len() {
            return Err(Error::shape("Machine::der_log_into rows", batch.len(), out.nrows()));
        }
        if out.ncols() != self.n_par() {
            return Err(Error::shape("Machine::der_log_into columns", self.n_par(), out.ncols()));
        }
        self.backend
            .jacobian_into(&mut self.network, batch.samples(), out)
    }

    /// `Jᴴ w`, two backward passes regardless of the batch size.
    pub fn vector_jacobian_prod(
        &mut self,
        batch: &ConfigurationBatch,
        w: &DVector<Complex64>,
    ) -> Result<DVector<Complex64>> {
        self.check_batch(batch)?;
        if w.len() != batch.len() {
            return Err(Error::shape("Machine::vector_jacobian_prod", batch.len(), w.len()));
        }
        Ok(jacobian::vector_jacobian_prod(&mut self.network, batch.samples(), w))
    }

    /// `J v`, two forward-mode passes.
    pub fn jacobian_vector_prod(
        &self,
        batch: &ConfigurationBatch,
        v: &DVector<Complex64>,
    ) -> Result<DVector<Complex64>> {
        self.check_batch(batch)?;
        if v.len() != self.n_par() {
            return Err(Error::shape("Machine::jacobian_vector_prod", self.n_par(), v.len()));
        }
        Ok(jacobian::jacobian_vector_prod(&self.network, batch.samples(), v))
    }

    pub fn grads_zeroed(&self) -> bool {
        self.network.grads_zeroed()
    }

    fn check_batch(&self, batch: &ConfigurationBatch) -> Result<()> {
        if batch.n_sites() != self.n_sites() {
            return Err(Error::MalformedBatch(format!(
                "configurations have {} sites, machine expects {}",
                batch.n_sites(),
                self.n_sites()
            )));
        }
        Ok(())
    }
}
