//! Fused backend: all per-sample gradients from one backward pass per channel.

use nalgebra::DMatrix;
use num_complex::Complex64;

use super::traits::{write_channel, JacobianBackend};
use crate::error::{Error, Result};
use crate::machine::{Sequential, LOG_AMPLITUDE, N_CHANNELS, PHASE};

/// Retains per-sample parameter gradients instead of summing them.
///
/// Only valid when no layer mixes samples, so construction goes through
/// [`FusedJacobian::new`], which inspects the layer stack.
#[derive(Debug)]
pub struct FusedJacobian {
    _checked: (),
}

impl FusedJacobian {
    pub fn new(network: &Sequential) -> Result<Self> {
        network.check_grad_batch_support()?;
        Ok(Self { _checked: () })
    }
}

impl JacobianBackend for FusedJacobian {
    fn name(&self) -> &'static str {
        "fused"
    }

    fn jacobian_into(
        &self,
        network: &mut Sequential,
        samples: &DMatrix<f64>,
        out: &mut DMatrix<Complex64>,
    ) -> Result<()> {
        let batch = samples.nrows();
        let tape = network.forward_tape(samples);
        network.zero_grad();

        for channel in [LOG_AMPLITUDE, PHASE] {
            let mut seed = DMatrix::zeros(batch, N_CHANNELS);
            seed.column_mut(channel).fill(1.0);
            network.backward(&tape, &seed, true);

            let per_sample = network.flat_grad_batch(batch);
            network.zero_grad();
            let per_sample = per_sample.ok_or_else(|| {
                Error::InvalidNetwork("a layer did not retain per-sample gradients".into())
            })?;

            for (z, g) in out.iter_mut().zip(per_sample.iter()) {
                write_channel(z, channel, *g);
            }
        }
        Ok(())
    }
}
