//! General backend: one backward pass per sample and channel.

use nalgebra::DMatrix;
use num_complex::Complex64;

use super::traits::{write_channel, JacobianBackend};
use crate::error::Result;
use crate::machine::{Sequential, LOG_AMPLITUDE, N_CHANNELS, PHASE};

/// Exact for any architecture, including layers that mix the batch,
/// at the cost of `2 * batch` backward passes over one shared tape.
#[derive(Debug, Default)]
pub struct PerSampleJacobian;

impl JacobianBackend for PerSampleJacobian {
    fn name(&self) -> &'static str {
        "per-sample"
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

        let mut seed = DMatrix::zeros(batch, N_CHANNELS);
        for i in 0..batch {
            for channel in [LOG_AMPLITUDE, PHASE] {
                seed[(i, channel)] = 1.0;
                network.backward(&tape, &seed, false);
                let grad = network.flat_grad();
                network.zero_grad();
                seed[(i, channel)] = 0.0;

                for (k, g) in grad.iter().enumerate() {
                    write_channel(&mut out[(i, k)], channel, *g);
                }
            }
        }
        Ok(())
    }
}
