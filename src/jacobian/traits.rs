//! Strategy interface for per-sample Jacobian extraction.

use std::fmt;

use log::info;
use nalgebra::DMatrix;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::fused::FusedJacobian;
use super::per_sample::PerSampleJacobian;
use crate::error::Result;
use crate::machine::{Sequential, LOG_AMPLITUDE, PHASE};

/// Whether fused per-sample gradients may be used at all.
///
/// Resolved once at startup (from configuration) and handed to machine
/// construction; backends never consult global state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchGradCapability {
    Available,
    Unavailable,
}

impl BatchGradCapability {
    pub fn from_flag(enabled: bool) -> Self {
        if enabled {
            BatchGradCapability::Available
        } else {
            BatchGradCapability::Unavailable
        }
    }
}

impl Default for BatchGradCapability {
    fn default() -> Self {
        BatchGradCapability::Available
    }
}

/// Computes the complex Jacobian `J[i, k] = ∂ log ψ(x_i) / ∂θ_k`.
///
/// The real part comes from the log-amplitude channel and the imaginary
/// part from the phase channel. Implementations must leave the network's
/// gradient buffers zeroed on return.
pub trait JacobianBackend: fmt::Debug {
    fn name(&self) -> &'static str;

    /// Fill `out` (shape `(batch, n_par)`, checked by the caller).
    fn jacobian_into(
        &self,
        network: &mut Sequential,
        samples: &DMatrix<f64>,
        out: &mut DMatrix<Complex64>,
    ) -> Result<()>;
}

/// Pick the fused backend when the capability is available and every layer
/// supports it, otherwise the per-sample loop.
pub fn select_backend(
    network: &Sequential,
    capability: BatchGradCapability,
) -> Box<dyn JacobianBackend> {
    match capability {
        BatchGradCapability::Unavailable => {
            info!("fused per-sample gradients unavailable, using per-sample backend");
            Box::new(PerSampleJacobian)
        }
        BatchGradCapability::Available => match FusedJacobian::new(network) {
            Ok(fused) => {
                info!("using fused per-sample gradient backend");
                Box::new(fused)
            }
            Err(e) => {
                info!("{}; falling back to per-sample backend", e);
                Box::new(PerSampleJacobian)
            }
        },
    }
}

/// Store a real channel derivative into the matching part of `z`.
pub(crate) fn write_channel(z: &mut Complex64, channel: usize, value: f64) {
    match channel {
        LOG_AMPLITUDE => z.re = value,
        PHASE => z.im = value,
        _ => unreachable!("only two output channels"),
    }
}
