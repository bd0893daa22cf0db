//! Error types shared by the whole crate.
//!
//! Only shape and input errors abort an optimization step. Solver
//! non-convergence and discarded imaginary parts are reported through
//! `log::warn!` instead, and an unsupported architecture for the fused
//! Jacobian backend is recovered during backend selection.

use thiserror::Error;

/// Result type alias for fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A vector or matrix does not have the length the parameter layout requires.
    #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The sampler produced a batch that cannot be fed to the model.
    #[error("malformed configuration batch: {0}")]
    MalformedBatch(String),

    /// A layer cannot take part in fused per-sample gradient extraction.
    #[error("layer `{layer}` at position {index} does not support fused per-sample gradients")]
    UnsupportedArchitecture { layer: &'static str, index: usize },

    /// The layer stack is not a valid two-channel model, or cannot serve
    /// the requested computation.
    #[error("invalid network: {0}")]
    InvalidNetwork(String),

    #[error("an optimization step is already in progress")]
    StepInProgress,

    #[error("configuration error: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn shape(context: &'static str, expected: usize, actual: usize) -> Self {
        Error::ShapeMismatch {
            context,
            expected,
            actual,
        }
    }
}
