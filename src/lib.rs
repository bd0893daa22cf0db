//! Rust SR - per-sample Jacobians and stochastic reconfiguration in Rust
//!
//! This crate extracts complex log-derivatives of a variational model over
//! a batch of configurations and uses them to precondition the gradient
//! with the quantum geometric tensor (natural gradient).
//!
//! A complex log-amplitude is carried as two real output channels:
//! channel [`LOG_AMPLITUDE`] holds `log|ψ|` and channel [`PHASE`] holds
//! `arg ψ`. Row `i` of the Jacobian is `∂ch0 + i ∂ch1` for sample `i`.

pub mod error;
pub mod params;
pub mod batch;
pub mod machine;
pub mod jacobian;
pub mod sr;
pub mod driver;
pub mod io;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use params::{ParamGroup, ParamKind, ParameterSet};
pub use batch::ConfigurationBatch;
pub use machine::{BatchCenter, Conv1d, Dense, Diagonal, Layer, LogCosh, Machine, Sequential, LOG_AMPLITUDE, N_CHANNELS, PHASE};
pub use jacobian::{BatchGradCapability, JacobianBackend};
pub use sr::{conjugate_gradient, DiagShift, LinearOperator, QuantumGeometricTensor, SolveInfo, SolverKind, SrConfig};
pub use driver::{DriverState, Expectation, FixedSampler, LocalOperator, MonteCarloEstimator, Optimizer, Sampler, Sgd, SteadyState, Stats};
pub use io::{read_config, LayerSpec, RunConfig};
