//! Driver module - collaborators and the optimization step loop.

mod traits;
mod stats;
mod estimator;
mod optimizer;
mod sampler;
mod steady_state;

pub use traits::{Expectation, LocalOperator, Optimizer, Sampler};
pub use stats::Stats;
pub use estimator::MonteCarloEstimator;
pub use optimizer::Sgd;
pub use sampler::{FixedSampler, UniformSpinSampler};
pub use steady_state::{DriverState, SteadyState};
