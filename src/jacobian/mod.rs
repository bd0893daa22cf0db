//! Jacobian module - per-sample log-derivatives and matrix-free products.

mod traits;
mod fused;
mod per_sample;
mod vjp;

pub use traits::{select_backend, BatchGradCapability, JacobianBackend};
pub use fused::FusedJacobian;
pub use per_sample::PerSampleJacobian;
pub use vjp::{jacobian_vector_prod, vector_jacobian_prod};
