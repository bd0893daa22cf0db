//! SR module - geometric tensor and the natural-gradient solve.

mod traits;
mod qgt;
mod solver;
mod config;

pub use traits::LinearOperator;
pub use qgt::QuantumGeometricTensor;
pub use solver::{conjugate_gradient, lu_solve, SolveInfo};
pub use config::{DiagShift, SolverKind, SrConfig};
