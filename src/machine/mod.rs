//! Machine module - differentiable models of the log-amplitude.

mod traits;
mod layers;
mod network;
mod model;

pub use traits::{Layer, Param};
pub use layers::{BatchCenter, Conv1d, Dense, Diagonal, LogCosh};
pub use network::{Sequential, Tape, LOG_AMPLITUDE, N_CHANNELS, PHASE};
pub use model::Machine;
