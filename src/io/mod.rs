//! IO module - run configuration files.

mod config;

pub use config::{read_config, LayerSpec, RunConfig};
