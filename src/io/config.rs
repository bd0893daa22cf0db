//! YAML run configuration.
//!
//! ```yaml
//! n_sites: 8
//! n_samples: 256
//! seed: 42
//! sigma: 0.1
//! fused_gradients: true
//! network:
//!   - type: conv1d
//!     channels: 2
//!     kernel_size: 3
//!   - type: log_cosh
//!   - type: dense
//!     features: 2
//! sr:
//!   diag_shift: 0.01
//!   solver: {method: cg, tol: 1.0e-6, max_iters: 200}
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::jacobian::BatchGradCapability;
use crate::machine::{BatchCenter, Conv1d, Dense, Diagonal, Layer, LogCosh, Machine, Sequential};
use crate::sr::SrConfig;

/// One layer of the network description.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    Dense { features: usize },
    Conv1d { channels: usize, kernel_size: usize },
    Diagonal,
    LogCosh,
    BatchCenter,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub n_sites: usize,
    pub n_samples: usize,
    pub seed: u64,
    /// Standard deviation of the initial parameters
    pub sigma: f64,
    /// Allow the fused per-sample gradient backend
    pub fused_gradients: bool,
    pub network: Vec<LayerSpec>,
    pub sr: SrConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            n_sites: 8,
            n_samples: 256,
            seed: 42,
            sigma: 0.1,
            fused_gradients: true,
            network: vec![
                LayerSpec::Dense { features: 16 },
                LayerSpec::LogCosh,
                LayerSpec::Dense { features: 2 },
            ],
            sr: SrConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn capability(&self) -> BatchGradCapability {
        BatchGradCapability::from_flag(self.fused_gradients)
    }

    /// Instantiate the layer stack, threading the feature dimension through.
    pub fn build_network(&self) -> Result<Sequential> {
        let mut layers: Vec<Box<dyn Layer>> = Vec::with_capacity(self.network.len());
        let mut dim = self.n_sites;
        for spec in &self.network {
            let layer: Box<dyn Layer> = match *spec {
                LayerSpec::Dense { features } => Box::new(Dense::new(dim, features)),
                LayerSpec::Conv1d { channels, kernel_size } => {
                    if self.n_sites == 0 || dim % self.n_sites != 0 {
                        return Err(Error::InvalidNetwork(format!(
                            "conv1d input of width {} is not a multiple of {} sites",
                            dim, self.n_sites
                        )));
                    }
                    Box::new(Conv1d::new(self.n_sites, dim / self.n_sites, channels, kernel_size))
                }
                LayerSpec::Diagonal => Box::new(Diagonal::new(dim)),
                LayerSpec::LogCosh => Box::new(LogCosh),
                LayerSpec::BatchCenter => Box::new(BatchCenter::new(dim)),
            };
            dim = layer.output_dim(dim)?;
            layers.push(layer);
        }
        Sequential::new(layers, self.n_sites)
    }

    /// Network plus backend, with randomly initialized parameters.
    pub fn build_machine(&self) -> Result<Machine> {
        let mut machine = Machine::new(self.build_network()?, self.capability());
        machine.init_random_parameters(self.seed, self.sigma)?;
        Ok(machine)
    }
}

pub fn read_config<P: AsRef<Path>>(path: P) -> Result<RunConfig> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let config: RunConfig = serde_yaml::from_reader(reader)?;
    Ok(config)
}
