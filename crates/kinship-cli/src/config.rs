//! Run configuration: an optional JSON file, overridden by command-line flags.
//!
//! ```json
//! {
//!   "data": {
//!     "features": "data/features.npy",
//!     "knn_graph": "data/knn.npy",
//!     "labels": "data/labels.npy"
//!   },
//!   "sampler": { "k_at_hop": [200, 5], "active_connection": 5 },
//!   "training": { "epochs": 100, "batch_size": 64 },
//!   "log_dir": "logs",
//!   "model_dir": "models"
//! }
//! ```

use anyhow::{Context, Result};
use kinship_core::{DataPaths, SamplerConfig};
use kinship_nn::TrainingConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Input arrays. No defaults: they come from the file or the flags.
    pub data: Option<DataPaths>,
    pub sampler: SamplerConfig,
    pub training: TrainingConfig,
    /// Scalar logs go to `<log_dir>/<stamp>/`.
    pub log_dir: PathBuf,
    /// Checkpoints go to `<model_dir>/gcn-<stamp>/`.
    pub model_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            data: None,
            sampler: SamplerConfig::default(),
            training: TrainingConfig::default(),
            log_dir: PathBuf::from("logs"),
            model_dir: PathBuf::from("models"),
        }
    }
}

impl RunConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    /// File contents when a path is given, defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::from_file)
    }

    /// Replace whichever data paths were given on the command line.
    pub fn override_data(
        &mut self,
        features: Option<PathBuf>,
        knn_graph: Option<PathBuf>,
        labels: Option<PathBuf>,
    ) -> Result<()> {
        let merged = match self.data.take() {
            Some(mut data) => {
                if let Some(p) = features {
                    data.features = p;
                }
                if let Some(p) = knn_graph {
                    data.knn_graph = p;
                }
                if let Some(p) = labels {
                    data.labels = p;
                }
                data
            }
            None => match (features, knn_graph, labels) {
                (Some(f), Some(k), Some(l)) => DataPaths::new(f, k, l),
                (None, None, None) => return Ok(()),
                _ => anyhow::bail!(
                    "--features, --knn-graph and --labels must be given together \
                     when the config has no data section"
                ),
            },
        };
        self.data = Some(merged);
        Ok(())
    }

    pub fn data(&self) -> Result<&DataPaths> {
        self.data.as_ref().context(
            "No input data: pass --features, --knn-graph and --labels \
             or a --config with a data section",
        )
    }
}
