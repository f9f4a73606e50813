//! Periodic model checkpoints.
//!
//! Each checkpoint is a safetensors file holding every parameter of the
//! [`VarMap`] plus a JSON sidecar with the step, epoch, loss and the shape
//! information needed to rebuild the network:
//!
//! ```text
//! <dir>/gcn-0000.safetensors
//! <dir>/gcn-0000.json
//! <dir>/gcn-0001.safetensors
//! ...
//! ```

use crate::error::{Error, Result};
use candle_nn::VarMap;
use kinship_core::SamplerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// What a checkpoint was trained on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub input_dim: usize,
    pub sampler: SamplerConfig,
}

/// Sidecar metadata stored next to each checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Global step the parameters were saved at.
    pub step: usize,
    pub epoch: usize,
    /// Position of the saved step's batch within its epoch.
    pub batch: usize,
    /// `step / checkpoint_every`.
    pub index: usize,
    pub loss: f32,
    pub spec: ModelSpec,
}

/// Sidecar path for a checkpoint file.
pub fn meta_path(checkpoint: &Path) -> PathBuf {
    checkpoint.with_extension("json")
}

/// Writes checkpoints every `every` steps into one directory.
#[derive(Debug, Clone)]
pub struct CheckpointWriter {
    dir: PathBuf,
    prefix: String,
    every: usize,
    spec: ModelSpec,
}

impl CheckpointWriter {
    /// Create the writer and its output directory.
    pub fn new(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        every: usize,
        spec: ModelSpec,
    ) -> Result<Self> {
        if every == 0 {
            return Err(Error::InvalidConfig("checkpoint interval must be positive".into()));
        }
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            prefix: prefix.into(),
            every,
            spec,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn every(&self) -> usize {
        self.every
    }

    /// Step 0 is saved too.
    pub fn should_save(&self, step: usize) -> bool {
        step % self.every == 0
    }

    pub fn path_for(&self, index: usize) -> PathBuf {
        self.dir.join(format!("{}-{:04}.safetensors", self.prefix, index))
    }

    /// Save all parameters and the sidecar, returning the checkpoint path.
    ///
    /// `batch` is the position of the step's batch within `epoch`.
    pub fn save(
        &self,
        varmap: &VarMap,
        step: usize,
        epoch: usize,
        batch: usize,
        loss: f32,
    ) -> Result<PathBuf> {
        let index = step / self.every;
        let path = self.path_for(index);
        varmap.save(&path)?;

        let meta = CheckpointMeta {
            step,
            epoch,
            batch,
            index,
            loss,
            spec: self.spec.clone(),
        };
        fs::write(meta_path(&path), serde_json::to_string_pretty(&meta)?)?;

        info!(step, index, path = %path.display(), "saved checkpoint");
        Ok(path)
    }
}

/// Read the sidecar of a checkpoint.
pub fn read_meta(checkpoint: &Path) -> Result<CheckpointMeta> {
    let text = fs::read_to_string(meta_path(checkpoint))?;
    Ok(serde_json::from_str(&text)?)
}

/// Load parameters into an already-built model.
///
/// Every variable of `varmap` must be present in the file with the same
/// shape, so build the network from the sidecar's [`ModelSpec`] first.
pub fn load_checkpoint(varmap: &mut VarMap, checkpoint: &Path) -> Result<CheckpointMeta> {
    let meta = read_meta(checkpoint)?;
    varmap.load(checkpoint)?;
    info!(step = meta.step, path = %checkpoint.display(), "loaded checkpoint");
    Ok(meta)
}
