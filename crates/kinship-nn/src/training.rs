//! Training loop for the linkage GCN.
//!
//! One optimization step per batch:
//! 1. Forward the batch in train mode
//! 2. Masked BCE over first-hop slots
//! 3. Backward and Adam update
//! 4. Precision / recall / accuracy on the same slots
//!
//! Scalars go to an optional [`SummaryWriter`] and parameters are saved every
//! `checkpoint_every` global steps (step 0 included) by an optional
//! [`CheckpointWriter`].
//!
//! # Example
//!
//! ```rust,ignore
//! use kinship_nn::{Gcn, GcnTrainer, RunOutputs, TrainingConfig};
//!
//! let config = TrainingConfig::default().with_epochs(10).with_batch_size(32);
//! let loader = config.loader(&sampler)?;
//! let mut trainer = GcnTrainer::new(&gcn, &varmap, config, Device::Cpu)?;
//! let report = trainer.fit(&loader, &mut RunOutputs::default(), |_| {})?;
//! ```

use crate::checkpoint::{CheckpointMeta, CheckpointWriter};
use crate::error::{Error, Result};
use crate::loss::masked_bce;
use crate::metrics::{BinaryMetrics, ConfusionCounts};
use crate::model::Gcn;
use crate::summary::SummaryWriter;
use candle_core::{Device, Tensor};
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use kinship_core::{SampleBatch, SampleLoader, SubgraphSampler};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Training configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Number of passes over the dataset (default: 100).
    pub epochs: usize,
    /// Centers per batch (default: 64).
    pub batch_size: usize,
    /// Adam learning rate (default: 0.001).
    pub learning_rate: f64,
    /// Global steps between checkpoints (default: 2000).
    pub checkpoint_every: usize,
    /// Shuffle seed (default: 42).
    pub seed: u64,
    /// Shuffle centers every epoch (default: true).
    pub shuffle: bool,
    /// Steps between progress log lines (default: 20).
    pub log_every: usize,
    /// Probability above which a link counts as predicted (default: 0.5).
    pub threshold: f32,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 64,
            learning_rate: 0.001,
            checkpoint_every: 2000,
            seed: 42,
            shuffle: true,
            log_every: 20,
            threshold: 0.5,
        }
    }
}

impl TrainingConfig {
    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    pub fn with_checkpoint_every(mut self, every: usize) -> Self {
        self.checkpoint_every = every;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_log_every(mut self, every: usize) -> Self {
        self.log_every = every;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be positive".into()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(Error::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.checkpoint_every == 0 {
            return Err(Error::InvalidConfig("checkpoint_every must be positive".into()));
        }
        if self.log_every == 0 {
            return Err(Error::InvalidConfig("log_every must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.threshold) {
            return Err(Error::InvalidConfig(format!(
                "threshold must lie in [0, 1), got {}",
                self.threshold
            )));
        }
        Ok(())
    }

    /// Loader over all centers of `sampler` using this batch size and shuffle policy.
    pub fn loader<'s, 'a>(&self, sampler: &'s SubgraphSampler<'a>) -> Result<SampleLoader<'s, 'a>> {
        Ok(SampleLoader::new(sampler, self.batch_size)?.with_shuffle(self.shuffle, self.seed))
    }
}

/// A host batch moved onto a device.
pub struct BatchTensors {
    /// B x N x D
    pub features: Tensor,
    /// B x N x N
    pub adjacency: Tensor,
    /// B x N
    pub edge_labels: Tensor,
    /// B x N
    pub one_hop_mask: Tensor,
}

impl BatchTensors {
    pub fn from_batch(batch: &SampleBatch, device: &Device) -> Result<Self> {
        let to_tensor3 = |a: &ndarray::Array3<f32>| {
            Tensor::from_vec(a.iter().copied().collect::<Vec<_>>(), a.dim(), device)
        };
        let to_tensor2 = |a: &ndarray::Array2<f32>| {
            Tensor::from_vec(a.iter().copied().collect::<Vec<_>>(), a.dim(), device)
        };
        Ok(Self {
            features: to_tensor3(&batch.features)?,
            adjacency: to_tensor3(&batch.adjacency)?,
            edge_labels: to_tensor2(&batch.edge_labels)?,
            one_hop_mask: to_tensor2(&batch.one_hop_mask)?,
        })
    }
}

/// Host-side first-hop counts for one batch of predictions.
pub(crate) fn batch_counts(
    pred: &Tensor,
    batch: &SampleBatch,
    threshold: f32,
) -> Result<(Vec<f32>, ConfusionCounts)> {
    let preds = pred.flatten_all()?.to_vec1::<f32>()?;
    let labels: Vec<f32> = batch.edge_labels.iter().copied().collect();
    let mask: Vec<f32> = batch.one_hop_mask.iter().copied().collect();
    let counts = ConfusionCounts::from_masked(&preds, &labels, &mask, threshold);
    Ok((preds, counts))
}

/// Result of one optimization step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StepRecord {
    pub step: usize,
    pub epoch: usize,
    /// Position of the batch within `epoch`.
    pub batch: usize,
    pub loss: f32,
    pub metrics: BinaryMetrics,
}

/// Where a run writes its artifacts. Both sinks are optional.
#[derive(Default)]
pub struct RunOutputs {
    pub summary: Option<SummaryWriter>,
    pub checkpoints: Option<CheckpointWriter>,
}

/// Summary of a finished run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainingReport {
    /// Optimization steps run in this call.
    pub steps: usize,
    /// Mean batch loss of every epoch run.
    pub epoch_losses: Vec<f32>,
    pub last_metrics: Option<BinaryMetrics>,
    /// Checkpoints written, in order.
    pub checkpoints: Vec<PathBuf>,
}

/// Adam trainer over a [`Gcn`] whose parameters live in a [`VarMap`].
pub struct GcnTrainer<'m> {
    model: &'m Gcn,
    varmap: &'m VarMap,
    optimizer: AdamW,
    config: TrainingConfig,
    device: Device,
    step: usize,
    start_epoch: usize,
    start_batch: usize,
}

impl<'m> GcnTrainer<'m> {
    pub fn new(
        model: &'m Gcn,
        varmap: &'m VarMap,
        config: TrainingConfig,
        device: Device,
    ) -> Result<Self> {
        config.validate()?;
        // zero weight decay makes AdamW plain Adam
        let params = ParamsAdamW {
            lr: config.learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
        };
        let optimizer = AdamW::new(varmap.all_vars(), params)?;
        Ok(Self {
            model,
            varmap,
            optimizer,
            config,
            device,
            step: 0,
            start_epoch: 0,
            start_batch: 0,
        })
    }

    /// Continue from a checkpoint whose parameters are already loaded.
    ///
    /// Training picks up at the batch after the saved one, with the global
    /// step following the saved step. Adam moments start fresh.
    pub fn resume(mut self, meta: &CheckpointMeta) -> Self {
        self.step = meta.step + 1;
        self.start_epoch = meta.epoch;
        self.start_batch = meta.batch + 1;
        info!(
            step = self.step,
            epoch = self.start_epoch,
            batch = self.start_batch,
            "resuming training"
        );
        self
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Next global step.
    pub fn global_step(&self) -> usize {
        self.step
    }

    /// First `(epoch, batch)` to train when an epoch has `num_batches` batches.
    pub fn start_position(&self, num_batches: usize) -> (usize, usize) {
        if self.start_batch >= num_batches {
            (self.start_epoch + 1, 0)
        } else {
            (self.start_epoch, self.start_batch)
        }
    }

    /// Steps `fit` will run over a loader with `num_batches` batches per epoch.
    pub fn remaining_steps(&self, num_batches: usize) -> usize {
        let (epoch, batch) = self.start_position(num_batches);
        match self.config.epochs.saturating_sub(epoch) {
            0 => 0,
            epochs_left => epochs_left * num_batches - batch,
        }
    }

    /// One forward/backward/update on `batch`. Does not advance the step counter.
    pub fn step(&mut self, batch: &SampleBatch) -> Result<(f32, ConfusionCounts)> {
        if batch.feature_dim() != self.model.input_dim() {
            return Err(Error::DimensionMismatch {
                what: "batch features",
                expected: self.model.input_dim(),
                got: batch.feature_dim(),
            });
        }
        let tensors = BatchTensors::from_batch(batch, &self.device)?;
        let pred = self
            .model
            .forward_t(&tensors.features, &tensors.adjacency, true)?;
        let loss = masked_bce(&pred, &tensors.edge_labels, &tensors.one_hop_mask)?;
        let value = loss.to_scalar::<f32>()?;
        if !value.is_finite() {
            return Err(Error::Training(format!(
                "non-finite loss {value} at step {}",
                self.step
            )));
        }
        self.optimizer.backward_step(&loss)?;

        let (_, counts) = batch_counts(&pred, batch, self.config.threshold)?;
        Ok((value, counts))
    }

    /// Run the remaining epochs over `loader`.
    ///
    /// `on_step` sees every step record, e.g. to drive a progress bar.
    pub fn fit<F>(
        &mut self,
        loader: &SampleLoader<'_, '_>,
        outputs: &mut RunOutputs,
        mut on_step: F,
    ) -> Result<TrainingReport>
    where
        F: FnMut(&StepRecord),
    {
        let mut report = TrainingReport::default();
        let (start_epoch, start_batch) = self.start_position(loader.num_batches());
        info!(
            epochs = self.config.epochs,
            start_epoch,
            start_batch,
            batches = loader.num_batches(),
            batch_size = loader.batch_size(),
            "starting training"
        );

        for epoch in start_epoch..self.config.epochs {
            let mut loss_sum = 0.0f64;
            let mut batches = 0usize;
            let mut isolated = 0usize;

            let first = if epoch == start_epoch { start_batch } else { 0 };
            for (index, batch) in (first..).zip(loader.epoch_from(epoch, first)) {
                let batch = batch?;
                isolated += batch.isolated_nodes;

                let (loss, counts) = self.step(&batch)?;
                let record = StepRecord {
                    step: self.step,
                    epoch,
                    batch: index,
                    loss,
                    metrics: counts.metrics(),
                };

                if let Some(summary) = outputs.summary.as_mut() {
                    summary.add_scalar("Eva", "Acc", record.metrics.accuracy, record.step)?;
                    summary.add_scalar("Eva", "P", record.metrics.precision, record.step)?;
                    summary.add_scalar("Eva", "R", record.metrics.recall, record.step)?;
                    summary.add_scalar("Loss", "loss", f64::from(loss), record.step)?;
                }
                if let Some(writer) = outputs.checkpoints.as_ref() {
                    if writer.should_save(record.step) {
                        let path =
                            writer.save(self.varmap, record.step, epoch, record.batch, loss)?;
                        report.checkpoints.push(path);
                    }
                }

                if record.step % self.config.log_every == 0 {
                    info!(
                        epoch,
                        step = record.step,
                        loss,
                        acc = record.metrics.accuracy,
                        p = record.metrics.precision,
                        r = record.metrics.recall,
                        "train"
                    );
                } else {
                    debug!(epoch, step = record.step, loss, "train");
                }

                on_step(&record);
                loss_sum += f64::from(loss);
                batches += 1;
                report.steps += 1;
                report.last_metrics = Some(record.metrics);
                self.step += 1;
            }

            if isolated > 0 {
                warn!(epoch, isolated_nodes = isolated, "samples contained isolated nodes");
            }
            let mean = if batches == 0 {
                0.0
            } else {
                (loss_sum / batches as f64) as f32
            };
            info!(epoch, mean_loss = mean, "epoch finished");
            report.epoch_losses.push(mean);

            if let Some(summary) = outputs.summary.as_mut() {
                summary.flush()?;
            }
        }

        Ok(report)
    }
}
