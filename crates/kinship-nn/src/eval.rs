//! Offline scoring of first-hop links with a trained network.

use crate::error::Result;
use crate::loss::masked_bce;
use crate::metrics::{BinaryMetrics, ConfusionCounts};
use crate::model::Gcn;
use crate::training::{batch_counts, BatchTensors};
use candle_core::Device;
use kinship_core::SampleLoader;
use serde::{Deserialize, Serialize};
use std::io::Write;
use tracing::info;

/// Score of one (center, first-hop neighbor) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EdgeScore {
    pub center: usize,
    pub neighbor: usize,
    pub score: f32,
    /// 1 when both nodes share an identity.
    pub label: u8,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Evaluation {
    pub metrics: BinaryMetrics,
    /// Mean masked BCE per batch.
    pub mean_loss: f32,
    /// Per-pair scores, empty unless collected.
    pub scores: Vec<EdgeScore>,
}

/// Run `model` in evaluation mode over every batch of `loader`.
///
/// Build the loader without shuffling to get scores in center order.
pub fn evaluate(
    model: &Gcn,
    loader: &SampleLoader<'_, '_>,
    device: &Device,
    threshold: f32,
    collect_scores: bool,
) -> Result<Evaluation> {
    let mut counts = ConfusionCounts::default();
    let mut scores = Vec::new();
    let mut loss_sum = 0.0f64;
    let mut batches = 0usize;

    for batch in loader.epoch(0) {
        let batch = batch?;
        let tensors = BatchTensors::from_batch(&batch, device)?;
        let pred = model.forward_t(&tensors.features, &tensors.adjacency, false)?;
        let loss = masked_bce(&pred, &tensors.edge_labels, &tensors.one_hop_mask)?;
        loss_sum += f64::from(loss.to_scalar::<f32>()?);
        batches += 1;

        let (preds, step_counts) = batch_counts(&pred, &batch, threshold)?;
        counts.merge(&step_counts);

        if collect_scores {
            let n = batch.num_nodes();
            for (b, &center) in batch.centers.iter().enumerate() {
                for (i, node) in batch.node_ids[b].iter().enumerate() {
                    let Some(neighbor) = *node else { continue };
                    if batch.one_hop_mask[[b, i]] <= 0.0 {
                        continue;
                    }
                    scores.push(EdgeScore {
                        center,
                        neighbor,
                        score: preds[b * n + i],
                        label: u8::from(batch.edge_labels[[b, i]] > 0.5),
                    });
                }
            }
        }
    }

    let metrics = counts.metrics();
    let mean_loss = if batches == 0 {
        0.0
    } else {
        (loss_sum / batches as f64) as f32
    };
    info!(%metrics, mean_loss, "evaluation finished");
    Ok(Evaluation {
        metrics,
        mean_loss,
        scores,
    })
}

/// Write scores as `center,neighbor,score,label` rows with a header.
pub fn write_csv<W: Write>(out: &mut W, scores: &[EdgeScore]) -> Result<()> {
    writeln!(out, "center,neighbor,score,label")?;
    for s in scores {
        writeln!(out, "{},{},{:.6},{}", s.center, s.neighbor, s.score, s.label)?;
    }
    Ok(())
}
