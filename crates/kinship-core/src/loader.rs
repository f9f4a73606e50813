//! Mini-batch loading over subgraph samples.
//!
//! [`SampleLoader`] walks the node indices of a dataset in (optionally
//! shuffled) order, builds the samples of each batch in parallel, and stacks
//! them into a [`SampleBatch`]. The last batch of an epoch may be short.

use crate::error::{Error, Result};
use crate::sampler::{Subgraph, SubgraphSampler};
use ndarray::{s, Array2, Array3};
use rand::prelude::*;
use rand_xorshift::XorShiftRng;
use rayon::prelude::*;

/// A stack of samples with uniform padded shapes.
#[derive(Debug, Clone)]
pub struct SampleBatch {
    /// `B x N x D`
    pub features: Array3<f32>,
    /// `B x N x N`
    pub adjacency: Array3<f32>,
    /// `B x N`
    pub edge_labels: Array2<f32>,
    /// `B x N`, 1.0 on first-hop slots.
    pub one_hop_mask: Array2<f32>,
    /// Global center index of every sample.
    pub centers: Vec<usize>,
    /// Global node id of every slot, `None` for padding.
    pub node_ids: Vec<Vec<Option<usize>>>,
    /// Isolated sampled nodes summed over the batch.
    pub isolated_nodes: usize,
}

impl SampleBatch {
    /// Stack samples that all share the same padded size and feature width.
    pub fn stack(samples: &[Subgraph]) -> Result<Self> {
        let first = samples
            .first()
            .ok_or_else(|| Error::InvalidConfig("cannot stack an empty batch".into()))?;
        let (n, d) = first.features.dim();
        let b = samples.len();

        let mut features = Array3::zeros((b, n, d));
        let mut adjacency = Array3::zeros((b, n, n));
        let mut edge_labels = Array2::zeros((b, n));
        let mut one_hop_mask = Array2::zeros((b, n));
        let mut centers = Vec::with_capacity(b);
        let mut node_ids = Vec::with_capacity(b);
        let mut isolated_nodes = 0;

        for (i, sample) in samples.iter().enumerate() {
            check_shape("sample feature rows", n, sample.features.nrows())?;
            check_shape("sample feature dim", d, sample.features.ncols())?;
            check_shape("sample adjacency rows", n, sample.adjacency.nrows())?;
            check_shape("sample adjacency cols", n, sample.adjacency.ncols())?;
            check_shape("sample edge labels", n, sample.edge_labels.len())?;

            features.slice_mut(s![i, .., ..]).assign(&sample.features);
            adjacency.slice_mut(s![i, .., ..]).assign(&sample.adjacency);
            edge_labels.row_mut(i).assign(&sample.edge_labels);
            one_hop_mask.row_mut(i).assign(&sample.one_hop_mask());
            centers.push(sample.center);
            node_ids.push(sample.padded_node_ids());
            isolated_nodes += sample.isolated_nodes();
        }

        Ok(Self {
            features,
            adjacency,
            edge_labels,
            one_hop_mask,
            centers,
            node_ids,
            isolated_nodes,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.centers.len()
    }

    /// Padded node count per sample.
    pub fn num_nodes(&self) -> usize {
        self.edge_labels.ncols()
    }

    pub fn feature_dim(&self) -> usize {
        self.features.dim().2
    }
}

fn check_shape(what: &'static str, expected: usize, got: usize) -> Result<()> {
    if expected == got {
        Ok(())
    } else {
        Err(Error::ShapeMismatch {
            what,
            expected,
            got,
        })
    }
}

/// Batches samples from a [`SubgraphSampler`].
pub struct SampleLoader<'s, 'a> {
    sampler: &'s SubgraphSampler<'a>,
    batch_size: usize,
    shuffle: bool,
    seed: u64,
}

impl<'s, 'a> SampleLoader<'s, 'a> {
    pub fn new(sampler: &'s SubgraphSampler<'a>, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be at least 1".into()));
        }
        Ok(Self {
            sampler,
            batch_size,
            shuffle: false,
            seed: 42,
        })
    }

    /// Reshuffle the node order every epoch, seeded by `seed + epoch`.
    pub fn with_shuffle(mut self, shuffle: bool, seed: u64) -> Self {
        self.shuffle = shuffle;
        self.seed = seed;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Batches per epoch, counting a trailing short batch.
    pub fn num_batches(&self) -> usize {
        self.sampler.len().div_ceil(self.batch_size)
    }

    /// Center order for one epoch.
    pub fn order(&self, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.sampler.len()).collect();
        if self.shuffle {
            let mut rng = XorShiftRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }
        order
    }

    /// Build one batch from explicit center indices.
    pub fn batch(&self, centers: &[usize]) -> Result<SampleBatch> {
        let samples = centers
            .par_iter()
            .map(|&center| self.sampler.sample(center))
            .collect::<Result<Vec<_>>>()?;
        SampleBatch::stack(&samples)
    }

    /// Iterate the batches of one epoch; each batch is built on demand.
    pub fn epoch(&self, epoch: usize) -> impl Iterator<Item = Result<SampleBatch>> + '_ {
        self.epoch_from(epoch, 0)
    }

    /// Like [`epoch`](Self::epoch), starting at batch `first`. Skipped
    /// batches are never sampled.
    pub fn epoch_from(
        &self,
        epoch: usize,
        first: usize,
    ) -> impl Iterator<Item = Result<SampleBatch>> + '_ {
        let order = self.order(epoch);
        let chunks: Vec<Vec<usize>> = order
            .chunks(self.batch_size)
            .skip(first)
            .map(<[usize]>::to_vec)
            .collect();
        chunks.into_iter().map(move |centers| self.batch(&centers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::KnnDataset;
    use crate::sampler::SamplerConfig;

    fn ring(n: usize) -> KnnDataset {
        let features = Array2::from_shape_fn((n, 3), |(i, j)| (i * 3 + j) as f32);
        let knn = Array2::from_shape_fn((n, 3), |(i, j)| match j {
            0 => i,
            1 => (i + 1) % n,
            _ => (i + n - 1) % n,
        });
        let labels = (0..n).map(|i| (i / 3) as i64).collect();
        KnnDataset::from_arrays(features, knn, labels, 3).unwrap()
    }

    #[test]
    fn test_epoch_covers_every_node_once() {
        let ds = ring(7);
        let sampler = SubgraphSampler::new(&ds, SamplerConfig::new(vec![2, 1], 1)).unwrap();
        let loader = SampleLoader::new(&sampler, 3).unwrap().with_shuffle(true, 7);

        assert_eq!(loader.num_batches(), 3);
        let batches: Vec<_> = loader.epoch(0).collect::<Result<_>>().unwrap();
        let sizes: Vec<_> = batches.iter().map(SampleBatch::batch_size).collect();
        assert_eq!(sizes, vec![3, 3, 1]);

        let mut centers: Vec<_> = batches.iter().flat_map(|b| b.centers.clone()).collect();
        centers.sort_unstable();
        assert_eq!(centers, (0..7).collect::<Vec<_>>());
    }

    #[test]
    fn test_epoch_from_skips_leading_batches() {
        let ds = ring(7);
        let sampler = SubgraphSampler::new(&ds, SamplerConfig::new(vec![2, 1], 1)).unwrap();
        let loader = SampleLoader::new(&sampler, 3).unwrap().with_shuffle(true, 7);

        let full: Vec<_> = loader.epoch(2).collect::<Result<_>>().unwrap();
        let tail: Vec<_> = loader.epoch_from(2, 1).collect::<Result<_>>().unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].centers, full[1].centers);
        assert_eq!(tail[1].centers, full[2].centers);
        assert_eq!(loader.epoch_from(2, 3).count(), 0);
    }

    #[test]
    fn test_shuffle_is_seeded() {
        let ds = ring(20);
        let sampler = SubgraphSampler::new(&ds, SamplerConfig::new(vec![2, 1], 1)).unwrap();
        let a = SampleLoader::new(&sampler, 4).unwrap().with_shuffle(true, 1);
        let b = SampleLoader::new(&sampler, 4).unwrap().with_shuffle(true, 1);
        assert_eq!(a.order(3), b.order(3));
        assert_ne!(a.order(0), a.order(1));

        let plain = SampleLoader::new(&sampler, 4).unwrap();
        assert_eq!(plain.order(5), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_batch_shapes_are_uniform() {
        let ds = ring(6);
        let sampler = SubgraphSampler::new(&ds, SamplerConfig::new(vec![2, 1], 1)).unwrap();
        let loader = SampleLoader::new(&sampler, 4).unwrap();
        let batch = loader.batch(&[0, 5]).unwrap();

        let n = sampler.max_num_nodes();
        assert_eq!(batch.features.dim(), (2, n, 3));
        assert_eq!(batch.adjacency.dim(), (2, n, n));
        assert_eq!(batch.edge_labels.dim(), (2, n));
        assert_eq!(batch.one_hop_mask.row(0).sum(), 2.0);
        assert_eq!(batch.centers, vec![0, 5]);
        assert_eq!(batch.node_ids[0][0], Some(0));
    }

    #[test]
    fn test_stack_rejects_mismatched_samples() {
        let ds = ring(6);
        let small = SubgraphSampler::new(&ds, SamplerConfig::new(vec![1], 1)).unwrap();
        let large = SubgraphSampler::new(&ds, SamplerConfig::new(vec![2, 1], 1)).unwrap();
        let samples = vec![small.sample(0).unwrap(), large.sample(1).unwrap()];
        let err = SampleBatch::stack(&samples).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let ds = ring(3);
        let sampler = SubgraphSampler::new(&ds, SamplerConfig::new(vec![1], 1)).unwrap();
        assert!(SampleLoader::new(&sampler, 0).is_err());
    }

    #[test]
    fn test_empty_stack_is_rejected() {
        assert!(SampleBatch::stack(&[]).is_err());
    }
}
