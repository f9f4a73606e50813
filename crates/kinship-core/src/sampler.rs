//! Per-center local subgraph construction.
//!
//! For a center node the sampler expands its k-NN neighborhood hop by hop,
//! collects every reached node into an [`OrderedNodeSet`], and lays the
//! result out as fixed-size arrays: centered features, a row-normalized
//! adjacency matrix over the sampled nodes, and per-node "same identity as
//! the center" labels. All arrays are zero padded to
//! [`SamplerConfig::max_num_nodes`] so samples stack into uniform batches.
//!
//! ```text
//!            hop 0 (k0)        hop 1 (k1 each)
//!   center ----> a ---------> a1 a2 ...
//!          ----> b ---------> b1 b2 ...
//! ```
//!
//! Samples are rebuilt on every fetch and never cached.

use crate::dataset::KnnDataset;
use crate::error::{Error, Result};
use crate::ordered::OrderedNodeSet;
use ndarray::{Array1, Array2, Zip};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Neighborhood shape of a sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Neighbor fan-out per hop. `k_at_hop[0]` is the number of first-hop
    /// neighbors of the center (default: [200, 5]).
    pub k_at_hop: Vec<usize>,
    /// How many of each node's nearest neighbors become edges inside the
    /// sample (default: 5).
    pub active_connection: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            k_at_hop: vec![200, 5],
            active_connection: 5,
        }
    }
}

impl SamplerConfig {
    pub fn new(k_at_hop: Vec<usize>, active_connection: usize) -> Self {
        Self {
            k_at_hop,
            active_connection,
        }
    }

    pub fn with_k_at_hop(mut self, k_at_hop: Vec<usize>) -> Self {
        self.k_at_hop = k_at_hop;
        self
    }

    pub fn with_active_connection(mut self, active_connection: usize) -> Self {
        self.active_connection = active_connection;
        self
    }

    /// Number of hops expanded from the center.
    pub fn depth(&self) -> usize {
        self.k_at_hop.len()
    }

    /// First-hop fan-out.
    pub fn first_hop(&self) -> usize {
        self.k_at_hop.first().copied().unwrap_or(0)
    }

    /// Upper bound on the node count of any sample.
    ///
    /// `1 + k0 + k0*k1 + k0*k1*k2 + ...`; for two hops this is
    /// `k0 * (k1 + 1) + 1`. Saturates at `usize::MAX`; [`validate`](Self::validate)
    /// rejects configs where it would.
    pub fn max_num_nodes(&self) -> usize {
        self.checked_max_num_nodes().unwrap_or(usize::MAX)
    }

    fn checked_max_num_nodes(&self) -> Option<usize> {
        let mut total = 1usize;
        let mut layer = 1usize;
        for &k in &self.k_at_hop {
            layer = layer.checked_mul(k)?;
            total = total.checked_add(layer)?;
        }
        Some(total)
    }

    /// Columns of the k-NN graph the sampler reads: self plus `k_at_hop[0]`.
    pub fn knn_width(&self) -> usize {
        self.first_hop() + 1
    }

    pub fn validate(&self) -> Result<()> {
        if self.k_at_hop.is_empty() {
            return Err(Error::InvalidConfig("k_at_hop must not be empty".into()));
        }
        if self.k_at_hop.contains(&0) {
            return Err(Error::InvalidConfig(format!(
                "every hop needs a fan-out of at least 1, got {:?}",
                self.k_at_hop
            )));
        }
        let k0 = self.first_hop();
        if let Some(&k) = self.k_at_hop.iter().find(|&&k| k > k0) {
            return Err(Error::InvalidConfig(format!(
                "hop fan-out {} exceeds the first-hop width {}",
                k, k0
            )));
        }
        if self.active_connection == 0 || self.active_connection > k0 {
            return Err(Error::InvalidConfig(format!(
                "active_connection must be in 1..={}, got {}",
                k0, self.active_connection
            )));
        }
        if self.checked_max_num_nodes().is_none() {
            return Err(Error::InvalidConfig(format!(
                "fan-out {:?} overflows the sample size",
                self.k_at_hop
            )));
        }
        Ok(())
    }
}

/// The local subgraph around one center node.
#[derive(Debug, Clone)]
pub struct Subgraph {
    /// Global index of the center.
    pub center: usize,
    /// Sampled nodes in local order with their global -> local map.
    pub nodes: OrderedNodeSet,
    /// Local indices of the first-hop neighbors of the center.
    pub one_hop: Vec<usize>,
    /// `max_num_nodes x D`, each row minus the center's feature, zero padded.
    pub features: Array2<f32>,
    /// `max_num_nodes x max_num_nodes`, row-normalized, zero padded.
    pub adjacency: Array2<f32>,
    /// `max_num_nodes`, 1.0 where the node shares the center's label.
    pub edge_labels: Array1<f32>,
    /// Unnormalized degree of every sampled node.
    pub degrees: Vec<f32>,
}

impl Subgraph {
    /// Number of real (non-padding) nodes.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Padded size of every array in the sample.
    pub fn max_num_nodes(&self) -> usize {
        self.edge_labels.len()
    }

    /// Local index of the center.
    pub fn center_index(&self) -> usize {
        // the center is inserted before anything else
        0
    }

    /// 0/1 indicator of first-hop slots, padded to `max_num_nodes`.
    pub fn one_hop_mask(&self) -> Array1<f32> {
        let mut mask = Array1::zeros(self.max_num_nodes());
        for &i in &self.one_hop {
            mask[i] = 1.0;
        }
        mask
    }

    /// Edge labels of the first-hop slots only, in `one_hop` order.
    pub fn one_hop_edge_labels(&self) -> Vec<f32> {
        self.one_hop.iter().map(|&i| self.edge_labels[i]).collect()
    }

    /// Global node ids padded with `None` up to `max_num_nodes`.
    pub fn padded_node_ids(&self) -> Vec<Option<usize>> {
        let mut ids: Vec<Option<usize>> = self.nodes.iter().map(Some).collect();
        ids.resize(self.max_num_nodes(), None);
        ids
    }

    /// Sampled nodes with no edge inside the sample.
    pub fn isolated_nodes(&self) -> usize {
        self.degrees.iter().filter(|&&d| d == 0.0).count()
    }

    pub fn is_degenerate(&self) -> bool {
        self.isolated_nodes() > 0
    }
}

/// Builds [`Subgraph`]s from a shared dataset.
///
/// Holds no mutable state, so one sampler can serve any number of threads.
#[derive(Debug, Clone)]
pub struct SubgraphSampler<'a> {
    dataset: &'a KnnDataset,
    config: SamplerConfig,
}

impl<'a> SubgraphSampler<'a> {
    /// Create a sampler, validating the config against the dataset.
    pub fn new(dataset: &'a KnnDataset, config: SamplerConfig) -> Result<Self> {
        config.validate()?;
        if dataset.knn_width() < config.knn_width() {
            return Err(Error::ShapeMismatch {
                what: "k-NN graph columns",
                expected: config.knn_width(),
                got: dataset.knn_width(),
            });
        }
        Ok(Self { dataset, config })
    }

    pub fn dataset(&self) -> &'a KnnDataset {
        self.dataset
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.dataset.num_nodes()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.num_nodes() == 0
    }

    pub fn max_num_nodes(&self) -> usize {
        self.config.max_num_nodes()
    }

    /// Expand the hop sets of a center node.
    ///
    /// `hops[0]` holds the first-hop neighbors, `hops[d]` the nodes reached
    /// from `hops[d - 1]` with fan-out `k_at_hop[d]`.
    pub fn hops(&self, center: usize) -> Result<Vec<OrderedNodeSet>> {
        self.dataset.check_node(center)?;

        let mut hops = Vec::with_capacity(self.config.depth());
        hops.push(
            self.dataset
                .neighbors(center, self.config.first_hop())
                .collect::<OrderedNodeSet>(),
        );
        for d in 1..self.config.depth() {
            let fanout = self.config.k_at_hop[d];
            let mut next = OrderedNodeSet::new();
            for node in hops[d - 1].iter() {
                next.extend(self.dataset.neighbors(node, fanout));
            }
            hops.push(next);
        }
        Ok(hops)
    }

    /// Build the sample for one center node.
    pub fn sample(&self, center: usize) -> Result<Subgraph> {
        let hops = self.hops(center)?;
        let max_num_nodes = self.max_num_nodes();

        let mut nodes = OrderedNodeSet::with_capacity(max_num_nodes);
        nodes.insert(center);
        for hop in &hops {
            nodes.extend(hop.iter());
        }
        let num_nodes = nodes.len();
        if num_nodes > max_num_nodes {
            return Err(Error::ShapeMismatch {
                what: "subgraph node count",
                expected: max_num_nodes,
                got: num_nodes,
            });
        }

        let one_hop: Vec<usize> = hops[0]
            .iter()
            .filter_map(|n| nodes.index_of(n))
            .collect();

        let features = self.centered_features(center, &nodes);
        let (adjacency, degrees) = self.adjacency(&nodes);
        let edge_labels = self.edge_labels(center, &nodes);

        trace!(center, ?degrees, "subgraph degrees");

        Ok(Subgraph {
            center,
            nodes,
            one_hop,
            features,
            adjacency,
            edge_labels,
            degrees,
        })
    }

    fn centered_features(&self, center: usize, nodes: &OrderedNodeSet) -> Array2<f32> {
        let dim = self.dataset.feature_dim();
        let center_feat = self.dataset.feature(center);
        let mut features = Array2::zeros((self.max_num_nodes(), dim));
        for (i, node) in nodes.iter().enumerate() {
            Zip::from(features.row_mut(i))
                .and(self.dataset.feature(node))
                .and(&center_feat)
                .for_each(|out, &x, &c| *out = x - c);
        }
        features
    }

    /// Symmetric active-connection adjacency, row-normalized.
    ///
    /// Rows of degree zero stay zero.
    fn adjacency(&self, nodes: &OrderedNodeSet) -> (Array2<f32>, Vec<f32>) {
        let max_num_nodes = self.max_num_nodes();
        let mut adj = Array2::<f32>::zeros((max_num_nodes, max_num_nodes));

        for (i, node) in nodes.iter().enumerate() {
            for neighbor in self.dataset.neighbors(node, self.config.active_connection) {
                if let Some(j) = nodes.index_of(neighbor) {
                    adj[[i, j]] = 1.0;
                    adj[[j, i]] = 1.0;
                }
            }
        }

        let degrees: Vec<f32> = (0..nodes.len()).map(|i| adj.row(i).sum()).collect();
        for (i, &deg) in degrees.iter().enumerate() {
            if deg > 0.0 {
                adj.row_mut(i).mapv_inplace(|v| v / deg);
            }
        }
        (adj, degrees)
    }

    fn edge_labels(&self, center: usize, nodes: &OrderedNodeSet) -> Array1<f32> {
        let center_label = self.dataset.label(center);
        let mut labels = Array1::zeros(self.max_num_nodes());
        for (i, node) in nodes.iter().enumerate() {
            if self.dataset.label(node) == center_label {
                labels[i] = 1.0;
            }
        }
        labels
    }
}
