#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::module_name_repetitions)]

//! Data side of identity-linkage GCN training.
//!
//! Given precomputed face (or any) embeddings, their k-nearest-neighbor graph
//! and identity labels, this crate builds the per-node local subgraphs a
//! graph convolution network is trained on:
//!
//! - [`KnnDataset`] - the immutable feature matrix, k-NN graph and labels
//! - [`OrderedNodeSet`] - insertion-ordered node set with its index map
//! - [`SubgraphSampler`] - builds one padded [`Subgraph`] per center node
//! - [`SampleLoader`] - shuffled, parallel mini-batching into [`SampleBatch`]
//!
//! # Example
//!
//! ```rust
//! use kinship_core::{KnnDataset, SamplerConfig, SubgraphSampler};
//! use ndarray::array;
//!
//! let features = array![[0.0f32, 0.0], [1.0, 0.0], [2.0, 0.0], [3.0, 0.0]];
//! let knn = array![[0usize, 1], [1, 0], [2, 1], [3, 2]];
//! let labels = array![0i64, 0, 1, 1];
//! let dataset = KnnDataset::from_arrays(features, knn, labels, 2).unwrap();
//!
//! let sampler = SubgraphSampler::new(&dataset, SamplerConfig::new(vec![1], 1)).unwrap();
//! let sample = sampler.sample(2).unwrap();
//!
//! assert_eq!(sample.nodes.as_slice(), &[2, 1]);
//! assert_eq!(sample.edge_labels.to_vec(), vec![1.0, 0.0]);
//! ```

pub mod dataset;
mod error;
pub mod loader;
pub mod ordered;
pub mod sampler;

pub use dataset::{DataPaths, KnnDataset};
pub use error::{Error, Result};
pub use loader::{SampleBatch, SampleLoader};
pub use ordered::OrderedNodeSet;
pub use sampler::{SamplerConfig, Subgraph, SubgraphSampler};
