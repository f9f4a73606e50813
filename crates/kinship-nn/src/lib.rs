#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]

//! Candle model and training loop for identity-linkage GCNs.
//!
//! The network scores, for every node of a sampled subgraph, the probability
//! that it shares the identity of the subgraph's center. Training only looks
//! at first-hop slots.
//!
//! # Modules
//!
//! - [`conv`]: [`GraphConv`], self features concatenated with the aggregate
//! - [`model`]: [`Gcn`], batch norm, four graph convolutions and a dense head
//! - [`loss`]: masked binary cross-entropy
//! - [`metrics`]: precision / recall / accuracy
//! - [`training`]: Adam loop with scalar summaries and checkpoints
//! - [`eval`]: offline first-hop scoring
//!
//! # Example
//!
//! ```rust,ignore
//! use candle_core::{DType, Device};
//! use candle_nn::{VarBuilder, VarMap};
//! use kinship_nn::{Gcn, GcnTrainer, RunOutputs, TrainingConfig};
//!
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
//! let gcn = Gcn::new(dataset.feature_dim(), vb)?;
//!
//! let config = TrainingConfig::default().with_epochs(1);
//! let loader = config.loader(&sampler)?;
//! let mut trainer = GcnTrainer::new(&gcn, &varmap, config, Device::Cpu)?;
//! let report = trainer.fit(&loader, &mut RunOutputs::default(), |_| {})?;
//! ```

pub mod checkpoint;
pub mod conv;
mod error;
pub mod eval;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod summary;
pub mod training;

pub use checkpoint::{load_checkpoint, read_meta, CheckpointMeta, CheckpointWriter, ModelSpec};
pub use conv::GraphConv;
pub use error::{Error, Result};
pub use eval::{evaluate, write_csv, EdgeScore, Evaluation};
pub use loss::masked_bce;
pub use metrics::{BinaryMetrics, ConfusionCounts};
pub use model::Gcn;
pub use summary::{ScalarEvent, SummaryWriter};
pub use training::{GcnTrainer, RunOutputs, StepRecord, TrainingConfig, TrainingReport};
