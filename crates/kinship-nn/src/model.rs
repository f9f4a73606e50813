//! The linkage GCN.
//!
//! ```text
//! x (B x N x D)
//!   -> batch norm over D
//!   -> GraphConv D->512 -> GraphConv 512->512 -> GraphConv 512->256 -> GraphConv 256->256
//!   -> flatten (B*N x 256)
//!   -> Dense 256->256 -> PReLU -> Dense 256->1 -> sigmoid
//!   -> (B x N x 1)
//! ```
//!
//! The output is the probability that each slot shares its subgraph center's
//! identity. Only the input width follows the data; the hidden widths are
//! fixed.

use crate::conv::GraphConv;
use candle_core::{Result, Tensor};
use candle_nn::{
    batch_norm, ops, prelu, BatchNorm, BatchNormConfig, Init, Linear, Module, ModuleT, PReLU,
    VarBuilder,
};

/// Output widths of the four graph convolutions.
pub const CONV_WIDTHS: [usize; 4] = [512, 512, 256, 256];

/// Width of the dense layer in the classification head.
pub const HEAD_WIDTH: usize = 256;

/// Width of the 512-d face embeddings the layer widths were sized for.
pub const DEFAULT_INPUT_DIM: usize = 512;

fn dense_layer(in_features: usize, out_features: usize, vb: VarBuilder) -> Result<Linear> {
    let weight = vb.get_with_hints(
        (out_features, in_features),
        "weight",
        Init::Randn {
            mean: 0.0,
            stdev: 0.01,
        },
    )?;
    let bias = vb.get_with_hints(out_features, "bias", Init::Const(0.0))?;
    Ok(Linear::new(weight, Some(bias)))
}

/// Graph convolution network scoring center-to-node identity links.
pub struct Gcn {
    bn: BatchNorm,
    convs: Vec<GraphConv>,
    dense: Linear,
    prelu: PReLU,
    head: Linear,
    input_dim: usize,
}

impl Gcn {
    /// Build the network, registering its parameters under `vb`.
    pub fn new(input_dim: usize, vb: VarBuilder) -> Result<Self> {
        let bn_config = BatchNormConfig {
            eps: 1e-5,
            remove_mean: true,
            affine: true,
            momentum: 0.1,
        };
        let bn = batch_norm(input_dim, bn_config, vb.pp("bn"))?;

        let mut convs = Vec::with_capacity(CONV_WIDTHS.len());
        let mut width = input_dim;
        for (i, &out) in CONV_WIDTHS.iter().enumerate() {
            convs.push(GraphConv::new(width, out, vb.pp(format!("conv{}", i + 1)))?);
            width = out;
        }

        let dense = dense_layer(width, HEAD_WIDTH, vb.pp("dense"))?;
        let prelu = prelu(None, vb.pp("prelu"))?;
        let head = dense_layer(HEAD_WIDTH, 1, vb.pp("head"))?;

        Ok(Self {
            bn,
            convs,
            dense,
            prelu,
            head,
            input_dim,
        })
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    /// Width of the node embeddings fed to the classifier head.
    pub fn embedding_dim(&self) -> usize {
        self.convs
            .last()
            .map_or(self.input_dim, GraphConv::out_features)
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// - `x`: Node features (B x N x D)
    /// - `adj`: Normalized adjacency (B x N x N)
    /// - `train`: Use batch statistics and update the running ones
    ///
    /// # Returns
    /// - Link probabilities in [0, 1] (B x N x 1)
    pub fn forward_t(&self, x: &Tensor, adj: &Tensor, train: bool) -> Result<Tensor> {
        let (b, n, _) = x.dims3()?;

        // batch norm normalizes dim 1, so move features there and back
        let h = x.transpose(1, 2)?.contiguous()?;
        let h = self.bn.forward_t(&h, train)?;
        let mut h = h.transpose(1, 2)?.contiguous()?;

        for conv in &self.convs {
            h = conv.forward(&h, adj)?;
        }

        let h = h.reshape((b * n, self.embedding_dim()))?;
        let h = self.dense.forward(&h)?;
        let h = self.prelu.forward(&h)?;
        let h = self.head.forward(&h)?;
        ops::sigmoid(&h)?.reshape((b, n, 1))
    }
}
