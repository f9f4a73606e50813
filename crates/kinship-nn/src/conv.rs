//! Batched graph convolution over dense subgraph adjacency.
//!
//! Each node concatenates its own features with the adjacency-weighted
//! aggregate of its neighbors and feeds the result through one affine map:
//!
//! ```text
//! h_i' = relu( W [h_i ; sum_j A_ij h_j] + b )
//! ```
//!
//! With a row-normalized `A` the aggregate is the mean over in-sample
//! neighbors, so this is the GraphSAGE mean update written as a single
//! batched matmul. Inputs carry a leading batch dimension: every sample of a
//! batch is its own padded subgraph.

use candle_core::{Result, Tensor};
use candle_nn::{Init, Linear, Module, VarBuilder};

/// One graph convolution layer.
///
/// Weights use Xavier uniform variance scaling over the concatenated input,
/// biases start at zero.
pub struct GraphConv {
    linear: Linear,
    in_features: usize,
    out_features: usize,
}

impl GraphConv {
    /// Create a new layer.
    ///
    /// # Arguments
    /// - `in_features`: Node feature width (the affine map sees `2 * in_features`)
    /// - `out_features`: Output width
    /// - `vb`: Variable builder for parameter initialization
    pub fn new(in_features: usize, out_features: usize, vb: VarBuilder) -> Result<Self> {
        let fan_in = 2 * in_features;
        let bound = (6.0 / (fan_in + out_features) as f64).sqrt();
        let weight = vb.get_with_hints(
            (out_features, fan_in),
            "weight",
            Init::Uniform {
                lo: -bound,
                up: bound,
            },
        )?;
        let bias = vb.get_with_hints(out_features, "bias", Init::Const(0.0))?;
        Ok(Self {
            linear: Linear::new(weight, Some(bias)),
            in_features,
            out_features,
        })
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// - `x`: Node features (B x N x in_features)
    /// - `adj`: Adjacency matrices (B x N x N)
    ///
    /// # Returns
    /// - Node features (B x N x out_features)
    pub fn forward(&self, x: &Tensor, adj: &Tensor) -> Result<Tensor> {
        // Neighborhood aggregation: A * X
        let agg = adj.matmul(x)?;
        let h = Tensor::cat(&[x, &agg], 2)?;
        self.linear.forward(&h)?.relu()
    }
}
