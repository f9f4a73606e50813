use thiserror::Error;

/// Errors raised while loading arrays or building subgraph samples.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A `.npy` file could not be read.
    #[error("failed to read {path}: {source}")]
    Npy {
        path: String,
        #[source]
        source: ndarray_npy::ReadNpyError,
    },

    /// The array was readable but holds an element type we cannot use.
    #[error("unsupported dtype in {path}: expected {expected}")]
    UnsupportedDtype { path: String, expected: &'static str },

    /// Array or tensor dimensions disagree with each other or with the config.
    #[error("shape mismatch in {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    /// The k-NN graph holds a negative neighbor index.
    #[error("negative node index {0} in k-NN graph")]
    NegativeIndex(i64),

    /// A node index points outside the dataset.
    #[error("node {node} out of range (dataset has {num_nodes} nodes)")]
    NodeOutOfRange { node: usize, num_nodes: usize },

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
