//! The three immutable global arrays a training run samples from.
//!
//! - features: `num_nodes x D` embeddings
//! - k-NN graph: `num_nodes x (k + 1)` neighbor indices, column 0 is the node itself
//! - labels: one identity label per node
//!
//! Everything is loaded once and only read afterwards, so a `&KnnDataset` can
//! be shared freely across sampler threads.

use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayD, ArrayView1, Ix2};
use ndarray_npy::{read_npy, ReadNpyError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Locations of the input arrays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPaths {
    pub features: PathBuf,
    pub knn_graph: PathBuf,
    pub labels: PathBuf,
}

impl DataPaths {
    pub fn new(
        features: impl Into<PathBuf>,
        knn_graph: impl Into<PathBuf>,
        labels: impl Into<PathBuf>,
    ) -> Self {
        Self {
            features: features.into(),
            knn_graph: knn_graph.into(),
            labels: labels.into(),
        }
    }
}

/// Features, k-NN graph and labels for every global node.
#[derive(Debug, Clone)]
pub struct KnnDataset {
    features: Array2<f32>,
    knn: Array2<usize>,
    labels: Array1<i64>,
}

impl KnnDataset {
    /// Build a dataset from in-memory arrays.
    ///
    /// The k-NN graph is truncated to its first `knn_width` columns (self plus
    /// `knn_width - 1` neighbors); it must have at least that many.
    pub fn from_arrays(
        features: Array2<f32>,
        knn: Array2<usize>,
        labels: Array1<i64>,
        knn_width: usize,
    ) -> Result<Self> {
        let num_nodes = features.nrows();
        if knn.nrows() != num_nodes {
            return Err(Error::ShapeMismatch {
                what: "k-NN graph rows",
                expected: num_nodes,
                got: knn.nrows(),
            });
        }
        if labels.len() != num_nodes {
            return Err(Error::ShapeMismatch {
                what: "label count",
                expected: num_nodes,
                got: labels.len(),
            });
        }
        if knn.ncols() < knn_width {
            return Err(Error::ShapeMismatch {
                what: "k-NN graph columns",
                expected: knn_width,
                got: knn.ncols(),
            });
        }
        if let Some(&node) = knn.iter().find(|&&n| n >= num_nodes) {
            return Err(Error::NodeOutOfRange { node, num_nodes });
        }

        let knn = knn.slice(ndarray::s![.., ..knn_width]).to_owned();
        Ok(Self {
            features,
            knn,
            labels,
        })
    }

    /// Load the three `.npy` files.
    ///
    /// Features may be stored as `f32` or `f64`; graph and labels as `i64` or
    /// `i32`. Labels may be a flat vector or an `N x 1` column.
    pub fn from_npy(paths: &DataPaths, knn_width: usize) -> Result<Self> {
        let features = read_features(&paths.features)?;

        let knn = read_indices(&paths.knn_graph)?;
        let ndim = knn.ndim();
        let knn = knn
            .into_dimensionality::<Ix2>()
            .map_err(|_| Error::ShapeMismatch {
                what: "k-NN graph rank",
                expected: 2,
                got: ndim,
            })?;
        let knn = to_node_indices(knn)?;

        let labels: Array1<i64> = read_indices(&paths.labels)?.iter().copied().collect();

        info!(
            nodes = features.nrows(),
            feature_dim = features.ncols(),
            knn_cols = knn.ncols(),
            knn_width,
            "loaded dataset"
        );

        Self::from_arrays(features, knn, labels, knn_width)
    }

    pub fn num_nodes(&self) -> usize {
        self.features.nrows()
    }

    pub fn feature_dim(&self) -> usize {
        self.features.ncols()
    }

    /// Number of k-NN columns kept, including the self column.
    pub fn knn_width(&self) -> usize {
        self.knn.ncols()
    }

    pub fn feature(&self, node: usize) -> ArrayView1<'_, f32> {
        self.features.row(node)
    }

    /// Full k-NN row of a node; position 0 is the node itself.
    pub fn knn_row(&self, node: usize) -> ArrayView1<'_, usize> {
        self.knn.row(node)
    }

    /// The first `k` neighbors of a node, skipping the self column.
    pub fn neighbors(&self, node: usize, k: usize) -> impl Iterator<Item = usize> + '_ {
        self.knn.row(node).into_iter().skip(1).take(k).copied()
    }

    pub fn label(&self, node: usize) -> i64 {
        self.labels[node]
    }

    pub fn features(&self) -> &Array2<f32> {
        &self.features
    }

    pub fn labels(&self) -> &Array1<i64> {
        &self.labels
    }

    pub(crate) fn check_node(&self, node: usize) -> Result<()> {
        if node < self.num_nodes() {
            Ok(())
        } else {
            Err(Error::NodeOutOfRange {
                node,
                num_nodes: self.num_nodes(),
            })
        }
    }
}

fn npy_error(path: &Path, source: ReadNpyError) -> Error {
    Error::Npy {
        path: path.display().to_string(),
        source,
    }
}

fn read_features(path: &Path) -> Result<Array2<f32>> {
    match read_npy::<_, Array2<f32>>(path) {
        Ok(features) => Ok(features),
        Err(ReadNpyError::WrongDescriptor(_)) => match read_npy::<_, Array2<f64>>(path) {
            Ok(features) => Ok(features.mapv(|v| v as f32)),
            Err(ReadNpyError::WrongDescriptor(_)) => Err(Error::UnsupportedDtype {
                path: path.display().to_string(),
                expected: "f32 or f64",
            }),
            Err(e) => Err(npy_error(path, e)),
        },
        Err(e) => Err(npy_error(path, e)),
    }
}

fn read_indices(path: &Path) -> Result<ArrayD<i64>> {
    match read_npy::<_, ArrayD<i64>>(path) {
        Ok(values) => Ok(values),
        Err(ReadNpyError::WrongDescriptor(_)) => match read_npy::<_, ArrayD<i32>>(path) {
            Ok(values) => Ok(values.mapv(i64::from)),
            Err(ReadNpyError::WrongDescriptor(_)) => Err(Error::UnsupportedDtype {
                path: path.display().to_string(),
                expected: "i64 or i32",
            }),
            Err(e) => Err(npy_error(path, e)),
        },
        Err(e) => Err(npy_error(path, e)),
    }
}

fn to_node_indices(raw: Array2<i64>) -> Result<Array2<usize>> {
    if let Some(&bad) = raw.iter().find(|&&v| v < 0) {
        return Err(Error::NegativeIndex(bad));
    }
    Ok(raw.mapv(|v| v as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};
    use ndarray_npy::write_npy;

    fn tiny() -> (Array2<f32>, Array2<usize>, Array1<i64>) {
        let features = array![[1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let knn = array![[0, 1, 2], [1, 2, 0], [2, 0, 1]];
        let labels = array![0, 0, 1];
        (features, knn, labels)
    }

    #[test]
    fn test_truncates_knn_to_width() {
        let (f, k, l) = tiny();
        let ds = KnnDataset::from_arrays(f, k, l, 2).unwrap();
        assert_eq!(ds.knn_width(), 2);
        assert_eq!(ds.knn_row(1).to_vec(), vec![1, 2]);
        assert_eq!(ds.neighbors(1, 5).collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_rejects_row_mismatch() {
        let (f, _, l) = tiny();
        let knn = array![[0, 1], [1, 0]];
        let err = KnnDataset::from_arrays(f, knn, l, 2).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { what: "k-NN graph rows", .. }));
    }

    #[test]
    fn test_rejects_narrow_knn() {
        let (f, k, l) = tiny();
        let err = KnnDataset::from_arrays(f, k, l, 4).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { expected: 4, got: 3, .. }));
    }

    #[test]
    fn test_rejects_out_of_range_neighbor() {
        let (f, _, l) = tiny();
        let knn = array![[0, 1], [1, 9], [2, 0]];
        let err = KnnDataset::from_arrays(f, knn, l, 2).unwrap_err();
        assert!(matches!(err, Error::NodeOutOfRange { node: 9, num_nodes: 3 }));
    }

    #[test]
    fn test_loads_mixed_dtypes_from_npy() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(
            dir.path().join("feats.npy"),
            dir.path().join("knn.npy"),
            dir.path().join("labels.npy"),
        );
        write_npy(&paths.features, &array![[1.0f64, 2.0], [3.0, 4.0]]).unwrap();
        write_npy(&paths.knn_graph, &array![[0i32, 1], [1, 0]]).unwrap();
        write_npy(&paths.labels, &array![[5i64], [6]]).unwrap();

        let ds = KnnDataset::from_npy(&paths, 2).unwrap();
        assert_eq!(ds.num_nodes(), 2);
        assert_eq!(ds.feature_dim(), 2);
        assert_eq!(ds.label(1), 6);
        assert_eq!(ds.labels().to_vec(), vec![5, 6]);
        assert_eq!(ds.feature(1)[0], 3.0);
        assert_eq!(ds.features().dim(), (2, 2));
    }

    #[test]
    fn test_negative_neighbor_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(
            dir.path().join("feats.npy"),
            dir.path().join("knn.npy"),
            dir.path().join("labels.npy"),
        );
        write_npy(&paths.features, &array![[1.0f32], [2.0]]).unwrap();
        write_npy(&paths.knn_graph, &array![[0i64, -1], [1, 0]]).unwrap();
        write_npy(&paths.labels, &array![0i64, 1]).unwrap();

        let err = KnnDataset::from_npy(&paths, 2).unwrap_err();
        assert!(matches!(err, Error::NegativeIndex(-1)));
    }

    #[test]
    fn test_missing_file_is_a_load_error() {
        let paths = DataPaths::new(
            "/nonexistent/f.npy",
            "/nonexistent/k.npy",
            "/nonexistent/l.npy",
        );
        assert!(matches!(
            KnnDataset::from_npy(&paths, 2),
            Err(Error::Npy { .. })
        ));
    }
}
