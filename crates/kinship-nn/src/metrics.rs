//! Link classification metrics over first-hop slots.

use serde::{Deserialize, Serialize};

/// Confusion counts accumulated over masked slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub tp: usize,
    pub fp: usize,
    pub tn: usize,
    pub fn_: usize,
}

impl ConfusionCounts {
    /// Count predictions against labels, skipping slots whose mask is zero.
    ///
    /// A slot is predicted positive when its probability exceeds `threshold`.
    pub fn from_masked(preds: &[f32], labels: &[f32], mask: &[f32], threshold: f32) -> Self {
        let mut counts = Self::default();
        counts.update(preds, labels, mask, threshold);
        counts
    }

    pub fn update(&mut self, preds: &[f32], labels: &[f32], mask: &[f32], threshold: f32) {
        for ((&p, &y), &m) in preds.iter().zip(labels).zip(mask) {
            if m <= 0.0 {
                continue;
            }
            match (p > threshold, y > 0.5) {
                (true, true) => self.tp += 1,
                (true, false) => self.fp += 1,
                (false, false) => self.tn += 1,
                (false, true) => self.fn_ += 1,
            }
        }
    }

    pub fn merge(&mut self, other: &Self) {
        self.tp += other.tp;
        self.fp += other.fp;
        self.tn += other.tn;
        self.fn_ += other.fn_;
    }

    pub fn total(&self) -> usize {
        self.tp + self.fp + self.tn + self.fn_
    }

    pub fn metrics(&self) -> BinaryMetrics {
        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        BinaryMetrics {
            precision: ratio(self.tp, self.tp + self.fp),
            recall: ratio(self.tp, self.tp + self.fn_),
            accuracy: ratio(self.tp + self.tn, self.total()),
            support: self.total(),
        }
    }
}

/// Precision, recall and accuracy of thresholded link predictions.
///
/// Ratios with an empty denominator are reported as 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BinaryMetrics {
    pub precision: f64,
    pub recall: f64,
    pub accuracy: f64,
    /// Number of masked-in slots the ratios were computed over.
    pub support: usize,
}

impl std::fmt::Display for BinaryMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "acc={:.4} p={:.4} r={:.4} (n={})",
            self.accuracy, self.precision, self.recall, self.support
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_counts_respect_mask() {
        let preds = [0.9, 0.8, 0.1, 0.2, 0.99];
        let labels = [1.0, 0.0, 0.0, 1.0, 1.0];
        let mask = [1.0, 1.0, 1.0, 1.0, 0.0];
        let counts = ConfusionCounts::from_masked(&preds, &labels, &mask, 0.5);
        assert_eq!(
            counts,
            ConfusionCounts {
                tp: 1,
                fp: 1,
                tn: 1,
                fn_: 1
            }
        );

        let m = counts.metrics();
        assert_relative_eq!(m.precision, 0.5);
        assert_relative_eq!(m.recall, 0.5);
        assert_relative_eq!(m.accuracy, 0.5);
        assert_eq!(m.support, 4);
    }

    #[test]
    fn test_empty_denominators_are_zero() {
        let counts = ConfusionCounts::from_masked(&[0.1, 0.2], &[0.0, 0.0], &[1.0, 1.0], 0.5);
        let m = counts.metrics();
        assert_eq!(m.precision, 0.0);
        assert_eq!(m.recall, 0.0);
        assert_relative_eq!(m.accuracy, 1.0);

        let empty = ConfusionCounts::default().metrics();
        assert_eq!(empty, BinaryMetrics::default());
    }

    #[test]
    fn test_threshold_is_strict() {
        let counts = ConfusionCounts::from_masked(&[0.5], &[1.0], &[1.0], 0.5);
        assert_eq!(counts.fn_, 1);
    }

    #[test]
    fn test_merge_adds_counts() {
        let mut a = ConfusionCounts::from_masked(&[0.9], &[1.0], &[1.0], 0.5);
        let b = ConfusionCounts::from_masked(&[0.9, 0.1], &[0.0, 1.0], &[1.0, 1.0], 0.5);
        a.merge(&b);
        assert_eq!((a.tp, a.fp, a.tn, a.fn_), (1, 1, 0, 1));
        assert_eq!(a.total(), 3);
    }
}
