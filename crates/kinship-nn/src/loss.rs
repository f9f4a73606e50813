//! Binary cross-entropy restricted to first-hop slots.

use candle_core::{Result, Tensor};

/// Added inside the logarithms so saturated probabilities stay finite.
pub const BCE_EPS: f64 = 1e-12;

/// Element-wise binary cross-entropy on probabilities.
///
/// `-(y * ln(p + eps) + (1 - y) * ln(1 - p + eps))`
pub fn binary_cross_entropy(pred: &Tensor, target: &Tensor) -> Result<Tensor> {
    let log_p = (pred + BCE_EPS)?.log()?;
    let log_not_p = (pred.affine(-1.0, 1.0)? + BCE_EPS)?.log()?;
    let pos = (target * log_p)?;
    let neg = (target.affine(-1.0, 1.0)? * log_not_p)?;
    (pos + neg)?.neg()
}

/// Masked BCE over a batch, scaled by `1 / batch_size`.
///
/// # Arguments
/// - `pred`: Link probabilities (B x N x 1)
/// - `target`: 0/1 edge labels (B x N)
/// - `mask`: 0/1 first-hop mask (B x N)
///
/// Slots where the mask is zero contribute nothing to the value or the
/// gradient. An all-zero mask yields exactly zero.
pub fn masked_bce(pred: &Tensor, target: &Tensor, mask: &Tensor) -> Result<Tensor> {
    let (batch_size, _) = target.dims2()?;
    let pred = pred.reshape(target.shape())?;
    let per_slot = binary_cross_entropy(&pred, target)?;
    let masked = (per_slot * mask)?;
    masked.sum_all()? / batch_size as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use candle_core::{DType, Device};

    fn t3(values: &[f32], b: usize, n: usize) -> Tensor {
        Tensor::from_slice(values, (b, n, 1), &Device::Cpu).unwrap()
    }

    fn t2(values: &[f32], b: usize, n: usize) -> Tensor {
        Tensor::from_slice(values, (b, n), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_bce_matches_closed_form() {
        let pred = t2(&[0.9, 0.2], 1, 2);
        let target = t2(&[1.0, 0.0], 1, 2);
        let bce = binary_cross_entropy(&pred, &target)
            .unwrap()
            .to_vec2::<f32>()
            .unwrap();
        assert_relative_eq!(bce[0][0], -(0.9f32).ln(), epsilon = 1e-5);
        assert_relative_eq!(bce[0][1], -(0.8f32).ln(), epsilon = 1e-5);
    }

    #[test]
    fn test_zero_mask_gives_zero_loss() {
        let pred = t3(&[0.0, 1.0, 0.3, 0.7], 2, 2);
        let target = t2(&[1.0, 0.0, 1.0, 1.0], 2, 2);
        let mask = Tensor::zeros((2, 2), DType::F32, &Device::Cpu).unwrap();
        let loss = masked_bce(&pred, &target, &mask).unwrap();
        assert_eq!(loss.to_scalar::<f32>().unwrap(), 0.0);
    }

    #[test]
    fn test_mask_selects_slots_and_scales_by_batch() {
        let pred = t3(&[0.5, 0.1, 0.5, 0.9], 2, 2);
        let target = t2(&[1.0, 1.0, 0.0, 1.0], 2, 2);
        let mask = t2(&[1.0, 0.0, 1.0, 0.0], 2, 2);
        let loss = masked_bce(&pred, &target, &mask)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        // two unmasked slots, each -ln(0.5), divided by batch size 2
        assert_relative_eq!(loss, (2.0f32).ln(), epsilon = 1e-5);
    }

    #[test]
    fn test_saturated_predictions_stay_finite() {
        let pred = t3(&[0.0, 1.0], 1, 2);
        let target = t2(&[1.0, 0.0], 1, 2);
        let mask = t2(&[1.0, 1.0], 1, 2);
        let loss = masked_bce(&pred, &target, &mask)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(loss.is_finite());
        assert!(loss > 20.0);
    }
}
