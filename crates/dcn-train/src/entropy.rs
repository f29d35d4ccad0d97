//! Differentiable histogram and entropy on burn tensors

use burn::prelude::*;
use std::f64::consts::LN_2;

use dcn_core::EntropyConfig;

/// Mean of the `[N, K]` assignment rows, floored and renormalized to `[K]`
pub fn soft_histogram<B: Backend>(weights: Tensor<B, 2>, floor: f64) -> Tensor<B, 1> {
    let k = weights.dims()[1];
    let histogram = weights.mean_dim(0).reshape([k]).clamp_min(floor);
    let total = histogram.clone().sum();
    histogram / total
}

/// `-Σ p log p` in bits for a normalized histogram
///
/// Both log bases of [`EntropyConfig`] reduce to `ln(p) / ln 2` here.
pub fn entropy_bits<B: Backend>(histogram: Tensor<B, 1>) -> Tensor<B, 1> {
    (histogram.clone() * histogram.log()).sum() * (-1.0 / LN_2)
}

/// Entropy of precomputed assignment weights
pub fn entropy_of_weights<B: Backend>(
    weights: Tensor<B, 2>,
    config: &EntropyConfig,
) -> Tensor<B, 1> {
    entropy_bits(soft_histogram(weights, config.floor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type B = NdArray;

    fn weights(rows: Vec<f32>, n: usize, k: usize) -> Tensor<B, 2> {
        Tensor::from_data(TensorData::new(rows, [n, k]), &Default::default())
    }

    #[test]
    fn test_uniform_weights_give_log_k() {
        let w = weights(vec![0.25; 8], 2, 4);
        let entropy = entropy_of_weights(w, &EntropyConfig::default())
            .into_scalar()
            .elem::<f32>();
        assert_abs_diff_eq!(entropy, 2.0, epsilon = 1e-5);
    }

    #[test]
    fn test_collapsed_histogram() {
        let w = weights(vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0], 2, 4);
        let histogram = soft_histogram(w, 1e-9);
        let total = histogram.clone().sum().into_scalar().elem::<f32>();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-6);

        let entropy = entropy_bits(histogram).into_scalar().elem::<f32>();
        assert!(entropy.is_finite());
        assert!(entropy >= 0.0 && entropy < 1e-4);
    }
}
