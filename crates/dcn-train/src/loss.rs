//! Rate-distortion loss
//!
//! Distortion follows the halved squared-error convention, `½ Σ (x - y)²`.
//! SSIM between the input and the clipped reconstruction is always reported
//! and only drives the gradient when it is the selected metric.

use burn::prelude::*;
use burn::tensor::Tensor;

use dcn_core::config::validate_entropy_weight;
use dcn_core::{DcnError, DcnResult, DistortionMetric};

/// `½ Σ (x - y)²` over the whole batch
pub fn l2_loss<B: Backend>(x: Tensor<B, 4>, y: Tensor<B, 4>) -> Tensor<B, 1> {
    (x - y).powf_scalar(2.0).sum() / 2.0
}

/// Mean over the batch of a global (whole-patch) SSIM with unit data range
pub fn ssim<B: Backend>(x: Tensor<B, 4>, y: Tensor<B, 4>) -> Tensor<B, 1> {
    let c1 = 0.01_f64.powi(2);
    let c2 = 0.03_f64.powi(2);

    let [batch, h, w, c] = x.dims();
    let m = h * w * c;
    let x = x.reshape([batch, m]);
    let y = y.reshape([batch, m]);

    // `mean_dim` keeps the reduced dimension as size 1 and broadcasts back
    let mu_x = x.clone().mean_dim(1);
    let mu_y = y.clone().mean_dim(1);
    let diff_x = x - mu_x.clone();
    let diff_y = y - mu_y.clone();

    let var_x = diff_x.clone().powf_scalar(2.0).mean_dim(1);
    let var_y = diff_y.clone().powf_scalar(2.0).mean_dim(1);
    let cov = (diff_x * diff_y).mean_dim(1);

    let numerator = (mu_x.clone() * mu_y.clone() * 2.0 + c1) * (cov * 2.0 + c2);
    let denominator = (mu_x.powf_scalar(2.0) + mu_y.powf_scalar(2.0) + c1) * (var_x + var_y + c2);

    (numerator / denominator).mean()
}

/// Breakdown of one loss evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossComponents {
    /// `½ Σ (x - y)²`
    pub l2: f64,
    pub ssim: f64,
    /// Bits per latent element
    pub entropy: f64,
    pub total: f64,
}

impl LossComponents {
    /// Non-halved L2 norm, `√(2 · l2)`
    pub fn l2_norm(&self) -> f64 {
        (2.0 * self.l2).sqrt()
    }
}

impl std::fmt::Display for LossComponents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "total={:.4} (L2={:.4} SSIM={:.4} H={:.3})",
            self.total,
            self.l2_norm(),
            self.ssim,
            self.entropy
        )
    }
}

/// Distortion plus an optional entropy penalty
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateDistortionLoss {
    metric: DistortionMetric,
    entropy_weight: Option<f64>,
}

impl RateDistortionLoss {
    /// `entropy_weight: None` trains on distortion only
    pub fn new(metric: DistortionMetric, entropy_weight: Option<f64>) -> DcnResult<Self> {
        if let Some(weight) = entropy_weight {
            validate_entropy_weight(weight)?;
        }

        match entropy_weight {
            Some(weight) => {
                tracing::debug!("Initializing loss: {} + {:.2} * entropy", metric, weight)
            }
            None => tracing::debug!("Initializing loss: {}", metric),
        }

        Ok(Self {
            metric,
            entropy_weight,
        })
    }

    pub fn metric(&self) -> DistortionMetric {
        self.metric
    }

    pub fn entropy_weight(&self) -> Option<f64> {
        self.entropy_weight
    }

    /// Combine input `x`, reconstruction `y` and the latent entropy
    pub fn compose<B: Backend>(
        &self,
        x: Tensor<B, 4>,
        y: Tensor<B, 4>,
        entropy: Tensor<B, 1>,
    ) -> DcnResult<(Tensor<B, 1>, LossComponents)> {
        if x.dims() != y.dims() {
            return Err(DcnError::shape(format!(
                "input {:?} and reconstruction {:?} differ",
                x.dims(),
                y.dims()
            )));
        }

        let l2 = l2_loss(x.clone(), y.clone());
        let ssim = ssim(x, y.clamp(0.0, 1.0));

        let distortion = match self.metric {
            DistortionMetric::L2 => l2.clone(),
            DistortionMetric::Ssim => ssim.clone().neg() + 1.0,
        };
        let total = match self.entropy_weight {
            Some(weight) => distortion + entropy.clone() * weight,
            None => distortion,
        };

        let components = LossComponents {
            l2: l2.into_scalar().elem::<f64>(),
            ssim: ssim.into_scalar().elem::<f64>(),
            entropy: entropy.into_scalar().elem::<f64>(),
            total: total.clone().into_scalar().elem::<f64>(),
        };

        Ok((total, components))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;

    type B = NdArray;

    fn image(values: Vec<f32>) -> Tensor<B, 4> {
        let n = values.len() / 3;
        Tensor::from_data(TensorData::new(values, [1, 1, n, 3]), &Default::default())
    }

    fn scalar(value: f32) -> Tensor<B, 1> {
        Tensor::from_floats([value], &Default::default())
    }

    #[test]
    fn test_l2_is_halved() {
        let x = image(vec![0.0; 6]);
        let y = image(vec![1.0, 0.0, 0.0, 0.0, 0.0, 2.0]);
        let l2 = l2_loss(x, y).into_scalar().elem::<f32>();
        assert_abs_diff_eq!(l2, 2.5, epsilon = 1e-6);
    }

    #[test]
    fn test_ssim_identical_is_one() {
        let x = image(vec![0.1, 0.5, 0.9, 0.3, 0.7, 0.2]);
        let s = ssim(x.clone(), x).into_scalar().elem::<f32>();
        assert_abs_diff_eq!(s, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_entropy_weight_composition() {
        let x = image(vec![0.0; 6]);
        let y = image(vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0]);

        let plain = RateDistortionLoss::new(DistortionMetric::L2, None).unwrap();
        let (_, c) = plain.compose(x.clone(), y.clone(), scalar(3.0)).unwrap();
        assert_abs_diff_eq!(c.total, 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(c.entropy, 3.0, epsilon = 1e-6);
        assert_abs_diff_eq!(c.l2_norm(), 1.0, epsilon = 1e-6);

        let weighted = RateDistortionLoss::new(DistortionMetric::L2, Some(0.5)).unwrap();
        let (total, c) = weighted.compose(x, y, scalar(3.0)).unwrap();
        assert_abs_diff_eq!(c.total, 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(total.into_scalar().elem::<f32>(), 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_ssim_metric_and_clipping() {
        let x = image(vec![0.2, 0.4, 0.6, 0.8, 0.5, 0.1]);
        // Reconstruction overshoots; SSIM sees the clipped version
        let y = image(vec![0.2, 0.4, 0.6, 0.8, 0.5, 0.1].into_iter().map(|v| v + 5.0).collect());
        let loss = RateDistortionLoss::new(DistortionMetric::Ssim, None).unwrap();
        let (_, c) = loss.compose(x, y, scalar(0.0)).unwrap();
        assert!(c.ssim < 0.5);
        assert_abs_diff_eq!(c.total, 1.0 - c.ssim, epsilon = 1e-6);
    }

    #[test]
    fn test_rejects_negative_weight() {
        assert!(matches!(
            RateDistortionLoss::new(DistortionMetric::L2, Some(-1.0)),
            Err(DcnError::Configuration(_))
        ));
        let x = image(vec![0.0; 6]);
        let y = image(vec![0.0; 3]);
        let loss = RateDistortionLoss::new(DistortionMetric::L2, None).unwrap();
        assert!(loss.compose(x, y, scalar(0.0)).is_err());
    }
}
