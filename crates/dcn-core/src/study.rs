//! Accuracy of the soft entropy estimate against the real (count-based) one
//!
//! A sweep draws synthetic latents over a range of distribution scales and
//! reports how far the soft estimate is from the hard entropy. The kernel grid
//! repeats the sweep over (ν, σ) pairs to pick kernel hyper-parameters.

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::entropy::{EntropyConfig, EntropyEstimator, Histogram, LogBase};
use crate::error::{DcnError, DcnResult};
use crate::kernel::Kernel;
use crate::quantizer::SoftQuantizer;
use crate::synthetic::{integer_levels, linspace, Distribution};

/// Hard vs soft entropy of one sample
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EntropyError {
    pub hard: f64,
    pub soft: f64,
    pub error: f64,
}

impl EntropyError {
    /// Error relative to the hard entropy, in percent
    pub fn relative(&self) -> f64 {
        if self.hard > 0.0 {
            100.0 * self.error / self.hard
        } else {
            0.0
        }
    }
}

/// Compare the soft estimate with the entropy of nearest-level counts
pub fn estimate_errors(
    values: &[f64],
    levels: &[f64],
    estimator: &EntropyEstimator,
) -> DcnResult<EntropyError> {
    let base = estimator.config().log_base;
    let hard = Histogram::hard(values, levels)?.entropy(base);
    let soft = estimator.entropy_of(values, levels)?;

    Ok(EntropyError {
        hard,
        soft,
        error: (hard - soft).abs(),
    })
}

/// Quality of the soft quantizer on one sample
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantizationReport {
    /// Mean `|round(x) - hard(x)|`
    pub hard_error: f64,
    /// Mean `|round(x) - soft(x)|`
    pub soft_error: f64,
    /// Mean absolute difference between histogram bins
    pub histogram_error: f64,
    /// `KL(real || soft)` in bits
    pub kl_divergence: f64,
    pub entropy: EntropyError,
}

impl fmt::Display for QuantizationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Quantization error (hard) : {:.4}", self.hard_error)?;
        writeln!(f, "Quantization error (soft) : {:.4}", self.soft_error)?;
        writeln!(f, "Histogram bin error       : {:.4}", self.histogram_error)?;
        writeln!(f, "Entropy                   : {:.4}", self.entropy.hard)?;
        writeln!(f, "Entropy (soft)            : {:.4}", self.entropy.soft)?;
        writeln!(f, "Entropy error             : {:.3}%", self.entropy.relative())?;
        write!(f, "Kullback-Leibler div.     : {:.4}", self.kl_divergence)
    }
}

/// Full comparison of soft and standard quantization for one sample
pub fn compare(
    values: &[f64],
    levels: &[f64],
    estimator: &EntropyEstimator,
) -> DcnResult<QuantizationReport> {
    if values.is_empty() {
        return Err(DcnError::shape("cannot compare an empty sample"));
    }

    let q = estimator.quantizer().quantize(values, levels)?;
    let soft_hist = Histogram::from_weights(&q.weights, estimator.config().floor)?;
    let real_hist = Histogram::hard(values, levels)?;
    let base = estimator.config().log_base;

    let (lo, hi) = levels
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let rounded: Vec<f64> = values
        .iter()
        .map(|x| x.round_ties_even().clamp(lo, hi))
        .collect();

    let n = values.len() as f64;
    let mean_abs = |other: &[f64]| {
        rounded
            .iter()
            .zip(other)
            .map(|(r, o)| (r - o).abs())
            .sum::<f64>()
            / n
    };

    let hard = real_hist.entropy(base);
    let soft = soft_hist.entropy(base);

    Ok(QuantizationReport {
        hard_error: mean_abs(&q.hard),
        soft_error: mean_abs(&q.soft),
        histogram_error: soft_hist.mean_abs_error(&real_hist)?,
        kl_divergence: real_hist.kl_divergence(&soft_hist)?,
        entropy: EntropyError {
            hard,
            soft,
            error: (hard - soft).abs(),
        },
    })
}

/// Parameters of a scale sweep
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub distribution: Distribution,
    pub min_scale: f64,
    pub max_scale: f64,
    pub n_scales: usize,
    pub n_samples: usize,
    /// Codebook is `-c_max ..= c_max`
    pub c_max: i32,
    pub entropy: EntropyConfig,
    pub seed: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            distribution: Distribution::Laplace,
            min_scale: 0.01,
            max_scale: 10.0,
            n_scales: 500,
            n_samples: 1000,
            c_max: 5,
            entropy: EntropyConfig {
                log_base: LogBase::Two,
                ..EntropyConfig::default()
            },
            seed: 1234,
        }
    }
}

impl SweepConfig {
    pub fn validate(&self) -> DcnResult<()> {
        if self.n_scales == 0 || self.n_samples == 0 {
            return Err(DcnError::config("sweep needs at least one scale and one sample"));
        }
        if !(self.min_scale > 0.0 && self.max_scale >= self.min_scale) {
            return Err(DcnError::config(format!(
                "invalid scale range {} - {}",
                self.min_scale, self.max_scale
            )));
        }
        if self.c_max < 1 {
            return Err(DcnError::config("codebook half-width must be at least 1"));
        }
        self.entropy.validate()
    }
}

/// One point of a sweep
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SweepPoint {
    pub scale: f64,
    pub errors: EntropyError,
}

/// Soft vs hard entropy over a range of distribution scales.
///
/// Each scale draws from its own RNG seeded with `seed + index`, so results do
/// not depend on how rayon schedules the points.
pub fn scale_sweep(config: &SweepConfig, kernel: Kernel) -> DcnResult<Vec<SweepPoint>> {
    config.validate()?;
    let estimator = EntropyEstimator::new(SoftQuantizer::new(kernel)?, config.entropy)?;
    let levels = integer_levels(config.c_max);

    tracing::debug!(
        "Sweeping {} {} scales ({} samples) with {}",
        config.n_scales,
        config.distribution,
        config.n_samples,
        kernel
    );

    linspace(config.min_scale, config.max_scale, config.n_scales)
        .into_par_iter()
        .enumerate()
        .map(|(i, scale)| {
            let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(i as u64));
            let values = config.distribution.sample(config.n_samples, scale, &mut rng)?;
            let errors = estimate_errors(&values, &levels, &estimator)?;
            Ok(SweepPoint { scale, errors })
        })
        .collect()
}

/// Aggregate of one (ν, σ) cell of the kernel grid
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridCell {
    pub kernel: Kernel,
    pub mean_abs_error: f64,
    /// Mean relative error in percent
    pub mean_relative_error: f64,
}

/// Run a sweep for every `(dof, sigma)` pair; `dof <= 0` is the Gaussian kernel.
pub fn kernel_grid(config: &SweepConfig, dofs: &[f64], sigmas: &[f64]) -> DcnResult<Vec<GridCell>> {
    let mut cells = Vec::with_capacity(dofs.len() * sigmas.len());

    for &dof in dofs {
        for &sigma in sigmas {
            let kernel = Kernel::from_params(sigma, dof);
            let points = scale_sweep(config, kernel)?;
            let n = points.len() as f64;

            let cell = GridCell {
                kernel,
                mean_abs_error: points.iter().map(|p| p.errors.error).sum::<f64>() / n,
                mean_relative_error: points.iter().map(|p| p.errors.relative()).sum::<f64>() / n,
            };
            tracing::info!(
                "Kernel: {} -> {:.2}% mean relative entropy error",
                kernel,
                cell.mean_relative_error
            );
            cells.push(cell);
        }
    }

    Ok(cells)
}
