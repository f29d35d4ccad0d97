//! Histogram and entropy estimation over soft assignments
//!
//! The soft histogram is the mean of the assignment rows. It is floored and
//! renormalized before the entropy is taken, so a collapsed batch gives an
//! entropy close to zero instead of `0 · log 0 = NaN`.

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use std::f64::consts::LN_2;
use std::fmt;

use crate::codebook::nearest_level;
use crate::constants::HISTOGRAM_FLOOR;
use crate::error::{DcnError, DcnResult};
use crate::quantizer::SoftQuantizer;

/// How bits are computed from probabilities; both agree to rounding error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LogBase {
    /// `log2(p)`
    Two,
    /// `ln(p) / ln 2`
    #[default]
    NaturalOverLn2,
}

impl LogBase {
    #[inline]
    pub fn bits(self, p: f64) -> f64 {
        match self {
            LogBase::Two => p.log2(),
            LogBase::NaturalOverLn2 => p.ln() / LN_2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EntropyConfig {
    /// Lower clip applied to every histogram bin before renormalization
    pub floor: f64,
    pub log_base: LogBase,
}

impl Default for EntropyConfig {
    fn default() -> Self {
        Self {
            floor: HISTOGRAM_FLOOR,
            log_base: LogBase::NaturalOverLn2,
        }
    }
}

impl EntropyConfig {
    pub fn validate(&self) -> DcnResult<()> {
        if !self.floor.is_finite() || self.floor <= 0.0 || self.floor >= 1.0 {
            return Err(DcnError::config(format!(
                "histogram floor must be in (0, 1), got {}",
                self.floor
            )));
        }
        Ok(())
    }
}

/// Normalized marginal distribution over codebook levels
#[derive(Clone, Debug, PartialEq)]
pub struct Histogram {
    probabilities: Vec<f64>,
}

impl Histogram {
    /// Mean of the weight rows, floored and renormalized
    pub fn from_weights(weights: &Array2<f64>, floor: f64) -> DcnResult<Self> {
        let (n, k) = weights.dim();
        if n == 0 {
            return Err(DcnError::shape("cannot build a histogram from an empty batch"));
        }
        if k < 2 {
            return Err(DcnError::shape(format!(
                "weights must have K > 1 columns, got {}",
                k
            )));
        }

        let mean = weights.sum_axis(Axis(0)) / n as f64;
        Ok(Self::normalized(mean.to_vec(), floor))
    }

    /// Floor and renormalize an arbitrary non-negative vector
    pub fn from_probabilities(values: Vec<f64>, floor: f64) -> DcnResult<Self> {
        if values.len() < 2 {
            return Err(DcnError::shape(format!(
                "histogram needs K > 1 bins, got {}",
                values.len()
            )));
        }
        Ok(Self::normalized(values, floor))
    }

    /// Nearest-level counts, each clipped to at least one
    pub fn hard(values: &[f64], levels: &[f64]) -> DcnResult<Self> {
        if levels.len() < 2 {
            return Err(DcnError::shape(format!(
                "codebook must be 1 x K with K > 1, got 1 x {}",
                levels.len()
            )));
        }

        let mut counts = vec![0.0; levels.len()];
        for &x in values {
            counts[nearest_level(levels, x)] += 1.0;
        }
        Ok(Self::normalized(counts, 1.0))
    }

    fn normalized(mut values: Vec<f64>, floor: f64) -> Self {
        for v in values.iter_mut() {
            *v = v.max(floor);
        }
        let total: f64 = values.iter().sum();
        for v in values.iter_mut() {
            *v /= total;
        }
        Self {
            probabilities: values,
        }
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.probabilities
    }

    pub fn len(&self) -> usize {
        self.probabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probabilities.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.probabilities.iter().sum()
    }

    /// `-Σ p log p` in bits
    pub fn entropy(&self, base: LogBase) -> f64 {
        -self
            .probabilities
            .iter()
            .map(|&p| p * base.bits(p))
            .sum::<f64>()
    }

    /// `KL(self || other)` in bits
    pub fn kl_divergence(&self, other: &Histogram) -> DcnResult<f64> {
        self.check_same_len(other)?;
        Ok(self
            .probabilities
            .iter()
            .zip(&other.probabilities)
            .map(|(&p, &q)| p * (p / q).log2())
            .sum())
    }

    pub fn mean_abs_error(&self, other: &Histogram) -> DcnResult<f64> {
        self.check_same_len(other)?;
        Ok(self
            .probabilities
            .iter()
            .zip(&other.probabilities)
            .map(|(p, q)| (p - q).abs())
            .sum::<f64>()
            / self.len() as f64)
    }

    fn check_same_len(&self, other: &Histogram) -> DcnResult<()> {
        if self.len() != other.len() {
            return Err(DcnError::shape(format!(
                "histogram sizes differ: {} vs {}",
                self.len(),
                other.len()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Histogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, p) in self.probabilities.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:.4}", p)?;
        }
        write!(f, "]")
    }
}

/// Host-side estimator combining a soft quantizer with histogram settings
#[derive(Clone, Copy, Debug)]
pub struct EntropyEstimator {
    quantizer: SoftQuantizer,
    config: EntropyConfig,
}

impl EntropyEstimator {
    pub fn new(quantizer: SoftQuantizer, config: EntropyConfig) -> DcnResult<Self> {
        config.validate()?;
        Ok(Self { quantizer, config })
    }

    pub fn quantizer(&self) -> &SoftQuantizer {
        &self.quantizer
    }

    pub fn config(&self) -> &EntropyConfig {
        &self.config
    }

    /// Soft histogram of `values` against `levels`
    pub fn histogram(&self, values: &[f64], levels: &[f64]) -> DcnResult<Histogram> {
        let weights = self.quantizer.weights(values, levels)?;
        Histogram::from_weights(&weights, self.config.floor)
    }

    /// Entropy of precomputed assignment weights
    pub fn entropy_of_weights(&self, weights: &Array2<f64>) -> DcnResult<f64> {
        let histogram = Histogram::from_weights(weights, self.config.floor)?;
        Ok(histogram.entropy(self.config.log_base))
    }

    /// Soft entropy of a batch of latent values
    pub fn entropy_of(&self, values: &[f64], levels: &[f64]) -> DcnResult<f64> {
        Ok(self
            .histogram(values, levels)?
            .entropy(self.config.log_base))
    }
}

/// Entropy of the count-based histogram of nearest-level assignments
pub fn hard_entropy(values: &[f64], levels: &[f64], base: LogBase) -> DcnResult<f64> {
    Ok(Histogram::hard(values, levels)?.entropy(base))
}
