//! Soft quantizer
//!
//! Every scalar of the latent is compared against every codebook level. The
//! kernel scores become one probability row per scalar; the soft value is the
//! expectation of the levels under that row and the hard value is the most
//! likely level.

use ndarray::{Array2, ArrayView1, Axis};
use rayon::prelude::*;

use crate::constants::WEIGHT_EPSILON;
use crate::error::{DcnError, DcnResult};
use crate::kernel::Kernel;

/// Soft and hard reconstruction of a flattened latent
#[derive(Clone, Debug)]
pub struct Quantization {
    /// `Σ_k w_k · level_k` per scalar
    pub soft: Vec<f64>,
    /// Level with maximal weight per scalar (the lower one on exact ties)
    pub hard: Vec<f64>,
    /// Index of the hard level per scalar
    pub indices: Vec<usize>,
    /// `N × K` assignment weights
    pub weights: Array2<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SoftQuantizer {
    kernel: Kernel,
    epsilon: f64,
}

impl SoftQuantizer {
    pub fn new(kernel: Kernel) -> DcnResult<Self> {
        kernel.validate()?;
        Ok(Self {
            kernel,
            epsilon: WEIGHT_EPSILON,
        })
    }

    /// Override the additive floor (must be positive)
    pub fn with_epsilon(mut self, epsilon: f64) -> DcnResult<Self> {
        if epsilon.is_nan() || epsilon <= 0.0 {
            return Err(DcnError::config(format!(
                "weight epsilon must be positive, got {}",
                epsilon
            )));
        }
        self.epsilon = epsilon;
        Ok(self)
    }

    pub fn kernel(&self) -> Kernel {
        self.kernel
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Assignment weights: `N × K`, each row a distribution over the levels.
    pub fn weights(&self, values: &[f64], levels: &[f64]) -> DcnResult<Array2<f64>> {
        check_levels(levels)?;
        let k = levels.len();

        let mut data = vec![0.0; values.len() * k];
        data.par_chunks_mut(k)
            .zip(values.par_iter())
            .for_each(|(row, &x)| self.fill_row(x, levels, row));

        Array2::from_shape_vec((values.len(), k), data)
            .map_err(|e| DcnError::shape(e.to_string()))
    }

    /// Assignment weights for a single scalar
    pub fn row(&self, x: f64, levels: &[f64]) -> DcnResult<Vec<f64>> {
        check_levels(levels)?;
        let mut row = vec![0.0; levels.len()];
        self.fill_row(x, levels, &mut row);
        Ok(row)
    }

    /// Soft and hard reconstruction of `values` against `levels`
    pub fn quantize(&self, values: &[f64], levels: &[f64]) -> DcnResult<Quantization> {
        let weights = self.weights(values, levels)?;

        let (soft, indices): (Vec<f64>, Vec<usize>) = weights
            .axis_iter(Axis(0))
            .into_par_iter()
            .map(|row| (expectation(row, levels), argmax(row)))
            .unzip();
        let hard = indices.iter().map(|&i| levels[i]).collect();

        Ok(Quantization {
            soft,
            hard,
            indices,
            weights,
        })
    }

    // Log-domain normalization: shifting by the row maximum keeps at least one
    // term at exp(0) = 1, so far-away values saturate onto the extremal level
    // instead of collapsing into a uniform row.
    fn fill_row(&self, x: f64, levels: &[f64], row: &mut [f64]) {
        let mut max = f64::NEG_INFINITY;
        for (slot, &c) in row.iter_mut().zip(levels) {
            *slot = self.kernel.log_weight(x - c);
            max = max.max(*slot);
        }

        let mut total = 0.0;
        for slot in row.iter_mut() {
            *slot = (*slot - max).exp();
            total += *slot;
        }

        let denom = total + self.epsilon * levels.len() as f64;
        for slot in row.iter_mut() {
            *slot = (*slot + self.epsilon) / denom;
        }
    }
}

fn check_levels(levels: &[f64]) -> DcnResult<()> {
    if levels.len() < 2 {
        return Err(DcnError::shape(format!(
            "codebook must be 1 x K with K > 1, got 1 x {}",
            levels.len()
        )));
    }
    Ok(())
}

fn expectation(row: ArrayView1<f64>, levels: &[f64]) -> f64 {
    row.iter().zip(levels).map(|(w, c)| w * c).sum()
}

/// First index of the row maximum
pub fn argmax(row: ArrayView1<f64>) -> usize {
    let mut best = 0;
    for (i, &w) in row.iter().enumerate() {
        if w > row[best] {
            best = i;
        }
    }
    best
}
