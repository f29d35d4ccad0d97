//! Synthetic latent samples for estimator studies

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution as _, Exp, Normal};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{DcnError, DcnResult};

/// Zero-mean distribution family of the synthetic latent
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distribution {
    #[default]
    Laplace,
    Gaussian,
}

impl fmt::Display for Distribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Distribution::Laplace => write!(f, "laplace"),
            Distribution::Gaussian => write!(f, "gaussian"),
        }
    }
}

impl FromStr for Distribution {
    type Err = DcnError;

    fn from_str(s: &str) -> DcnResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "laplace" => Ok(Distribution::Laplace),
            "gaussian" | "normal" => Ok(Distribution::Gaussian),
            other => Err(DcnError::config(format!(
                "unknown distribution '{}' (expected laplace or gaussian)",
                other
            ))),
        }
    }
}

impl Distribution {
    /// Draw `n` samples with the given scale (Laplace `b`, Gaussian `σ`)
    pub fn sample(self, n: usize, scale: f64, rng: &mut impl Rng) -> DcnResult<Vec<f64>> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(DcnError::config(format!(
                "distribution scale must be positive, got {}",
                scale
            )));
        }

        match self {
            Distribution::Laplace => {
                // Symmetric exponential: |x| ~ Exp(1/b) with a random sign
                let exp = Exp::new(1.0 / scale).map_err(|e| DcnError::config(e.to_string()))?;
                Ok((0..n)
                    .map(|_| {
                        let magnitude: f64 = exp.sample(rng);
                        if rng.gen::<bool>() {
                            magnitude
                        } else {
                            -magnitude
                        }
                    })
                    .collect())
            }
            Distribution::Gaussian => {
                let normal =
                    Normal::new(0.0, scale).map_err(|e| DcnError::config(e.to_string()))?;
                Ok((0..n).map(|_| normal.sample(rng)).collect())
            }
        }
    }

    /// Seeded variant of [`Distribution::sample`]
    pub fn sample_seeded(self, n: usize, scale: f64, seed: u64) -> DcnResult<Vec<f64>> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.sample(n, scale, &mut rng)
    }
}

/// Integer codebook `-c_max ..= c_max`
pub fn integer_levels(c_max: i32) -> Vec<f64> {
    (-c_max..=c_max).map(f64::from).collect()
}

/// `n` evenly spaced values from `start` to `end` inclusive
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}
