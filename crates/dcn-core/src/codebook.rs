//! Quantization codebooks
//!
//! A codebook is the ordered set of representative levels a latent feature is
//! quantized to. The default codebook for a bit depth `b` holds the `2^b`
//! consecutive integers `-2^(b-1)+1 ..= 2^(b-1)`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::{DEFAULT_LATENT_BPF, MAX_LATENT_BPF, MIN_LATENT_BPF};
use crate::error::{DcnError, DcnResult};

/// Validated bit depth of a latent feature, in `[1, 8]`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct BitDepth(u8);

impl BitDepth {
    pub fn new(bits: u8) -> DcnResult<Self> {
        if !(MIN_LATENT_BPF..=MAX_LATENT_BPF).contains(&bits) {
            return Err(DcnError::config(format!(
                "invalid latent bit depth {} (valid range: {} - {})",
                bits, MIN_LATENT_BPF, MAX_LATENT_BPF
            )));
        }
        Ok(Self(bits))
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// Number of codebook levels (`2^b`)
    pub fn levels(self) -> usize {
        1usize << self.0
    }

    /// Lowest canonical level: `-2^(b-1) + 1`
    pub fn qmin(self) -> i32 {
        -(1i32 << (self.0 - 1)) + 1
    }

    /// Highest canonical level: `2^(b-1)`
    pub fn qmax(self) -> i32 {
        1i32 << (self.0 - 1)
    }

    pub fn bytes_per_feature(self) -> f64 {
        self.0 as f64 / 8.0
    }
}

impl Default for BitDepth {
    fn default() -> Self {
        Self(DEFAULT_LATENT_BPF)
    }
}

impl TryFrom<u8> for BitDepth {
    type Error = DcnError;

    fn try_from(bits: u8) -> DcnResult<Self> {
        BitDepth::new(bits)
    }
}

impl From<BitDepth> for u8 {
    fn from(depth: BitDepth) -> u8 {
        depth.0
    }
}

impl fmt::Display for BitDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}bpf", self.0)
    }
}

/// Whether the levels are optimizer parameters or constants
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CodebookKind {
    Fixed,
    Trainable,
}

impl fmt::Display for CodebookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodebookKind::Fixed => write!(f, "fixed"),
            CodebookKind::Trainable => write!(f, "trainable"),
        }
    }
}

/// Ordered quantization levels
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Codebook {
    levels: Vec<f64>,
    kind: CodebookKind,
}

impl Codebook {
    /// Build the canonical integer codebook for `bpf`.
    pub fn new(bpf: BitDepth, kind: CodebookKind) -> Self {
        tracing::debug!(
            "Initializing {} codebook ({}): from {} to {}",
            kind,
            bpf,
            bpf.qmin(),
            bpf.qmax()
        );

        Self {
            levels: canonical_levels(bpf),
            kind,
        }
    }

    pub fn fixed(bpf: BitDepth) -> Self {
        Self::new(bpf, CodebookKind::Fixed)
    }

    /// Trainable codebook, initialized to the canonical integer sequence
    pub fn trainable(bpf: BitDepth) -> Self {
        Self::new(bpf, CodebookKind::Trainable)
    }

    /// Wrap explicit levels, e.g. values read back from a trained model.
    ///
    /// The level count must be a power of two in `[2, 256]`.
    pub fn from_levels(levels: Vec<f64>, kind: CodebookKind) -> DcnResult<Self> {
        if levels.len() < 2 {
            return Err(DcnError::shape(format!(
                "codebook must be 1 x K with K > 1, got 1 x {}",
                levels.len()
            )));
        }
        if !levels.len().is_power_of_two() || levels.len() > 1 << MAX_LATENT_BPF {
            return Err(DcnError::config(format!(
                "codebook size {} is not a power of two in [2, 256]",
                levels.len()
            )));
        }
        if let Some(bad) = levels.iter().find(|v| !v.is_finite()) {
            return Err(DcnError::config(format!("non-finite codebook level {}", bad)));
        }

        Ok(Self { levels, kind })
    }

    pub fn levels(&self) -> &[f64] {
        &self.levels
    }

    pub fn into_levels(self) -> Vec<f64> {
        self.levels
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn kind(&self) -> CodebookKind {
        self.kind
    }

    pub fn is_trainable(&self) -> bool {
        self.kind == CodebookKind::Trainable
    }

    /// Bit depth implied by the level count
    pub fn bit_depth(&self) -> BitDepth {
        BitDepth(self.levels.len().trailing_zeros() as u8)
    }

    /// Smallest and largest level
    pub fn range(&self) -> (f64, f64) {
        self.levels
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
    }

    /// Index of the level closest to `x`; see [`nearest_level`]
    pub fn nearest_index(&self, x: f64) -> usize {
        nearest_level(&self.levels, x)
    }
}

/// Consecutive integers `-2^(b-1)+1 ..= 2^(b-1)` as reals
pub fn canonical_levels(bpf: BitDepth) -> Vec<f64> {
    (bpf.qmin()..=bpf.qmax()).map(f64::from).collect()
}

/// Index of the level closest to `x`.
///
/// Equidistant levels resolve towards `x` rounded half to even, so integer
/// codebooks agree with `round_ties_even` at half-integers.
pub fn nearest_level(levels: &[f64], x: f64) -> usize {
    let target = x.round_ties_even();
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (i, &level) in levels.iter().enumerate() {
        let dist = (x - level).abs();
        let tie_wins = dist == best_dist && (level - target).abs() < (levels[best] - target).abs();
        if dist < best_dist || tie_wins {
            best_dist = dist;
            best = i;
        }
    }
    best
}
