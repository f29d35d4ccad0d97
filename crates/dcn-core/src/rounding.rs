//! Rounding policies and the effective (deployable) codebook
//!
//! The rounding mode decides what the decoder consumes after quantization. It
//! also decides which codebook is reported for bit packing: `identity` and
//! `soft` round against integers directly, so they report the canonical
//! integer range, while `soft-codebook` and `sin` report the trained levels.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

use crate::codebook::{BitDepth, Codebook, CodebookKind};
use crate::error::{DcnError, DcnResult};

/// Post-quantization value of a latent feature
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoundingMode {
    /// Nearest integer in the fixed range, straight-through gradient
    Identity,
    /// Kernel-weighted mixture of codebook levels
    #[default]
    Soft,
    /// Soft mixture; reporting uses the trained codebook
    SoftCodebook,
    /// Periodic smooth rounding surrogate
    Sin,
}

impl RoundingMode {
    pub const ALL: [RoundingMode; 4] = [
        RoundingMode::Identity,
        RoundingMode::Soft,
        RoundingMode::SoftCodebook,
        RoundingMode::Sin,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RoundingMode::Identity => "identity",
            RoundingMode::Soft => "soft",
            RoundingMode::SoftCodebook => "soft-codebook",
            RoundingMode::Sin => "sin",
        }
    }

    /// True when the reported codebook is the canonical integer range
    /// rather than the (possibly trained) internal one.
    pub fn reports_canonical_codebook(self) -> bool {
        matches!(self, RoundingMode::Identity | RoundingMode::Soft)
    }

    /// True when the decoder consumes the soft mixture
    pub fn is_soft(self) -> bool {
        matches!(self, RoundingMode::Soft | RoundingMode::SoftCodebook)
    }
}

impl fmt::Display for RoundingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoundingMode {
    type Err = DcnError;

    fn from_str(s: &str) -> DcnResult<Self> {
        RoundingMode::ALL
            .iter()
            .copied()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| {
                DcnError::config(format!(
                    "unsupported rounding mode '{}' \
                     (expected one of: identity, soft, soft-codebook, sin)",
                    s
                ))
            })
    }
}

/// Resolve the codebook reported for deployment.
///
/// * `bit_depth` overrides the model bit depth for the canonical range; it is
///   ignored when the trained codebook is reported.
/// * `use_canonical` forces the choice; `None` applies the rounding policy.
pub fn effective_codebook(
    rounding: RoundingMode,
    trained: &Codebook,
    model_bpf: BitDepth,
    bit_depth: Option<BitDepth>,
    use_canonical: Option<bool>,
) -> Codebook {
    let canonical = use_canonical.unwrap_or_else(|| rounding.reports_canonical_codebook());

    if canonical {
        Codebook::new(bit_depth.unwrap_or(model_bpf), CodebookKind::Fixed)
    } else {
        trained.clone()
    }
}

/// Round half to even, then clamp to the canonical range of `bpf`
pub fn round_identity(x: f64, bpf: BitDepth) -> f64 {
    x.round_ties_even()
        .clamp(bpf.qmin() as f64, bpf.qmax() as f64)
}

/// `x - sin(2πx) / 2π`: flat at integers, identity slope at half-integers
pub fn round_sin(x: f64) -> f64 {
    x - (2.0 * PI * x).sin() / (2.0 * PI)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_roundtrip() {
        for mode in RoundingMode::ALL {
            assert_eq!(mode.as_str().parse::<RoundingMode>().unwrap(), mode);
            let json = serde_json::to_string(&mode).unwrap();
            assert_eq!(json, format!("\"{}\"", mode.as_str()));
        }
        assert!(matches!(
            "stochastic".parse::<RoundingMode>(),
            Err(DcnError::Configuration(_))
        ));
    }

    #[test]
    fn test_reporting_policy() {
        assert!(RoundingMode::Identity.reports_canonical_codebook());
        assert!(RoundingMode::Soft.reports_canonical_codebook());
        assert!(!RoundingMode::SoftCodebook.reports_canonical_codebook());
        assert!(!RoundingMode::Sin.reports_canonical_codebook());
    }

    #[test]
    fn test_effective_codebook_overrides() {
        let bpf = BitDepth::new(2).unwrap();
        let drifted =
            Codebook::from_levels(vec![-1.2, 0.1, 0.8, 2.3], CodebookKind::Trainable).unwrap();

        // Policy picks the trained levels, the override forces canonical ones
        let forced =
            effective_codebook(RoundingMode::SoftCodebook, &drifted, bpf, None, Some(true));
        assert_eq!(forced.levels(), &[-1.0, 0.0, 1.0, 2.0]);

        // Output bit depth override only affects the canonical branch
        let wide = effective_codebook(
            RoundingMode::Soft,
            &drifted,
            bpf,
            Some(BitDepth::new(3).unwrap()),
            None,
        );
        assert_eq!(wide.len(), 8);
        let trained = effective_codebook(
            RoundingMode::Sin,
            &drifted,
            bpf,
            Some(BitDepth::new(3).unwrap()),
            None,
        );
        assert_eq!(trained.levels(), drifted.levels());
    }

    #[test]
    fn test_round_identity_saturates() {
        let bpf = BitDepth::new(3).unwrap(); // -3 ..= 4
        assert_eq!(round_identity(0.4, bpf), 0.0);
        assert_eq!(round_identity(2.5, bpf), 2.0);
        assert_eq!(round_identity(3.5, bpf), 4.0);
        assert_eq!(round_identity(-17.0, bpf), -3.0);
        assert_eq!(round_identity(9.9, bpf), 4.0);
    }

    #[test]
    fn test_round_sin_fixed_points() {
        for k in -3..=3 {
            let x = k as f64;
            assert!((round_sin(x) - x).abs() < 1e-12);
            assert!((round_sin(x + 0.5) - (x + 0.5)).abs() < 1e-12);
        }
        // Pulled towards the nearest integer in between
        assert!(round_sin(0.2) < 0.2);
        assert!(round_sin(0.8) > 0.8);
    }
}
