//! Compression bookkeeping from static model metadata

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::codebook::BitDepth;
use crate::constants::RGB_CHANNELS;
use crate::error::{DcnError, DcnResult};

/// Size of one compressed patch relative to its raw RGB bitmap
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompressionStats {
    /// Raw bytes over compressed bytes
    pub rate: f64,
    /// Bits per pixel
    pub bpp: f64,
    /// Bits per latent feature
    pub bpf: f64,
    /// Compressed bytes per patch
    pub bytes: f64,
}

impl CompressionStats {
    /// Stats for a `p × p` RGB patch coded as `n_latent` features.
    pub fn compute(patch_size: usize, n_latent: usize, bytes_per_feature: f64) -> DcnResult<Self> {
        if patch_size == 0 {
            return Err(DcnError::config("patch size must be positive"));
        }
        if n_latent == 0 {
            return Err(DcnError::config("latent dimensionality must be positive"));
        }
        if !bytes_per_feature.is_finite() || bytes_per_feature <= 0.0 {
            return Err(DcnError::config(format!(
                "bytes per feature must be positive, got {}",
                bytes_per_feature
            )));
        }

        let pixels = (patch_size * patch_size) as f64;
        let n = n_latent as f64;

        Ok(Self {
            rate: pixels * RGB_CHANNELS as f64 / (bytes_per_feature * n),
            bpp: 8.0 * n * bytes_per_feature / pixels,
            bpf: 8.0 * bytes_per_feature,
            bytes: n * bytes_per_feature,
        })
    }

    /// Raw bitmap bytes of the patch the stats were computed for
    pub fn raw_bytes(&self) -> f64 {
        self.rate * self.bytes
    }
}

impl fmt::Display for CompressionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rate={:.2}x, bpp={:.3}, bpf={:.1}, bytes={:.1}",
            self.rate, self.bpp, self.bpf, self.bytes
        )
    }
}

/// Resolve optional overrides against model defaults, then compute.
///
/// A missing patch size with no model default is a configuration error.
pub fn compression_stats(
    patch_size: Option<usize>,
    default_patch_size: Option<usize>,
    n_latent: usize,
    bytes_per_feature: Option<f64>,
    model_bpf: BitDepth,
) -> DcnResult<CompressionStats> {
    let patch = patch_size.or(default_patch_size).ok_or_else(|| {
        DcnError::config("patch size unknown: pass one explicitly or set a model default")
    })?;
    let bytes_per_feature = bytes_per_feature.unwrap_or_else(|| model_bpf.bytes_per_feature());

    CompressionStats::compute(patch, n_latent, bytes_per_feature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_reference_patch() {
        let stats = CompressionStats::compute(128, 8192, 0.5).unwrap();
        assert_relative_eq!(stats.bpp, 2.0);
        assert_relative_eq!(stats.bytes, 4096.0);
        assert_relative_eq!(stats.rate, 12.0);
        assert_relative_eq!(stats.bpf, 4.0);
        assert_relative_eq!(stats.raw_bytes(), 128.0 * 128.0 * 3.0);
    }

    #[test]
    fn test_defaults_resolution() {
        let bpf = BitDepth::new(4).unwrap();
        let stats = compression_stats(None, Some(128), 8192, None, bpf).unwrap();
        assert_relative_eq!(stats.bytes, 4096.0);

        let wide = compression_stats(Some(64), Some(128), 1024, Some(1.0), bpf).unwrap();
        assert_relative_eq!(stats.bpf, 4.0);
        assert_relative_eq!(wide.bpf, 8.0);
        assert_relative_eq!(wide.bpp, 2.0);
    }

    #[test]
    fn test_unresolved_patch_size() {
        let bpf = BitDepth::new(4).unwrap();
        let result = compression_stats(None, None, 8192, None, bpf);
        assert!(matches!(result, Err(DcnError::Configuration(_))));
        assert!(CompressionStats::compute(0, 10, 0.5).is_err());
        assert!(CompressionStats::compute(8, 0, 0.5).is_err());
        assert!(CompressionStats::compute(8, 10, 0.0).is_err());
    }
}
