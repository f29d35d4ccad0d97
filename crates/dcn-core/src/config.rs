//! Codec configuration
//!
//! Everything that shapes the bottleneck is resolved here, validated once,
//! and then handed to the quantizer, estimator and loss composer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::codebook::{BitDepth, Codebook, CodebookKind};
use crate::constants::{DEFAULT_DOF, DEFAULT_SIGMA};
use crate::entropy::{EntropyConfig, EntropyEstimator};
use crate::error::{DcnError, DcnResult};
use crate::kernel::Kernel;
use crate::quantizer::SoftQuantizer;
use crate::rounding::RoundingMode;
use crate::stats::{compression_stats, CompressionStats};

/// Raw kernel parameters; `dof <= 0` selects the Gaussian kernel
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub sigma: f64,
    pub dof: f64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            sigma: DEFAULT_SIGMA,
            dof: DEFAULT_DOF,
        }
    }
}

impl KernelConfig {
    pub fn kernel(&self) -> DcnResult<Kernel> {
        let kernel = Kernel::from_params(self.sigma, self.dof);
        kernel.validate()?;
        Ok(kernel)
    }
}

/// Term driving the gradient besides the entropy penalty
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistortionMetric {
    #[default]
    L2,
    Ssim,
}

impl fmt::Display for DistortionMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistortionMetric::L2 => write!(f, "l2"),
            DistortionMetric::Ssim => write!(f, "ssim"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub latent_bpf: BitDepth,
    pub train_codebook: bool,
    /// `None` trains on distortion only
    pub entropy_weight: Option<f64>,
    /// Default patch edge used for compression statistics
    pub patch_size: Option<usize>,
    pub rounding: RoundingMode,
    pub kernel: KernelConfig,
    pub entropy: EntropyConfig,
    pub distortion: DistortionMetric,
    /// Decode from the hard latent outside of training
    pub hard_at_inference: bool,
    /// Learn a scalar multiplier applied to the latent before quantization
    pub scale_latent: bool,
    /// Run validation in training mode (dropout active)
    pub default_val_is_train: bool,
    pub seed: u64,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            latent_bpf: BitDepth::default(),
            train_codebook: false,
            entropy_weight: None,
            patch_size: Some(128),
            rounding: RoundingMode::Soft,
            kernel: KernelConfig::default(),
            entropy: EntropyConfig::default(),
            distortion: DistortionMetric::L2,
            hard_at_inference: false,
            scale_latent: false,
            default_val_is_train: true,
            seed: 1234,
        }
    }
}

impl CodecConfig {
    pub fn validate(&self) -> DcnResult<()> {
        if let Some(weight) = self.entropy_weight {
            validate_entropy_weight(weight)?;
        }
        if self.patch_size == Some(0) {
            return Err(DcnError::config("patch size must be positive"));
        }
        self.kernel.kernel()?;
        self.entropy.validate()?;
        Ok(())
    }

    pub fn codebook_kind(&self) -> CodebookKind {
        if self.train_codebook {
            CodebookKind::Trainable
        } else {
            CodebookKind::Fixed
        }
    }

    /// Initial codebook for a model built from this config
    pub fn codebook(&self) -> Codebook {
        Codebook::new(self.latent_bpf, self.codebook_kind())
    }

    pub fn quantizer(&self) -> DcnResult<SoftQuantizer> {
        SoftQuantizer::new(self.kernel.kernel()?)
    }

    pub fn estimator(&self) -> DcnResult<EntropyEstimator> {
        EntropyEstimator::new(self.quantizer()?, self.entropy)
    }

    pub fn compression_stats(
        &self,
        n_latent: usize,
        patch_size: Option<usize>,
        bytes_per_feature: Option<f64>,
    ) -> DcnResult<CompressionStats> {
        compression_stats(
            patch_size,
            self.patch_size,
            n_latent,
            bytes_per_feature,
            self.latent_bpf,
        )
    }

    /// Short summary, e.g. `DenseAutoencoder-64D/8x8-r:soft-Q+4bpf-S--H+0.10`
    pub fn model_code(
        &self,
        network_name: &str,
        n_latent: usize,
        latent_shape: &[usize],
        layers: &str,
    ) -> String {
        let mut parts = Vec::new();
        if !latent_shape.is_empty() {
            parts.push(
                latent_shape
                    .iter()
                    .map(|d| d.to_string())
                    .collect::<Vec<_>>()
                    .join("x"),
            );
        }
        if !layers.is_empty() {
            parts.push(layers.to_string());
        }
        parts.push(format!("r:{}", self.rounding));
        parts.push(format!(
            "Q{}{}bpf",
            if self.train_codebook { '+' } else { '-' },
            self.latent_bpf.bits()
        ));
        parts.push(if self.scale_latent { "S+" } else { "S-" }.to_string());
        if let Some(weight) = self.entropy_weight {
            parts.push(format!("H+{:.2}", weight));
        }

        format!("{}-{}D/{}", network_name, n_latent, parts.join("-"))
    }

    pub fn save(&self, path: &Path) -> DcnResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Read and validate a config file
    pub fn load(path: &Path) -> DcnResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: CodecConfig = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}

pub fn validate_entropy_weight(weight: f64) -> DcnResult<()> {
    if !weight.is_finite() || weight < 0.0 {
        return Err(DcnError::config(format!(
            "entropy weight must be a non-negative number, got {}",
            weight
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entropy::LogBase;

    #[test]
    fn test_defaults() {
        let config = CodecConfig::default();
        assert_eq!(config.latent_bpf.bits(), 4);
        assert_eq!(config.rounding, RoundingMode::Soft);
        assert_eq!(config.entropy.log_base, LogBase::NaturalOverLn2);
        assert_eq!(config.kernel.kernel().unwrap(), Kernel::StudentT { sigma: 5.0, dof: 25.0 });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_negative_entropy_weight() {
        let config = CodecConfig {
            entropy_weight: Some(-0.5),
            ..CodecConfig::default()
        };
        assert!(matches!(config.validate(), Err(DcnError::Configuration(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: CodecConfig =
            serde_json::from_str(r#"{"latent_bpf": 5, "rounding": "soft-codebook"}"#).unwrap();
        assert_eq!(config.latent_bpf.bits(), 5);
        assert_eq!(config.rounding, RoundingMode::SoftCodebook);
        assert_eq!(config.patch_size, Some(128));

        let bad = serde_json::from_str::<CodecConfig>(r#"{"latent_bpf": 9}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codec.json");
        let config = CodecConfig {
            train_codebook: true,
            entropy_weight: Some(250.0),
            kernel: KernelConfig { sigma: 10.0, dof: 0.0 },
            ..CodecConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(CodecConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_model_code() {
        let config = CodecConfig {
            latent_bpf: BitDepth::new(5).unwrap(),
            rounding: RoundingMode::SoftCodebook,
            scale_latent: true,
            entropy_weight: Some(250.0),
            ..CodecConfig::default()
        };
        assert_eq!(
            config.model_code("TwitterDCN", 8192, &[16, 16, 32], "3C"),
            "TwitterDCN-8192D/16x16x32-3C-r:soft-codebook-Q-5bpf-S+-H+250.00"
        );

        let plain = CodecConfig::default();
        assert_eq!(plain.model_code("Dense", 64, &[], ""), "Dense-64D/r:soft-Q-4bpf-S-");
    }

    #[test]
    fn test_stats_through_config() {
        let config = CodecConfig {
            patch_size: None,
            ..CodecConfig::default()
        };
        assert!(config.compression_stats(8192, None, None).is_err());
        let stats = config.compression_stats(8192, Some(128), None).unwrap();
        assert_eq!(stats.bpp, 2.0);
    }
}
