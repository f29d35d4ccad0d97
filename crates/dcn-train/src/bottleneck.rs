//! Differentiable entropy bottleneck
//!
//! Sits between the analysis and synthesis transforms. The latent is
//! optionally rescaled, softly assigned to the codebook levels, and rounded
//! according to the configured policy. The assignment weights feed a soft
//! histogram whose entropy is the rate term of the loss.

use burn::module::{Ignored, Module, Param};
use burn::prelude::*;
use burn::tensor::FloatDType;
use std::f64::consts::PI;

use dcn_core::constants::WEIGHT_EPSILON;
use dcn_core::{
    effective_codebook, BitDepth, Codebook, CodebookKind, CodecConfig, DcnError, DcnResult,
    Kernel, RoundingMode,
};

use crate::entropy::{entropy_bits, soft_histogram};

/// Settings that shape the bottleneck but are not parameters
#[derive(Clone, Debug)]
pub struct BottleneckSettings {
    pub config: CodecConfig,
    pub kernel: Kernel,
    pub kind: CodebookKind,
}

#[derive(Module, Debug)]
pub struct EntropyBottleneck<B: Backend> {
    /// Levels `[1, K]`
    codebook: Param<Tensor<B, 2>>,
    /// Scalar multiplier applied before quantization
    latent_scale: Option<Param<Tensor<B, 1>>>,
    settings: Ignored<BottleneckSettings>,
}

/// Every view of one quantized latent batch
#[derive(Clone, Debug)]
pub struct QuantizedLatent<B: Backend> {
    /// Continuous latent that feeds the estimator, `[batch, n_latent]`
    pub pre: Tensor<B, 2>,
    /// What the decoder consumes, `[batch, n_latent]`
    pub post: Tensor<B, 2>,
    /// Kernel-weighted reconstruction, `[batch, n_latent]`
    pub soft: Tensor<B, 2>,
    /// Most likely level, `[batch, n_latent]`
    pub hard: Tensor<B, 2>,
    /// Assignment weights, `[batch * n_latent, K]`.
    ///
    /// Rows are strictly positive in the f64 computation; this f32 view
    /// flushes the `1e-72` floor to exact zeros.
    pub weights: Tensor<B, 2>,
    /// Soft histogram, `[K]`
    pub histogram: Tensor<B, 1>,
    /// Entropy in bits per latent element, `[1]`
    pub entropy: Tensor<B, 1>,
}

impl<B: Backend> EntropyBottleneck<B> {
    pub fn new(config: &CodecConfig, device: &B::Device) -> DcnResult<Self> {
        Self::with_codebook(&config.codebook(), config, device)
    }

    /// Build around explicit levels, e.g. a codebook read back from training
    pub fn with_codebook(
        codebook: &Codebook,
        config: &CodecConfig,
        device: &B::Device,
    ) -> DcnResult<Self> {
        config.validate()?;
        let kernel = config.kernel.kernel()?;

        let k = codebook.len();
        let levels: Vec<f32> = codebook.levels().iter().map(|&v| v as f32).collect();
        let tensor = Tensor::<B, 1>::from_floats(levels.as_slice(), device).reshape([1, k]);

        let latent_scale = config
            .scale_latent
            .then(|| Param::from_tensor(Tensor::<B, 1>::ones([1], device)));

        let (lo, hi) = codebook.range();
        tracing::info!(
            "Initializing {} codebook ({} levels): from {} to {}",
            codebook.kind(),
            k,
            lo,
            hi
        );
        tracing::info!("Entropy estimation using {} soft quantization", kernel);

        Ok(Self {
            codebook: Param::from_tensor(tensor),
            latent_scale,
            settings: Ignored(BottleneckSettings {
                config: config.clone(),
                kernel,
                kind: codebook.kind(),
            }),
        })
    }

    pub fn config(&self) -> &CodecConfig {
        &self.settings.config
    }

    pub fn kernel(&self) -> Kernel {
        self.settings.kernel
    }

    pub fn rounding(&self) -> RoundingMode {
        self.settings.config.rounding
    }

    pub fn is_trainable(&self) -> bool {
        self.settings.kind == CodebookKind::Trainable
    }

    pub fn levels(&self) -> usize {
        self.codebook.dims()[1]
    }

    /// Codebook tensor `[1, K]`; constant unless the codebook is trainable
    pub fn codebook_tensor(&self) -> Tensor<B, 2> {
        if self.is_trainable() {
            self.codebook.val()
        } else {
            self.codebook.val().detach()
        }
    }

    /// Current learned latent scale, 1 when scaling is disabled
    pub fn latent_scale(&self) -> f64 {
        match &self.latent_scale {
            Some(scale) => scale.val().into_scalar().elem::<f64>(),
            None => 1.0,
        }
    }

    /// Host copy of the internal (possibly trained) codebook
    pub fn codebook(&self) -> DcnResult<Codebook> {
        let levels: Vec<f64> = self.codebook.val().into_data().iter::<f64>().collect();
        Codebook::from_levels(levels, self.settings.kind)
    }

    /// Codebook reported for deployment under the rounding policy
    pub fn effective_codebook(
        &self,
        bit_depth: Option<BitDepth>,
        use_canonical: Option<bool>,
    ) -> DcnResult<Codebook> {
        let trained = self.codebook()?;
        Ok(effective_codebook(
            self.rounding(),
            &trained,
            self.config().latent_bpf,
            bit_depth,
            use_canonical,
        ))
    }

    /// Quantize a `[batch, n_latent]` latent.
    ///
    /// Outside of training the decoder input switches to the hard latent when
    /// `hard_at_inference` is set.
    pub fn quantize(&self, latent: Tensor<B, 2>, training: bool) -> DcnResult<QuantizedLatent<B>> {
        let [batch, n_latent] = latent.dims();
        if batch == 0 || n_latent == 0 {
            return Err(DcnError::shape(format!(
                "latent must be non-empty, got [{}, {}]",
                batch, n_latent
            )));
        }

        let pre = match &self.latent_scale {
            Some(scale) => latent * scale.val().reshape([1, 1]),
            None => latent,
        };

        let assignment = self.soft_assignment(pre.clone());
        let soft = assignment.soft.reshape([batch, n_latent]);
        let hard = assignment.hard.reshape([batch, n_latent]);

        let post = match self.rounding() {
            RoundingMode::Identity => {
                let bpf = self.config().latent_bpf;
                let rounded = pre.clone().round().clamp(bpf.qmin() as f64, bpf.qmax() as f64);
                // Straight-through: forward rounds, backward is the identity
                pre.clone() + (rounded - pre.clone()).detach()
            }
            RoundingMode::Soft | RoundingMode::SoftCodebook => soft.clone(),
            RoundingMode::Sin => pre.clone() - (pre.clone() * (2.0 * PI)).sin() / (2.0 * PI),
        };
        let post = if !training && self.config().hard_at_inference {
            hard.clone().detach()
        } else {
            post
        };

        Ok(QuantizedLatent {
            pre,
            post,
            soft,
            hard,
            weights: assignment.weights,
            histogram: assignment.histogram,
            entropy: assignment.entropy,
        })
    }

    /// Kernel weights, soft/hard values and entropy of every latent scalar.
    ///
    /// Evaluated in f64 and cast back to f32 at the end. Rows are normalized
    /// in the log domain with a max shift so distant values saturate onto the
    /// extremal level instead of underflowing into a uniform row.
    fn soft_assignment(&self, values: Tensor<B, 2>) -> SoftAssignment<B> {
        let [batch, n_latent] = values.dims();
        let n = batch * n_latent;
        let k = self.levels();

        let levels = self.codebook_tensor().cast(FloatDType::F64);
        // [n, 1] against [1, k] broadcasts to [n, k]
        let x = values.reshape([n, 1]).cast(FloatDType::F64);
        let diff = x - levels.clone();

        let log_weights = kernel_log_weights(diff, &self.kernel());
        let shift = log_weights.clone().max_dim(1).detach();
        let raw = (log_weights - shift).exp();
        let total = raw.clone().sum_dim(1);
        let weights = (raw + WEIGHT_EPSILON) / (total + WEIGHT_EPSILON * k as f64);

        let soft = weights.clone().matmul(levels.clone().transpose());
        let indices = weights.clone().argmax(1).reshape([n]);
        let hard = levels.reshape([k]).select(0, indices).reshape([n, 1]);

        let histogram = soft_histogram(weights.clone(), self.config().entropy.floor);
        let entropy = entropy_bits(histogram.clone());

        SoftAssignment {
            weights: weights.cast(FloatDType::F32),
            soft: soft.cast(FloatDType::F32),
            hard: hard.cast(FloatDType::F32),
            histogram: histogram.cast(FloatDType::F32),
            entropy: entropy.cast(FloatDType::F32),
        }
    }
}

struct SoftAssignment<B: Backend> {
    weights: Tensor<B, 2>,
    soft: Tensor<B, 2>,
    hard: Tensor<B, 2>,
    histogram: Tensor<B, 1>,
    entropy: Tensor<B, 1>,
}

/// Unnormalized log-weights for a matrix of signed distances
pub fn kernel_log_weights<B: Backend>(diff: Tensor<B, 2>, kernel: &Kernel) -> Tensor<B, 2> {
    match *kernel {
        Kernel::Gaussian { sigma } => diff.powf_scalar(2.0) * (-sigma),
        Kernel::StudentT { sigma, dof } => {
            let t = (diff * sigma).powf_scalar(2.0) / dof;
            t.log1p() * (-0.5 * (dof + 1.0))
        }
    }
}
