//! Single optimization steps and per-phase performance series
//!
//! Loop orchestration (batching, schedules, progress display) belongs to the
//! caller; a [`Trainer`] only performs one Adam step at a time with the
//! learning rate and entropy weight supplied for that step.

use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};

use dcn_core::{DcnError, DcnResult};

use crate::bottleneck::EntropyBottleneck;
use crate::codec::Codec;
use crate::loss::{LossComponents, RateDistortionLoss};
use crate::network::{CompressionNetwork, ForwardMode};

/// Scalars reported by one step
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepMetrics {
    /// Non-halved L2 norm, `√(2 · l2)`
    pub loss: f64,
    pub ssim: f64,
    pub entropy: f64,
}

impl From<LossComponents> for StepMetrics {
    fn from(components: LossComponents) -> Self {
        Self {
            loss: components.l2_norm(),
            ssim: components.ssim,
            entropy: components.entropy,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Training,
    Validation,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub loss: Vec<f64>,
    pub entropy: Vec<f64>,
    pub ssim: Vec<f64>,
}

impl MetricSeries {
    pub fn push(&mut self, metrics: StepMetrics) {
        self.loss.push(metrics.loss);
        self.entropy.push(metrics.entropy);
        self.ssim.push(metrics.ssim);
    }

    pub fn len(&self) -> usize {
        self.loss.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loss.is_empty()
    }

    pub fn last(&self) -> Option<StepMetrics> {
        Some(StepMetrics {
            loss: *self.loss.last()?,
            ssim: *self.ssim.last()?,
            entropy: *self.entropy.last()?,
        })
    }
}

/// Loss, entropy and SSIM history per phase
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub training: MetricSeries,
    pub validation: MetricSeries,
}

impl PerformanceStats {
    pub fn record(&mut self, phase: Phase, metrics: StepMetrics) {
        match phase {
            Phase::Training => self.training.push(metrics),
            Phase::Validation => self.validation.push(metrics),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Step-wise optimizer over a codec's network and bottleneck
pub struct Trainer<B, N, ON, OB>
where
    B: AutodiffBackend,
    N: CompressionNetwork<B> + AutodiffModule<B>,
    ON: Optimizer<N, B>,
    OB: Optimizer<EntropyBottleneck<B>, B>,
{
    codec: Codec<B, N>,
    network_optim: ON,
    bottleneck_optim: OB,
    keep_prob: f64,
    step: u64,
    performance: PerformanceStats,
}

/// Trainer with default Adam optimizers for both parameter groups
pub fn adam_trainer<B, N>(
    codec: Codec<B, N>,
) -> Trainer<B, N, impl Optimizer<N, B>, impl Optimizer<EntropyBottleneck<B>, B>>
where
    B: AutodiffBackend,
    N: CompressionNetwork<B> + AutodiffModule<B>,
{
    Trainer::new(codec, AdamConfig::new().init(), AdamConfig::new().init())
}

impl<B, N, ON, OB> Trainer<B, N, ON, OB>
where
    B: AutodiffBackend,
    N: CompressionNetwork<B> + AutodiffModule<B>,
    ON: Optimizer<N, B>,
    OB: Optimizer<EntropyBottleneck<B>, B>,
{
    pub fn new(codec: Codec<B, N>, network_optim: ON, bottleneck_optim: OB) -> Self {
        Self {
            codec,
            network_optim,
            bottleneck_optim,
            keep_prob: 1.0,
            step: 0,
            performance: PerformanceStats::default(),
        }
    }

    /// Dropout keep probability used by training steps
    pub fn with_keep_prob(mut self, keep_prob: f64) -> DcnResult<Self> {
        if !(keep_prob > 0.0 && keep_prob <= 1.0) {
            return Err(DcnError::config(format!(
                "dropout keep probability must be in (0, 1], got {}",
                keep_prob
            )));
        }
        self.keep_prob = keep_prob;
        Ok(self)
    }

    pub fn codec(&self) -> &Codec<B, N> {
        &self.codec
    }

    pub fn into_codec(self) -> Codec<B, N> {
        self.codec
    }

    pub fn performance(&self) -> &PerformanceStats {
        &self.performance
    }

    pub fn reset_performance_stats(&mut self) {
        self.performance.reset();
    }

    pub fn steps(&self) -> u64 {
        self.step
    }

    /// One Adam step on `batch`; `entropy_weight: None` optimizes distortion only
    pub fn training_step(
        &mut self,
        batch: Tensor<B, 4>,
        learning_rate: f64,
        entropy_weight: Option<f64>,
    ) -> DcnResult<StepMetrics> {
        if !learning_rate.is_finite() || learning_rate <= 0.0 {
            return Err(DcnError::config(format!(
                "learning rate must be positive, got {}",
                learning_rate
            )));
        }
        let loss_fn = RateDistortionLoss::new(self.codec.config().distortion, entropy_weight)?;
        self.codec.check_input(&batch)?;

        self.step += 1;
        let keep_prob = if self.codec.capabilities().has_dropout {
            self.keep_prob
        } else {
            1.0
        };
        let mode = ForwardMode::training(keep_prob, self.codec.context().seed ^ self.step);

        let quantized = self.codec.forward_latent(batch.clone(), &mode)?;
        let reconstruction = self.codec.network.synthesis(quantized.post, &mode);
        let (loss, components) = loss_fn.compose(batch, reconstruction, quantized.entropy)?;

        let mut grads = loss.backward();
        let network_grads = GradientsParams::from_module(&mut grads, &self.codec.network);
        let bottleneck_grads = GradientsParams::from_module(&mut grads, &self.codec.bottleneck);

        self.codec.network =
            self.network_optim
                .step(learning_rate, self.codec.network.clone(), network_grads);
        self.codec.bottleneck = self.bottleneck_optim.step(
            learning_rate,
            self.codec.bottleneck.clone(),
            bottleneck_grads,
        );

        let metrics = StepMetrics::from(components);
        tracing::debug!("Step {}: {}", self.step, components);
        self.performance.record(Phase::Training, metrics);
        Ok(metrics)
    }

    /// Evaluate without updating parameters; recorded as validation
    pub fn validation_step(&mut self, batch: Tensor<B, 4>) -> DcnResult<StepMetrics> {
        let config = self.codec.config();
        let loss_fn = RateDistortionLoss::new(config.distortion, config.entropy_weight)?;
        let mode = self.codec.evaluation_mode();

        let quantized = self.codec.forward_latent(batch.clone(), &mode)?;
        let reconstruction = self.codec.network.synthesis(quantized.post, &mode);
        let (_, components) = loss_fn.compose(batch, reconstruction, quantized.entropy)?;

        let metrics = StepMetrics::from(components);
        self.performance.record(Phase::Validation, metrics);
        Ok(metrics)
    }
}
