//! Codec facade: a network, its entropy bottleneck and an execution context
//!
//! Shapes and configuration are checked eagerly on every call before any
//! tensor work is issued.

use burn::prelude::*;

use dcn_core::{BitDepth, Codebook, CodecConfig, CompressionStats, DcnError, DcnResult};

use crate::bottleneck::{EntropyBottleneck, QuantizedLatent};
use crate::context::ExecutionContext;
use crate::network::{Capabilities, CompressionNetwork, ForwardMode};

#[derive(Debug)]
pub struct Codec<B: Backend, N: CompressionNetwork<B>> {
    pub(crate) network: N,
    pub(crate) bottleneck: EntropyBottleneck<B>,
    context: ExecutionContext<B>,
    capabilities: Capabilities,
}

impl<B: Backend, N: CompressionNetwork<B>> Codec<B, N> {
    pub fn new(network: N, config: &CodecConfig, context: ExecutionContext<B>) -> DcnResult<Self> {
        let bottleneck = EntropyBottleneck::new(config, &context.device)?;
        Ok(Self::from_parts(network, bottleneck, context))
    }

    pub fn from_parts(
        network: N,
        bottleneck: EntropyBottleneck<B>,
        context: ExecutionContext<B>,
    ) -> Self {
        let capabilities = network.capabilities();
        tracing::info!(
            "{} with {}-D latent representation ({:?})",
            network.name(),
            network.n_latent(),
            capabilities
        );

        Self {
            network,
            bottleneck,
            context,
            capabilities,
        }
    }

    pub fn network(&self) -> &N {
        &self.network
    }

    pub fn bottleneck(&self) -> &EntropyBottleneck<B> {
        &self.bottleneck
    }

    pub fn config(&self) -> &CodecConfig {
        self.bottleneck.config()
    }

    pub fn context(&self) -> &ExecutionContext<B> {
        &self.context
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn n_latent(&self) -> usize {
        self.network.n_latent()
    }

    /// Mode used outside of training steps
    pub fn evaluation_mode(&self) -> ForwardMode {
        let is_training =
            self.capabilities.has_batchnorm_flag && self.config().default_val_is_train;
        ForwardMode::evaluation(is_training)
    }

    /// Encode and quantize, returning every view of the latent
    pub fn forward_latent(
        &self,
        batch: Tensor<B, 4>,
        mode: &ForwardMode,
    ) -> DcnResult<QuantizedLatent<B>> {
        self.check_input(&batch)?;
        let latent = self.network.analysis(batch, mode);
        self.bottleneck.quantize(latent, mode.is_training)
    }

    /// Latent the decoder would consume
    pub fn compress(&self, batch: Tensor<B, 4>) -> DcnResult<Tensor<B, 2>> {
        Ok(self.forward_latent(batch, &self.evaluation_mode())?.post)
    }

    /// Continuous latent before quantization
    pub fn compress_soft(&self, batch: Tensor<B, 4>) -> DcnResult<Tensor<B, 2>> {
        Ok(self.forward_latent(batch, &self.evaluation_mode())?.pre)
    }

    /// Reconstruction clipped to `[0, 1]`
    pub fn decompress(&self, latent: Tensor<B, 2>) -> DcnResult<Tensor<B, 4>> {
        let [batch, n_latent] = latent.dims();
        if batch == 0 || n_latent != self.n_latent() {
            return Err(DcnError::shape(format!(
                "expected latent [batch, {}], got [{}, {}]",
                self.n_latent(),
                batch,
                n_latent
            )));
        }

        Ok(self
            .network
            .synthesis(latent, &ForwardMode::inference())
            .clamp(0.0, 1.0))
    }

    /// Full encode, quantize and decode, clipped to `[0, 1]`
    pub fn process(&self, batch: Tensor<B, 4>) -> DcnResult<Tensor<B, 4>> {
        let mode = self.evaluation_mode();
        let quantized = self.forward_latent(batch, &mode)?;
        Ok(self.network.synthesis(quantized.post, &mode).clamp(0.0, 1.0))
    }

    /// Soft histogram of the batch latent
    pub fn histogram(&self, batch: Tensor<B, 4>) -> DcnResult<Vec<f64>> {
        let quantized = self.forward_latent(batch, &self.evaluation_mode())?;
        Ok(quantized.histogram.into_data().iter::<f64>().collect())
    }

    /// Soft entropy of the batch latent, in bits per element
    pub fn entropy_of(&self, batch: Tensor<B, 4>) -> DcnResult<f64> {
        let quantized = self.forward_latent(batch, &self.evaluation_mode())?;
        Ok(quantized.entropy.into_scalar().elem::<f64>())
    }

    /// Codebook for deployment; see [`dcn_core::effective_codebook`]
    pub fn get_codebook(
        &self,
        bit_depth: Option<BitDepth>,
        use_canonical: Option<bool>,
    ) -> DcnResult<Codebook> {
        self.bottleneck.effective_codebook(bit_depth, use_canonical)
    }

    pub fn compression_stats(
        &self,
        patch_size: Option<usize>,
        bytes_per_feature: Option<f64>,
    ) -> DcnResult<CompressionStats> {
        self.config()
            .compression_stats(self.n_latent(), patch_size, bytes_per_feature)
    }

    pub fn model_code(&self) -> String {
        self.config().model_code(
            self.network.name(),
            self.n_latent(),
            &self.network.latent_shape(),
            &self.network.layer_summary(),
        )
    }

    pub(crate) fn check_input(&self, batch: &Tensor<B, 4>) -> DcnResult<()> {
        let [n, h, w, c] = batch.dims();
        let expected = self.network.input_shape();
        if n == 0 || [h, w, c] != expected {
            return Err(DcnError::shape(format!(
                "expected input [batch, {}, {}, {}], got [{}, {}, {}, {}]",
                expected[0], expected[1], expected[2], n, h, w, c
            )));
        }
        Ok(())
    }
}
