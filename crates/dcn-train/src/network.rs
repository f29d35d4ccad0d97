//! Analysis/synthesis networks around the bottleneck
//!
//! Concrete topologies live outside this crate; they plug in through
//! [`CompressionNetwork`]. [`DenseAutoencoder`] is a small fully connected
//! reference used by the CLI and the tests.

use burn::module::{Ignored, Module, Param};
use burn::nn;
use burn::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use dcn_core::constants::RGB_CHANNELS;
use dcn_core::{DcnError, DcnResult};

use crate::context::ExecutionContext;

/// What a network reacts to, resolved once at construction
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Honors `ForwardMode::keep_prob`
    pub has_dropout: bool,
    /// Honors `ForwardMode::is_training` (batch-norm style layers)
    pub has_batchnorm_flag: bool,
}

/// Per-call switches for the forward pass
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ForwardMode {
    pub is_training: bool,
    /// Dropout keep probability, 1 disables dropout
    pub keep_prob: f64,
    /// Seed of the dropout mask
    pub seed: u64,
}

impl ForwardMode {
    pub fn inference() -> Self {
        Self {
            is_training: false,
            keep_prob: 1.0,
            seed: 0,
        }
    }

    pub fn training(keep_prob: f64, seed: u64) -> Self {
        Self {
            is_training: true,
            keep_prob,
            seed,
        }
    }

    /// Deterministic evaluation, optionally with training-mode normalization
    pub fn evaluation(is_training: bool) -> Self {
        Self {
            is_training,
            ..Self::inference()
        }
    }
}

/// Encoder/decoder pair feeding and consuming the bottleneck
pub trait CompressionNetwork<B: Backend>: Module<B> {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    /// `[height, width, channels]` of one input patch
    fn input_shape(&self) -> [usize; 3];

    /// Shape of one latent sample, without the batch dimension
    fn latent_shape(&self) -> Vec<usize>;

    fn n_latent(&self) -> usize {
        self.latent_shape().iter().product()
    }

    /// Layer part of the model code, e.g. `2F+D`
    fn layer_summary(&self) -> String {
        String::new()
    }

    /// `[batch, h, w, c]` in `[0, 1]` to `[batch, n_latent]`
    fn analysis(&self, x: Tensor<B, 4>, mode: &ForwardMode) -> Tensor<B, 2>;

    /// `[batch, n_latent]` to `[batch, h, w, c]` (unclipped)
    fn synthesis(&self, z: Tensor<B, 2>, mode: &ForwardMode) -> Tensor<B, 4>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DenseConfig {
    pub patch_size: usize,
    pub hidden: usize,
    pub n_latent: usize,
    pub dropout: bool,
    /// All weights start at zero; the output is then input independent
    pub zero_init: bool,
}

impl Default for DenseConfig {
    fn default() -> Self {
        Self {
            patch_size: 16,
            hidden: 256,
            n_latent: 64,
            dropout: false,
            zero_init: false,
        }
    }
}

impl DenseConfig {
    pub fn validate(&self) -> DcnResult<()> {
        if self.patch_size == 0 || self.hidden == 0 || self.n_latent == 0 {
            return Err(DcnError::config(format!(
                "dense autoencoder sizes must be positive: {:?}",
                self
            )));
        }
        Ok(())
    }

    pub fn init<B: Backend>(
        &self,
        context: &ExecutionContext<B>,
    ) -> DcnResult<DenseAutoencoder<B>> {
        self.validate()?;

        let n_input = self.patch_size * self.patch_size * RGB_CHANNELS;
        let mut rng = context.rng(0);
        let device = &context.device;

        tracing::debug!(
            "Dense autoencoder {} -> {} -> {} (dropout: {}, zero init: {})",
            n_input,
            self.hidden,
            self.n_latent,
            self.dropout,
            self.zero_init
        );

        let zero = self.zero_init;
        Ok(DenseAutoencoder {
            encoder_hidden: seeded_linear(n_input, self.hidden, zero, &mut rng, device),
            encoder_out: seeded_linear(self.hidden, self.n_latent, zero, &mut rng, device),
            decoder_hidden: seeded_linear(self.n_latent, self.hidden, zero, &mut rng, device),
            decoder_out: seeded_linear(self.hidden, n_input, zero, &mut rng, device),
            shape: Ignored(*self),
        })
    }
}

#[derive(Module, Debug)]
pub struct DenseAutoencoder<B: Backend> {
    encoder_hidden: nn::Linear<B>,
    encoder_out: nn::Linear<B>,
    decoder_hidden: nn::Linear<B>,
    decoder_out: nn::Linear<B>,
    shape: Ignored<DenseConfig>,
}

impl<B: Backend> DenseAutoencoder<B> {
    fn dropout(&self, h: Tensor<B, 2>, mode: &ForwardMode) -> Tensor<B, 2> {
        if !self.shape.dropout || !mode.is_training || mode.keep_prob >= 1.0 {
            return h;
        }

        let [rows, cols] = h.dims();
        let keep = mode.keep_prob.clamp(f64::EPSILON, 1.0);
        let mut rng = StdRng::seed_from_u64(mode.seed);
        let mask: Vec<f32> = (0..rows * cols)
            .map(|_| if rng.gen_bool(keep) { (1.0 / keep) as f32 } else { 0.0 })
            .collect();
        let mask = Tensor::<B, 1>::from_floats(mask.as_slice(), &h.device()).reshape([rows, cols]);

        h * mask
    }
}

impl<B: Backend> CompressionNetwork<B> for DenseAutoencoder<B> {
    fn name(&self) -> &'static str {
        "DenseAutoencoder"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            has_dropout: self.shape.dropout,
            has_batchnorm_flag: false,
        }
    }

    fn input_shape(&self) -> [usize; 3] {
        [self.shape.patch_size, self.shape.patch_size, RGB_CHANNELS]
    }

    fn latent_shape(&self) -> Vec<usize> {
        vec![self.shape.n_latent]
    }

    fn layer_summary(&self) -> String {
        if self.shape.dropout {
            "2F+D".to_string()
        } else {
            "2F".to_string()
        }
    }

    fn analysis(&self, x: Tensor<B, 4>, mode: &ForwardMode) -> Tensor<B, 2> {
        let [batch, h, w, c] = x.dims();
        let x = x.reshape([batch, h * w * c]);

        let hidden = burn::tensor::activation::relu(self.encoder_hidden.forward(x));
        let hidden = self.dropout(hidden, mode);
        self.encoder_out.forward(hidden)
    }

    fn synthesis(&self, z: Tensor<B, 2>, mode: &ForwardMode) -> Tensor<B, 4> {
        let batch = z.dims()[0];
        let [h, w, c] = self.input_shape();

        let hidden = burn::tensor::activation::relu(self.decoder_hidden.forward(z));
        let hidden = self.dropout(hidden, mode);
        self.decoder_out.forward(hidden).reshape([batch, h, w, c])
    }
}

/// Linear layer initialized from a host RNG, uniform in `±1/√fan_in`
fn seeded_linear<B: Backend>(
    d_input: usize,
    d_output: usize,
    zero: bool,
    rng: &mut StdRng,
    device: &B::Device,
) -> nn::Linear<B> {
    let bound = 1.0 / (d_input as f64).sqrt();
    let weights: Vec<f32> = (0..d_input * d_output)
        .map(|_| if zero { 0.0 } else { rng.gen_range(-bound..bound) as f32 })
        .collect();

    nn::Linear {
        weight: Param::from_tensor(
            Tensor::<B, 1>::from_floats(weights.as_slice(), device).reshape([d_input, d_output]),
        ),
        bias: Some(Param::from_tensor(Tensor::<B, 1>::zeros([d_output], device))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type B = NdArray;

    fn context(seed: u64) -> ExecutionContext<B> {
        ExecutionContext::new(Default::default(), seed)
    }

    #[test]
    fn test_shapes() {
        let config = DenseConfig {
            patch_size: 4,
            hidden: 8,
            n_latent: 6,
            ..DenseConfig::default()
        };
        let net = config.init(&context(1)).unwrap();
        let x = Tensor::<B, 4>::zeros([2, 4, 4, 3], &Default::default());

        let z = net.analysis(x, &ForwardMode::inference());
        assert_eq!(z.dims(), [2, 6]);
        let y = net.synthesis(z, &ForwardMode::inference());
        assert_eq!(y.dims(), [2, 4, 4, 3]);
        assert_eq!(net.n_latent(), 6);
    }

    #[test]
    fn test_seeded_init_is_reproducible() {
        let config = DenseConfig {
            patch_size: 2,
            hidden: 4,
            n_latent: 3,
            ..DenseConfig::default()
        };
        let a = config.init(&context(9)).unwrap();
        let b = config.init(&context(9)).unwrap();
        let x = Tensor::<B, 4>::ones([1, 2, 2, 3], &Default::default());

        let mode = ForwardMode::inference();
        let za: Vec<f32> = a.analysis(x.clone(), &mode).into_data().iter::<f32>().collect();
        let zb: Vec<f32> = b.analysis(x, &mode).into_data().iter::<f32>().collect();
        assert_eq!(za, zb);
    }

    #[test]
    fn test_capabilities_follow_config() {
        let plain = DenseConfig::default().init::<B>(&context(0)).unwrap();
        assert_eq!(plain.capabilities(), Capabilities::default());
        assert_eq!(plain.layer_summary(), "2F");

        let dropout = DenseConfig {
            dropout: true,
            ..DenseConfig::default()
        }
        .init::<B>(&context(0))
        .unwrap();
        assert!(dropout.capabilities().has_dropout);
        assert!(!dropout.capabilities().has_batchnorm_flag);
    }

    #[test]
    fn test_dropout_only_in_training() {
        let config = DenseConfig {
            patch_size: 2,
            hidden: 32,
            n_latent: 4,
            dropout: true,
            zero_init: false,
        };
        let net = config.init(&context(3)).unwrap();
        let h = Tensor::<B, 2>::ones([1, 32], &Default::default());

        let kept = net.dropout(h.clone(), &ForwardMode::inference());
        let kept: Vec<f32> = kept.into_data().iter::<f32>().collect();
        assert!(kept.iter().all(|&v| v == 1.0));

        let dropped = net.dropout(h, &ForwardMode::training(0.5, 7));
        let dropped: Vec<f32> = dropped.into_data().iter::<f32>().collect();
        assert!(dropped.iter().any(|&v| v == 0.0));
        assert!(dropped.iter().all(|&v| v == 0.0 || (v - 2.0).abs() < 1e-6));
    }

    #[test]
    fn test_invalid_config() {
        let config = DenseConfig {
            n_latent: 0,
            ..DenseConfig::default()
        };
        assert!(config.init::<B>(&context(0)).is_err());
    }
}
