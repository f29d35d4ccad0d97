//! Explicit execution context
//!
//! Device and seed travel with every codec instead of living in a global
//! session, so two codecs built from the same context behave identically.

use burn::prelude::*;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[derive(Clone, Debug)]
pub struct ExecutionContext<B: Backend> {
    pub device: B::Device,
    pub seed: u64,
}

impl<B: Backend> ExecutionContext<B> {
    pub fn new(device: B::Device, seed: u64) -> Self {
        Self { device, seed }
    }

    /// Independent random stream derived from the seed
    pub fn rng(&self, stream: u64) -> StdRng {
        StdRng::seed_from_u64(self.seed ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15))
    }
}

impl<B: Backend> Default for ExecutionContext<B> {
    fn default() -> Self {
        Self::new(B::Device::default(), dcn_core::CodecConfig::default().seed)
    }
}
