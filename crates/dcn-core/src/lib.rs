//! Backend-free numerics of the differentiable entropy bottleneck

pub mod codebook;
pub mod config;
pub mod constants;
pub mod entropy;
pub mod error;
pub mod kernel;
pub mod quantizer;
pub mod rounding;
pub mod stats;
pub mod study;
pub mod synthetic;

#[cfg(test)]
mod tests;

pub use codebook::{canonical_levels, BitDepth, Codebook, CodebookKind};
pub use config::{CodecConfig, DistortionMetric, KernelConfig};
pub use entropy::{hard_entropy, EntropyConfig, EntropyEstimator, Histogram, LogBase};
pub use error::{DcnError, DcnResult};
pub use kernel::Kernel;
pub use quantizer::{Quantization, SoftQuantizer};
pub use rounding::{effective_codebook, RoundingMode};
pub use stats::{compression_stats, CompressionStats};
