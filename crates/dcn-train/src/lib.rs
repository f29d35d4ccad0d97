//! Burn side of the compression codec: bottleneck, loss and training steps

pub mod bottleneck;
pub mod codec;
pub mod context;
pub mod entropy;
pub mod images;
pub mod loss;
pub mod network;
pub mod trainer;


pub use bottleneck::{EntropyBottleneck, QuantizedLatent};
pub use codec::Codec;
pub use context::ExecutionContext;
pub use images::{load_patch, synthetic_patches, tensor_to_image};
pub use loss::{LossComponents, RateDistortionLoss};
pub use network::{Capabilities, CompressionNetwork, DenseAutoencoder, DenseConfig, ForwardMode};
pub use trainer::{adam_trainer, MetricSeries, Phase, PerformanceStats, StepMetrics, Trainer};
