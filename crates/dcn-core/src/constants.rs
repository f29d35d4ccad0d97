/// Smallest supported bit depth of a latent feature
pub const MIN_LATENT_BPF: u8 = 1;

/// Largest supported bit depth of a latent feature
pub const MAX_LATENT_BPF: u8 = 8;

/// Default bit depth of a latent feature
pub const DEFAULT_LATENT_BPF: u8 = 4;

/// Default kernel sharpness used by the entropy estimator
pub const DEFAULT_SIGMA: f64 = 5.0;

/// Default degrees of freedom of the Student-t kernel (<= 0 selects the Gaussian kernel)
pub const DEFAULT_DOF: f64 = 25.0;

/// Additive floor applied to raw kernel weights before row normalization
pub const WEIGHT_EPSILON: f64 = 1e-72;

/// Histogram floor used by the compression model
pub const HISTOGRAM_FLOOR: f64 = 1e-9;

/// Histogram floor used by the coarser estimator variant
pub const HISTOGRAM_FLOOR_COARSE: f64 = 1e-6;

/// Channels of an uncompressed RGB bitmap
pub const RGB_CHANNELS: usize = 3;
