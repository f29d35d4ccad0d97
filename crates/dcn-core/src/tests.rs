use crate::codebook::*;
use crate::entropy::*;
use crate::kernel::*;
use crate::quantizer::*;
use crate::rounding::*;
use crate::stats::*;
use crate::study::*;
use crate::synthetic::*;

use approx::{assert_abs_diff_eq, assert_relative_eq};
use ndarray::Axis;

fn gaussian_estimator(sigma: f64) -> EntropyEstimator {
    let quantizer = SoftQuantizer::new(Kernel::Gaussian { sigma }).unwrap();
    EntropyEstimator::new(quantizer, EntropyConfig::default()).unwrap()
}

#[test]
fn test_values_on_levels_quantize_exactly() {
    let levels = canonical_levels(BitDepth::new(4).unwrap());
    for kernel in [Kernel::Gaussian { sigma: 5.0 }, Kernel::StudentT { sigma: 5.0, dof: 25.0 }] {
        let quantizer = SoftQuantizer::new(kernel).unwrap();
        let q = quantizer.quantize(&levels, &levels).unwrap();

        assert_eq!(q.hard, levels, "hard output differs for {}", kernel);
        for (i, row) in q.weights.axis_iter(Axis(0)).enumerate() {
            assert_eq!(argmax(row), i);
            assert!(row.iter().all(|&w| w <= row[i]));
        }
    }
}

#[test]
fn test_weight_rows_sum_to_one() {
    let levels = canonical_levels(BitDepth::new(3).unwrap());
    let values = Distribution::Gaussian.sample_seeded(5000, 6.0, 11).unwrap();

    for kernel in [
        Kernel::Gaussian { sigma: 5.0 },
        Kernel::Gaussian { sigma: 50.0 },
        Kernel::StudentT { sigma: 5.0, dof: 1.0 },
    ] {
        let weights = SoftQuantizer::new(kernel).unwrap().weights(&values, &levels).unwrap();
        assert_eq!(weights.ncols(), levels.len());
        for row in weights.axis_iter(Axis(0)) {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-6);
            assert!(row.iter().all(|&w| w > 0.0));
        }
    }
}

const SIGMAS: [f64; 4] = [5.0, 10.0, 25.0, 50.0];

#[test]
fn test_entropy_error_shrinks_with_sharpness() {
    // Single draws carry a sign-changing bias of about 5e-4 at high sigma, so
    // the trend is measured on the mean over 40 seeded Laplace(2) samples.
    let levels = integer_levels(5);
    let estimators: Vec<EntropyEstimator> = SIGMAS.iter().map(|&s| gaussian_estimator(s)).collect();
    let seeds = 0..40u64;

    let mut entropy_error = [0.0; 4];
    let mut histogram_error = [0.0; 4];
    for seed in seeds.clone() {
        let values = Distribution::Laplace.sample_seeded(10_000, 2.0, seed).unwrap();
        let real = Histogram::hard(&values, &levels).unwrap();

        for (i, estimator) in estimators.iter().enumerate() {
            entropy_error[i] += estimate_errors(&values, &levels, estimator).unwrap().error;
            let soft = estimator.histogram(&values, &levels).unwrap();
            histogram_error[i] += soft.mean_abs_error(&real).unwrap();
        }
    }

    let n = seeds.count() as f64;
    entropy_error.iter_mut().for_each(|e| *e /= n);
    histogram_error.iter_mut().for_each(|e| *e /= n);

    for pair in entropy_error.windows(2) {
        assert!(pair[1] < pair[0], "mean entropy error not decreasing: {:?}", entropy_error);
    }
    for pair in histogram_error.windows(2) {
        assert!(pair[1] < pair[0], "mean histogram error not decreasing: {:?}", histogram_error);
    }

    for (got, want) in entropy_error.iter().zip([4.27e-3, 1.12e-3, 4.89e-4, 3.60e-4]) {
        assert_relative_eq!(*got, want, max_relative = 0.05);
    }
}

#[test]
fn test_sharp_kernel_beats_blunt_kernel() {
    let values = Distribution::Laplace.sample_seeded(10_000, 2.0, 1234).unwrap();
    let levels = integer_levels(5);

    let blunt = estimate_errors(&values, &levels, &gaussian_estimator(5.0)).unwrap();
    let sharp = estimate_errors(&values, &levels, &gaussian_estimator(50.0)).unwrap();
    assert!(sharp.error < blunt.error);
}

#[test]
fn test_histogram_of_degenerate_batches() {
    let levels = canonical_levels(BitDepth::new(4).unwrap());
    let estimator = gaussian_estimator(5.0);

    for batch in [vec![0.0; 256], vec![2.75; 256], vec![-300.0; 16]] {
        let histogram = estimator.histogram(&batch, &levels).unwrap();
        assert_abs_diff_eq!(histogram.total(), 1.0, epsilon = 1e-6);
        let entropy = histogram.entropy(LogBase::Two);
        assert!(entropy.is_finite() && entropy >= 0.0);
    }
}

#[test]
fn test_soft_histogram_converges_to_hard() {
    let values = Distribution::Laplace.sample_seeded(4000, 1.5, 5).unwrap();
    let levels = integer_levels(5);
    let real = Histogram::hard(&values, &levels).unwrap();

    let blunt = gaussian_estimator(5.0).histogram(&values, &levels).unwrap();
    let sharp = gaussian_estimator(50.0).histogram(&values, &levels).unwrap();
    assert!(sharp.mean_abs_error(&real).unwrap() < blunt.mean_abs_error(&real).unwrap());
}

#[test]
fn test_reference_compression_stats() {
    let stats = CompressionStats::compute(128, 8192, 0.5).unwrap();
    assert_abs_diff_eq!(stats.bpp, 2.0);
    assert_abs_diff_eq!(stats.bytes, 4096.0);
    assert_abs_diff_eq!(stats.rate, 12.0);
}

#[test]
fn test_effective_codebook_ignores_drift_for_identity() {
    let bpf = BitDepth::new(4).unwrap();
    let mut drifted = canonical_levels(bpf);
    for (i, level) in drifted.iter_mut().enumerate() {
        *level += 0.01 * i as f64;
    }
    let trained = Codebook::from_levels(drifted.clone(), CodebookKind::Trainable).unwrap();

    let identity = effective_codebook(RoundingMode::Identity, &trained, bpf, None, None);
    let expected: Vec<f64> = (-7..=8).map(f64::from).collect();
    assert_eq!(identity.levels(), expected.as_slice());

    let soft_codebook = effective_codebook(RoundingMode::SoftCodebook, &trained, bpf, None, None);
    assert_eq!(soft_codebook.levels(), drifted.as_slice());
}

#[test]
fn test_identity_rounding_matches_hard_quantization() {
    // Away from half-integers every path picks the same level
    let bpf = BitDepth::new(3).unwrap();
    let levels = canonical_levels(bpf);
    let values = [-9.2, -2.6, -0.4, 0.3, 1.7, 3.9, 12.0];

    let q = SoftQuantizer::new(Kernel::Gaussian { sigma: 25.0 })
        .unwrap()
        .quantize(&values, &levels)
        .unwrap();
    for (x, hard) in values.iter().zip(&q.hard) {
        assert_eq!(round_identity(*x, bpf), *hard);
    }
}

#[test]
fn test_half_integer_ties() {
    let bpf = BitDepth::new(3).unwrap();
    let levels = canonical_levels(bpf);
    let values = [-1.5, 0.5, 1.5, 2.5];

    // Reference counts round half to even, like identity rounding
    let identity: Vec<f64> = values.iter().map(|&x| round_identity(x, bpf)).collect();
    assert_eq!(identity, vec![-2.0, 0.0, 2.0, 2.0]);
    let nearest: Vec<f64> = values.iter().map(|&x| levels[nearest_level(&levels, x)]).collect();
    assert_eq!(nearest, identity);

    // Equal kernel weights resolve to the first (lower) level
    let q = SoftQuantizer::new(Kernel::Gaussian { sigma: 25.0 })
        .unwrap()
        .quantize(&values, &levels)
        .unwrap();
    assert_eq!(q.hard, vec![-2.0, 0.0, 1.0, 2.0]);
}
