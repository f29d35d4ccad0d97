use anyhow::{bail, Result};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};

use dcn_core::study::{compare, kernel_grid, scale_sweep, SweepConfig};
use dcn_core::synthetic::{integer_levels, Distribution};
use dcn_core::{
    effective_codebook, BitDepth, Codebook, CodebookKind, CodecConfig, CompressionStats,
    EntropyConfig, EntropyEstimator, Kernel, LogBase, RoundingMode, SoftQuantizer,
};
use dcn_train::{
    adam_trainer, load_patch, synthetic_patches, tensor_to_image, Codec, DenseAutoencoder,
    DenseConfig, ExecutionContext,
};

type Backend = Autodiff<NdArray>;

#[derive(Parser)]
#[command(name = "dcn")]
#[command(about = "Differentiable entropy bottleneck tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compression rate, bpp and size for a latent geometry
    Stats {
        #[arg(long, default_value = "128")]
        patch: usize,
        #[arg(long, default_value = "8192")]
        n_latent: usize,
        #[arg(long, default_value = "4")]
        bpf: u8,
    },

    /// Codebook reported for deployment under a rounding policy
    Codebook {
        /// Model bit depth (default: from --levels, the config, or 4)
        #[arg(long)]
        bpf: Option<u8>,
        /// identity, soft, soft-codebook or sin (default: from the config, or soft)
        #[arg(long)]
        rounding: Option<String>,
        /// Trained levels, e.g. `-0.9,0.1,1.2,1.8`
        #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
        levels: Vec<f64>,
        /// Codec configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Force (true) or refuse (false) the canonical integer codebook
        #[arg(long)]
        canonical: Option<bool>,
    },

    /// Soft vs standard quantization for a single synthetic sample
    Report {
        #[arg(long, default_value = "laplace")]
        distribution: String,
        #[arg(long, default_value = "2.0")]
        scale: f64,
        #[arg(long, default_value = "10000")]
        samples: usize,
        #[command(flatten)]
        kernel: KernelArgs,
        #[arg(long, default_value = "5")]
        c_max: i32,
        #[arg(long, default_value = "1234")]
        seed: u64,
    },

    /// Entropy estimation error over a range of distribution scales
    EntropySweep {
        #[arg(long, default_value = "laplace")]
        distribution: String,
        #[command(flatten)]
        kernel: KernelArgs,
        #[command(flatten)]
        sweep: SweepArgs,
        /// Write the sweep points as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Mean relative entropy error for every (dof, sigma) pair
    KernelGrid {
        /// Degrees of freedom; 0 selects the Gaussian kernel
        #[arg(long, value_delimiter = ',', default_value = "0,5,10,25,50,100")]
        dofs: Vec<f64>,
        #[arg(long, value_delimiter = ',', default_value = "5,10,25,50")]
        sigmas: Vec<f64>,
        #[arg(long, default_value = "laplace")]
        distribution: String,
        #[command(flatten)]
        sweep: SweepArgs,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Train the dense reference autoencoder on synthetic patches
    TrainToy {
        #[arg(long, default_value = "200")]
        steps: usize,
        #[arg(long, default_value = "8")]
        batch: usize,
        #[command(flatten)]
        train: TrainArgs,
    },

    /// Compress and decompress the centered patch of an image
    Roundtrip {
        #[arg(short, long)]
        image: PathBuf,
        /// Training steps on the patch itself before coding it
        #[arg(long, default_value = "100")]
        steps: usize,
        /// Write the reconstruction as PNG
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        train: TrainArgs,
    },
}

#[derive(Args, Clone, Copy)]
struct KernelArgs {
    #[arg(long, default_value = "5")]
    sigma: f64,
    /// Student-t degrees of freedom; 0 selects the Gaussian kernel
    #[arg(long, default_value = "0")]
    dof: f64,
}

impl KernelArgs {
    fn kernel(self) -> Result<Kernel> {
        let kernel = Kernel::from_params(self.sigma, self.dof);
        kernel.validate()?;
        Ok(kernel)
    }
}

#[derive(Args, Clone, Copy)]
struct SweepArgs {
    #[arg(long, default_value = "500")]
    scales: usize,
    #[arg(long, default_value = "1000")]
    samples: usize,
    #[arg(long, default_value = "0.01")]
    min_scale: f64,
    #[arg(long, default_value = "10.0")]
    max_scale: f64,
    #[arg(long, default_value = "1234")]
    seed: u64,
}

impl SweepArgs {
    fn config(self, distribution: &str) -> Result<SweepConfig> {
        let config = SweepConfig {
            distribution: distribution.parse()?,
            min_scale: self.min_scale,
            max_scale: self.max_scale,
            n_scales: self.scales,
            n_samples: self.samples,
            seed: self.seed,
            ..SweepConfig::default()
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Args, Clone)]
struct TrainArgs {
    #[arg(long, default_value = "16")]
    patch: usize,
    #[arg(long, default_value = "256")]
    hidden: usize,
    #[arg(long, default_value = "64")]
    n_latent: usize,
    #[arg(long, default_value = "0.001")]
    lr: f64,
    /// Omit to train on distortion only
    #[arg(long)]
    entropy_weight: Option<f64>,
    /// Codec configuration (JSON); command line values override it
    #[arg(long)]
    config: Option<PathBuf>,
}

impl TrainArgs {
    fn codec_config(&self) -> Result<CodecConfig> {
        let mut config = match &self.config {
            Some(path) => CodecConfig::load(path)?,
            None => CodecConfig::default(),
        };
        if self.entropy_weight.is_some() {
            config.entropy_weight = self.entropy_weight;
        }
        config.patch_size = Some(self.patch);
        config.validate()?;
        Ok(config)
    }

    fn build<B: AutodiffBackend>(
        &self,
        device: B::Device,
    ) -> Result<Codec<B, DenseAutoencoder<B>>> {
        let config = self.codec_config()?;
        let context = ExecutionContext::<B>::new(device, config.seed);
        let network = DenseConfig {
            patch_size: self.patch,
            hidden: self.hidden,
            n_latent: self.n_latent,
            ..DenseConfig::default()
        }
        .init(&context)?;

        let codec = Codec::new(network, &config, context)?;
        println!("Model: {}", codec.model_code());
        println!("{}", codec.compression_stats(None, None)?);
        Ok(codec)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Stats { patch, n_latent, bpf } => {
            let bpf = BitDepth::new(bpf)?;
            let stats = CompressionStats::compute(patch, n_latent, bpf.bytes_per_feature())?;

            println!("Patch:      {}x{} px", patch, patch);
            println!("Latent:     {} features @ {}", n_latent, bpf);
            println!("Rate:       {:.4}", stats.rate);
            println!("Bits/pixel: {:.4}", stats.bpp);
            println!("Size:       {:.0} bytes ({:.0} raw)", stats.bytes, stats.raw_bytes());
        }

        Commands::Codebook { bpf, rounding, levels, config, canonical } => {
            let config = match config {
                Some(path) => CodecConfig::load(&path)?,
                None => CodecConfig::default(),
            };
            let rounding = match rounding {
                Some(rounding) => rounding.parse::<RoundingMode>()?,
                None => config.rounding,
            };
            let codebook = resolve_codebook(&config, rounding, bpf, levels, canonical)?;

            println!("Rounding: {}", rounding);
            println!("Kind:     {}", codebook.kind());
            println!("Levels:   {:?}", codebook.levels());
        }

        Commands::Report { distribution, scale, samples, kernel, c_max, seed } => {
            let distribution: Distribution = distribution.parse()?;
            let values = distribution.sample_seeded(samples, scale, seed)?;
            let estimator = EntropyEstimator::new(
                SoftQuantizer::new(kernel.kernel()?)?,
                EntropyConfig {
                    log_base: LogBase::Two,
                    ..EntropyConfig::default()
                },
            )?;

            let report = compare(&values, &integer_levels(c_max), &estimator)?;
            println!("{} ({:.2}), {} samples", distribution, scale, samples);
            println!("{}", report);
        }

        Commands::EntropySweep { distribution, kernel, sweep, output } => {
            let config = sweep.config(&distribution)?;
            let kernel = kernel.kernel()?;
            let points = scale_sweep(&config, kernel)?;

            let n = points.len() as f64;
            let mean_error = points.iter().map(|p| p.errors.error).sum::<f64>() / n;
            let mean_relative = points.iter().map(|p| p.errors.relative()).sum::<f64>() / n;
            let worst = points
                .iter()
                .max_by(|a, b| a.errors.relative().total_cmp(&b.errors.relative()));

            println!("Kernel:           {}", kernel);
            println!(
                "Scales:           {} ({:.2} - {:.2})",
                points.len(),
                config.min_scale,
                config.max_scale
            );
            println!("Mean abs error:   {:.4} bits", mean_error);
            println!("Mean rel. error:  {:.3}%", mean_relative);
            if let Some(p) = worst {
                println!("Worst:            {:.3}% at scale {:.3}", p.errors.relative(), p.scale);
            }

            if let Some(path) = output {
                write_json(&path, &points)?;
            }
        }

        Commands::KernelGrid { dofs, sigmas, distribution, sweep, output } => {
            if dofs.is_empty() || sigmas.is_empty() {
                bail!("kernel grid needs at least one dof and one sigma");
            }
            let config = sweep.config(&distribution)?;
            let cells = kernel_grid(&config, &dofs, &sigmas)?;

            println!("{:<28} {:>12} {:>12}", "kernel", "abs [bits]", "rel [%]");
            for cell in &cells {
                println!(
                    "{:<28} {:>12.4} {:>12.3}",
                    cell.kernel.to_string(),
                    cell.mean_abs_error,
                    cell.mean_relative_error
                );
            }

            if let Some(best) = cells
                .iter()
                .min_by(|a, b| a.mean_relative_error.total_cmp(&b.mean_relative_error))
            {
                println!("\nBest: {} ({:.3}%)", best.kernel, best.mean_relative_error);
            }

            if let Some(path) = output {
                write_json(&path, &cells)?;
            }
        }

        // The bottleneck evaluates its kernels in f64, so training runs on the
        // CPU backend.
        Commands::TrainToy { steps, batch, train } => {
            train_toy::<Backend>(Default::default(), steps, batch, &train)?
        }

        Commands::Roundtrip { image, steps, output, train } => {
            roundtrip::<Backend>(Default::default(), &image, steps, output.as_deref(), &train)?
        }
    }

    Ok(())
}

fn train_toy<B: AutodiffBackend>(
    device: B::Device,
    steps: usize,
    batch: usize,
    args: &TrainArgs,
) -> Result<()> {
    if batch == 0 {
        bail!("batch size must be positive");
    }
    let codec = args.build::<B>(device)?;
    let validation = synthetic_patches(codec.context(), batch, args.patch, u64::MAX);
    let entropy_weight = codec.config().entropy_weight;
    let mut trainer = adam_trainer(codec);

    let pb = ProgressBar::new(steps as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed}] [{bar:30}] {pos}/{len} {msg}")?,
    );

    for step in 0..steps {
        let inputs = synthetic_patches(trainer.codec().context(), batch, args.patch, step as u64);
        let metrics = trainer.training_step(inputs, args.lr, entropy_weight)?;

        if step % 10 == 0 {
            pb.set_message(format!(
                "loss={:.4} ssim={:.3} H={:.3}",
                metrics.loss, metrics.ssim, metrics.entropy
            ));
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    let last = trainer.validation_step(validation.clone())?;
    let performance = trainer.performance();
    if let (Some(first), Some(final_train)) = (
        performance.training.loss.first(),
        performance.training.last(),
    ) {
        tracing::info!("Training loss: {:.4} -> {:.4}", first, final_train.loss);
    }

    let codec = trainer.into_codec();
    println!(
        "Validation: loss={:.4} ssim={:.4} entropy={:.3} bits",
        last.loss, last.ssim, last.entropy
    );
    println!("Histogram:  {:?}", rounded(&codec.histogram(validation)?));
    println!("Codebook:   {:?}", codec.get_codebook(None, None)?.levels());
    Ok(())
}

fn roundtrip<B: AutodiffBackend>(
    device: B::Device,
    image: &Path,
    steps: usize,
    output: Option<&Path>,
    args: &TrainArgs,
) -> Result<()> {
    let codec = args.build::<B>(device)?;
    let patch: Tensor<B, 4> = load_patch(image, args.patch, &codec.context().device)?;
    let entropy_weight = codec.config().entropy_weight;
    let mut trainer = adam_trainer(codec);

    let pb = ProgressBar::new(steps as u64);
    for _ in 0..steps {
        let metrics = trainer.training_step(patch.clone(), args.lr, entropy_weight)?;
        pb.set_message(format!("loss={:.4}", metrics.loss));
        pb.inc(1);
    }
    pb.finish_and_clear();

    let codec = trainer.into_codec();
    let latent = codec.compress(patch.clone())?;
    let reconstruction = codec.decompress(latent)?;

    let diff = (patch.clone() - reconstruction.clone()).powf_scalar(2.0).mean();
    let mse = diff.into_scalar().elem::<f64>();
    let psnr = if mse > 0.0 { -10.0 * mse.log10() } else { f64::INFINITY };
    println!("PSNR:    {:.2} dB", psnr);
    println!("Entropy: {:.3} bits/feature", codec.entropy_of(patch)?);

    if let Some(path) = output {
        tensor_to_image(reconstruction)?.save(path)?;
        println!("Wrote {}", path.display());
    }
    Ok(())
}

/// Codebook reported under `rounding`; `levels` stand in for a trained codebook
fn resolve_codebook(
    config: &CodecConfig,
    rounding: RoundingMode,
    bpf: Option<u8>,
    levels: Vec<f64>,
    canonical: Option<bool>,
) -> Result<Codebook> {
    let trained = if levels.is_empty() {
        let bpf = bpf.map(BitDepth::new).transpose()?.unwrap_or(config.latent_bpf);
        Codebook::new(bpf, CodebookKind::Trainable)
    } else {
        Codebook::from_levels(levels, CodebookKind::Trainable)?
    };
    let model_bpf = match bpf {
        Some(bits) => BitDepth::new(bits)?,
        None => trained.bit_depth(),
    };

    Ok(effective_codebook(rounding, &trained, model_bpf, None, canonical))
}

fn rounded(values: &[f64]) -> Vec<f64> {
    values.iter().map(|v| (v * 1e4).round() / 1e4).collect()
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(value)?)?;
    println!("Wrote {}", path.display());
    Ok(())
}
