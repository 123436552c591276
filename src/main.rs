mod model;
mod observer;
mod utils;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use burn::config::Config;
use burn::data::dataset::Dataset;
use burn::module::Module;
use burn::record::CompactRecorder;
use burn::tensor::backend::AutodiffBackend;
use clap::{Args, Parser, Subcommand};
use rand::SeedableRng;
use rand::rngs::StdRng;

use model::architecture::{DiscriminatorModelConfig, GeneratorModelConfig};
use model::constants::DOG_LABEL;
use model::data::CifarDataset;
use model::training::{TrainingConfig, fit};
use observer::{NoopObserver, ProgressObserver};
use utils::GridShape;

#[cfg(feature = "cuda")]
type MyBackend = burn::backend::Cuda<f32, i32>;
#[cfg(not(feature = "cuda"))]
type MyBackend = burn::backend::NdArray<f32>;
type MyAutodiffBackend = burn::backend::Autodiff<MyBackend>;

/// Train a DCGAN generator on one CIFAR-10 class.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train with default hyperparameters and save the generator to ./generator.mpk
    Minimal {
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Train with explicit hyperparameters, printing progress and writing sample grids
    Observed {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        options: ObservedArgs,
    },
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Directory holding the CIFAR-10 binary batches (data_batch_1.bin ...)
    #[arg(long, default_value = "data/cifar-10-batches-bin")]
    data_dir: PathBuf,
    /// CIFAR-10 class to keep
    #[arg(long, default_value_t = DOG_LABEL)]
    label: u8,
    /// Train on every image in this folder instead of CIFAR-10
    #[arg(long)]
    image_folder: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ObservedArgs {
    /// Directory for sample grids, checkpoints and the trained generator
    #[arg(long, default_value = "./temp")]
    working_dir: PathBuf,
    #[arg(long, default_value_t = 25)]
    epochs: usize,
    #[arg(long, default_value_t = 64)]
    batch_size: usize,
    /// Rows of the sample grid
    #[arg(long, default_value_t = 8, value_parser = grid_dim)]
    rows: usize,
    /// Columns of the sample grid
    #[arg(long, default_value_t = 8, value_parser = grid_dim)]
    cols: usize,
    /// Load the training configuration from a JSON file; overrides --epochs and --batch-size
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Grid dimensions must be positive: an empty grid has nothing to sample.
fn grid_dim(arg: &str) -> Result<usize, String> {
    let value: usize = arg.parse().map_err(|e| format!("{}", e))?;
    if value == 0 {
        return Err("must be at least 1".to_string());
    }
    Ok(value)
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    let device = Default::default();

    let result = match cli.command {
        Command::Minimal { source } => run_minimal::<MyAutodiffBackend>(&source, &device),
        Command::Observed { source, options } => {
            run_observed::<MyAutodiffBackend>(&source, &options, &device)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_dataset(source: &SourceArgs) -> anyhow::Result<CifarDataset> {
    let dataset = match &source.image_folder {
        Some(folder) => CifarDataset::from_image_folder(folder),
        None => CifarDataset::from_cifar10_dir(&source.data_dir, source.label),
    };
    dataset.context("failed to load training images")
}

fn run_minimal<B: AutodiffBackend>(source: &SourceArgs, device: &B::Device) -> anyhow::Result<()> {
    let dataset = load_dataset(source)?;
    let generator = GeneratorModelConfig::new().init::<B>(device);
    let config = TrainingConfig::new(DiscriminatorModelConfig::new());

    let generator = fit(generator, dataset, &config, Path::new("."), &NoopObserver, device)?;

    generator
        .save_file("generator", &CompactRecorder::new())
        .context("failed to save generator")?;
    log::info!("generator saved to generator.mpk");
    Ok(())
}

fn run_observed<B: AutodiffBackend>(
    source: &SourceArgs,
    options: &ObservedArgs,
    device: &B::Device,
) -> anyhow::Result<()> {
    let dataset = load_dataset(source)?;
    let config = match &options.config {
        Some(path) => TrainingConfig::load(path)
            .map_err(|e| anyhow::anyhow!("failed to load {}: {:?}", path.display(), e))?,
        None => TrainingConfig::new(DiscriminatorModelConfig::new())
            .with_epochs(options.epochs)
            .with_batch_size(options.batch_size)
            .with_d_learning_rate(2e-4)
            .with_d_beta1(0.5)
            .with_g_learning_rate(2e-4)
            .with_g_beta1(0.5),
    };

    let grid = GridShape::new(options.rows, options.cols);
    let sample_images = dataset
        .sample_images(grid.capacity())
        .context("not enough images for the sample grid")?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let observer = ProgressObserver::new(
        config.epochs,
        config.batches_per_epoch(dataset.len()),
        sample_images,
        grid,
        &options.working_dir,
        &mut rng,
    );
    log::info!("writing samples to {}", observer.working_dir().display());

    let generator = GeneratorModelConfig::new().init::<B>(device);
    let generator = fit(generator, dataset, &config, &options.working_dir, &observer, device)?;

    let path = options.working_dir.join("generator");
    generator
        .save_file(&path, &CompactRecorder::new())
        .with_context(|| format!("failed to save generator to {}", path.display()))?;
    log::info!("generator saved to {}.mpk", path.display());
    Ok(())
}
