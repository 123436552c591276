use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, anyhow, bail};
use burn::{
    data::dataloader::batcher::Batcher,
    data::dataset::Dataset,
    module::AutodiffModule,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    record::CompactRecorder,
    tensor::{Distribution, ElementConversion, backend::AutodiffBackend},
};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use crate::model::{
    architecture::{DiscriminatorModel, DiscriminatorModelConfig, GeneratorModel},
    constants::LATENT_DIM,
    data::{ImageBatcher, ImageItem, ImageTensorBatch},
};
use crate::observer::{BatchReport, EpochReport, SampleOutput, SampleProxy, TrainingObserver};
use crate::utils::{ImageBatch, LatentBatch};

/// Directory created under the working directory for per-epoch checkpoints.
pub const SCRATCH_DIR_NAME: &str = ".dcgan";

#[derive(Config)]
pub struct TrainingConfig {
    pub discriminator: DiscriminatorModelConfig,

    #[config(default = 25)]
    pub epochs: usize,

    #[config(default = 64)]
    pub batch_size: usize,

    #[config(default = 2e-4)]
    pub d_learning_rate: f64,

    #[config(default = 0.5)]
    pub d_beta1: f32,

    #[config(default = 2e-4)]
    pub g_learning_rate: f64,

    #[config(default = 0.5)]
    pub g_beta1: f32,

    /// Generator updates per discriminator update.
    #[config(default = 2)]
    pub g_updates_per_batch: usize,

    #[config(default = 42)]
    pub seed: u64,
}

impl TrainingConfig {
    /// Full batches per epoch; a trailing partial batch is dropped.
    pub fn batches_per_epoch(&self, dataset_len: usize) -> usize {
        if self.batch_size == 0 {
            return 0;
        }
        dataset_len / self.batch_size
    }
}

/// Checkpoint directory owned by a single run. Removed when the run finishes
/// normally, unless it was already present when the run started.
struct ScratchDir {
    path: PathBuf,
    preexisting: bool,
}

impl ScratchDir {
    fn create(working_dir: &Path) -> std::io::Result<Self> {
        let path = working_dir.join(SCRATCH_DIR_NAME);
        let preexisting = path.exists();
        std::fs::create_dir_all(&path)?;
        Ok(Self { path, preexisting })
    }

    fn finish(self) -> std::io::Result<()> {
        if self.preexisting {
            log::warn!(
                "{} existed before training; leaving it in place",
                self.path.display()
            );
            return Ok(());
        }
        std::fs::remove_dir_all(&self.path)
    }
}

/// Gives the observer access to the models as they stand at callback time.
struct TrainerProxy<'a, B: AutodiffBackend> {
    generator: &'a GeneratorModel<B>,
    discriminator: &'a DiscriminatorModel<B>,
    device: &'a B::Device,
}

impl<B: AutodiffBackend> SampleProxy for TrainerProxy<'_, B> {
    fn create_sample_images(
        &self,
        latents: &LatentBatch,
        reference: &ImageBatch,
    ) -> anyhow::Result<SampleOutput> {
        if latents.is_empty() || latents.len() != reference.len() {
            bail!(
                "{} latent vectors cannot be scored against {} reference images",
                latents.len(),
                reference.len()
            );
        }
        let generator = self.generator.valid();
        let discriminator = self.discriminator.valid();

        let z = Tensor::<B::InnerBackend, 2>::from_data(
            TensorData::new(latents.values().to_vec(), [latents.len(), LATENT_DIM])
                .convert::<B::FloatElem>(),
            self.device,
        );
        let real = Tensor::<B::InnerBackend, 4>::from_data(
            TensorData::new(
                reference.to_nchw(),
                [
                    reference.len(),
                    reference.channels(),
                    reference.height(),
                    reference.width(),
                ],
            )
            .convert::<B::FloatElem>(),
            self.device,
        );

        let samples = generator.forward(z);
        let d_fake = discriminator.forward(samples.clone());
        let d_loss = bce_with_logits(discriminator.forward(real), 1.0)
            + bce_with_logits(d_fake.clone(), 0.0);
        let g_loss = bce_with_logits(d_fake, 1.0);

        let dims = samples.dims();
        let data = samples
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| anyhow!("failed to read generated samples: {:?}", e))?;

        Ok(SampleOutput {
            images: ImageBatch::from_nchw(&data, dims)?,
            d_loss: scalar(d_loss),
            g_loss: scalar(g_loss),
        })
    }
}

/// Trains `generator` against a discriminator on `dataset`, reporting to `observer`.
///
/// Creates `working_dir` when missing and stores the configuration there.
/// Training ends early when either observer hook returns `false`.
pub fn fit<B, D>(
    mut generator: GeneratorModel<B>,
    dataset: D,
    config: &TrainingConfig,
    working_dir: &Path,
    observer: &dyn TrainingObserver,
    device: &B::Device,
) -> anyhow::Result<GeneratorModel<B>>
where
    B: AutodiffBackend,
    D: Dataset<ImageItem>,
{
    let batches = config.batches_per_epoch(dataset.len());
    if batches == 0 {
        bail!(
            "{} images cannot fill a batch of {}",
            dataset.len(),
            config.batch_size
        );
    }

    std::fs::create_dir_all(working_dir)
        .with_context(|| format!("failed to create {}", working_dir.display()))?;
    config
        .save(working_dir.join("config.json"))
        .context("failed to save training config")?;
    let scratch = ScratchDir::create(working_dir).context("failed to create scratch directory")?;

    B::seed(config.seed);
    let mut rng = StdRng::seed_from_u64(config.seed);
    let batcher = ImageBatcher::default();
    let recorder = CompactRecorder::new();

    let mut discriminator = config.discriminator.init::<B>(device);
    let mut optim_g = AdamConfig::new()
        .with_beta_1(config.g_beta1)
        .with_beta_2(0.999)
        .init::<B, GeneratorModel<B>>();
    let mut optim_d = AdamConfig::new()
        .with_beta_1(config.d_beta1)
        .with_beta_2(0.999)
        .init::<B, DiscriminatorModel<B>>();

    log::info!(
        "training on {} images: {} epochs of {} batches of {}",
        dataset.len(),
        config.epochs,
        batches,
        config.batch_size
    );

    let mut order: Vec<usize> = (0..dataset.len()).collect();
    let mut counter = 0;
    let start_time = Instant::now();

    'epochs: for epoch_id in 0..config.epochs {
        order.shuffle(&mut rng);

        for batch_id in 0..batches {
            let items = order[batch_id * config.batch_size..(batch_id + 1) * config.batch_size]
                .iter()
                .filter_map(|&index| dataset.get(index))
                .collect::<Vec<_>>();
            let batch: ImageTensorBatch<B> = batcher.batch(items, device);
            let real_images = batch.images;
            let batch_size = real_images.dims()[0];

            let noise = Tensor::<B, 2>::random(
                [batch_size, LATENT_DIM],
                Distribution::Uniform(-1.0, 1.0),
                device,
            );

            // --- 1. Train the Discriminator --- //
            let fake_images_detached = generator.forward(noise.clone()).detach();
            let loss_d_real = bce_with_logits(discriminator.forward(real_images), 1.0);
            let loss_d_fake = bce_with_logits(discriminator.forward(fake_images_detached), 0.0);
            let loss_d = loss_d_real + loss_d_fake;
            let d_loss = scalar(loss_d.clone());

            let grads_d = loss_d.backward();
            let grads_d = GradientsParams::from_grads(grads_d, &discriminator);
            discriminator = optim_d.step(config.d_learning_rate, discriminator, grads_d);

            // --- 2. Train the Generator --- //
            let mut g_loss = 0.0;
            for _ in 0..config.g_updates_per_batch.max(1) {
                let fake_images = generator.forward(noise.clone());
                let loss_g = bce_with_logits(discriminator.forward(fake_images), 1.0);
                g_loss = scalar(loss_g.clone());

                let grads_g = loss_g.backward();
                let grads_g = GradientsParams::from_grads(grads_g, &generator);
                generator = optim_g.step(config.g_learning_rate, generator, grads_g);
            }

            counter += 1;
            let proxy = TrainerProxy {
                generator: &generator,
                discriminator: &discriminator,
                device,
            };
            let report = BatchReport {
                epoch_id,
                batch_id,
                counter,
                g_loss,
                d_loss,
                elapsed_time: start_time.elapsed().as_secs_f64(),
            };
            if !observer.on_completed_batch_train(&proxy, &report)? {
                log::info!(
                    "observer stopped training after epoch {} batch {}",
                    epoch_id + 1,
                    batch_id + 1
                );
                break 'epochs;
            }
        }

        generator
            .clone()
            .save_file(
                scratch.path.join(format!("generator-epoch-{}", epoch_id + 1)),
                &recorder,
            )
            .context("failed to save generator checkpoint")?;
        discriminator
            .clone()
            .save_file(
                scratch
                    .path
                    .join(format!("discriminator-epoch-{}", epoch_id + 1)),
                &recorder,
            )
            .context("failed to save discriminator checkpoint")?;
        log::debug!("checkpoint written for epoch {}", epoch_id + 1);

        let proxy = TrainerProxy {
            generator: &generator,
            discriminator: &discriminator,
            device,
        };
        let report = EpochReport {
            epoch_id,
            batch_id: batches - 1,
            counter,
            elapsed_time: start_time.elapsed().as_secs_f64(),
        };
        if !observer.on_completed_epoch_train(&proxy, &report)? {
            log::info!("observer stopped training after epoch {}", epoch_id + 1);
            break;
        }
    }

    scratch
        .finish()
        .context("failed to remove scratch directory")?;
    log::info!(
        "training finished after {} batches in {:.1}s",
        counter,
        start_time.elapsed().as_secs_f64()
    );
    Ok(generator)
}

/// Mean binary cross-entropy of `logits` against a constant `target`,
/// computed as `max(x, 0) - x * t + ln(1 + e^-|x|)`.
fn bce_with_logits<B: Backend>(logits: Tensor<B, 2>, target: f32) -> Tensor<B, 1> {
    let loss = logits.clone().clamp_min(0.0) - logits.clone() * target
        + (logits.abs().neg().exp() + 1.0).log();
    loss.mean()
}

fn scalar<B: Backend>(loss: Tensor<B, 1>) -> f64 {
    loss.into_scalar().elem::<f64>()
}
