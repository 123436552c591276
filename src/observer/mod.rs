//! Hooks the trainer calls while fitting the generator.
//!
//! An observer is invoked synchronously after every mini-batch and at every
//! epoch boundary. Each hook returns whether training should continue.

mod progress;

pub use progress::ProgressObserver;

use crate::utils::{ImageBatch, LatentBatch};

/// State of the run after one mini-batch update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchReport {
    /// Zero-based epoch index.
    pub epoch_id: usize,
    /// Zero-based batch index within the epoch.
    pub batch_id: usize,
    /// Number of batches completed since training started, starting at 1.
    pub counter: usize,
    pub g_loss: f64,
    pub d_loss: f64,
    /// Seconds since training started.
    pub elapsed_time: f64,
}

/// State of the run at an epoch boundary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochReport {
    pub epoch_id: usize,
    pub batch_id: usize,
    pub counter: usize,
    pub elapsed_time: f64,
}

/// Images generated by the current model, with the losses measured on them.
#[derive(Debug, Clone)]
pub struct SampleOutput {
    pub images: ImageBatch,
    pub d_loss: f64,
    pub g_loss: f64,
}

/// Handed to the observer at each call; renders samples from the model being trained.
pub trait SampleProxy {
    /// Runs the generator on `latents` and scores the result against `reference` images.
    fn create_sample_images(
        &self,
        latents: &LatentBatch,
        reference: &ImageBatch,
    ) -> anyhow::Result<SampleOutput>;
}

/// Observes the training process. Returning `Ok(false)` asks the trainer to stop.
pub trait TrainingObserver {
    fn on_completed_batch_train(
        &self,
        _proxy: &dyn SampleProxy,
        _report: &BatchReport,
    ) -> anyhow::Result<bool> {
        Ok(true)
    }

    fn on_completed_epoch_train(
        &self,
        _proxy: &dyn SampleProxy,
        _report: &EpochReport,
    ) -> anyhow::Result<bool> {
        Ok(true)
    }
}

/// Observer that never interrupts training.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl TrainingObserver for NoopObserver {}
