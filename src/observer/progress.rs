use std::path::{Path, PathBuf};

use rand::Rng;

use super::{BatchReport, SampleProxy, TrainingObserver};
use crate::model::constants::SAMPLE_INTERVAL;
use crate::utils::{GridShape, ImageBatch, ImageSink, LatentBatch, PngSink, merge_images};

/// Prints a progress line after every batch and periodically writes a grid of
/// generated samples into the working directory.
pub struct ProgressObserver<S: ImageSink = PngSink> {
    epochs: usize,
    batches: usize,
    working_dir: PathBuf,
    sample_z: LatentBatch,
    sample_images: ImageBatch,
    grid: GridShape,
    sink: S,
}

impl ProgressObserver<PngSink> {
    pub fn new<R: Rng>(
        epochs: usize,
        batches: usize,
        sample_images: ImageBatch,
        grid: GridShape,
        working_dir: impl Into<PathBuf>,
        rng: &mut R,
    ) -> Self {
        Self::with_sink(epochs, batches, sample_images, grid, working_dir, rng, PngSink)
    }
}

impl<S: ImageSink> ProgressObserver<S> {
    pub fn with_sink<R: Rng>(
        epochs: usize,
        batches: usize,
        sample_images: ImageBatch,
        grid: GridShape,
        working_dir: impl Into<PathBuf>,
        rng: &mut R,
        sink: S,
    ) -> Self {
        let sample_z = LatentBatch::uniform(sample_images.len(), rng);
        Self {
            epochs,
            batches,
            working_dir: working_dir.into(),
            sample_z,
            sample_images,
            grid,
            sink,
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    fn write_samples(&self, proxy: &dyn SampleProxy, report: &BatchReport) -> anyhow::Result<()> {
        let sample = proxy.create_sample_images(&self.sample_z, &self.sample_images)?;
        let grid = merge_images(&sample.images, self.grid)?;

        let path = self.working_dir.join(sample_file_name(
            report.epoch_id,
            report.batch_id,
            report.counter,
            sample.d_loss,
            sample.g_loss,
        ));
        log::info!("saving sample grid to {}", path.display());
        self.sink.save(&path, &grid)
    }
}

impl<S: ImageSink> TrainingObserver for ProgressObserver<S> {
    fn on_completed_batch_train(
        &self,
        proxy: &dyn SampleProxy,
        report: &BatchReport,
    ) -> anyhow::Result<bool> {
        println!("{}", progress_line(report, self.epochs, self.batches));

        if should_sample(report.counter) {
            self.write_samples(proxy, report)?;
        }

        Ok(true)
    }
}

/// Whether the batch with this running counter renders a sample grid.
pub fn should_sample(counter: usize) -> bool {
    counter % SAMPLE_INTERVAL == 0
}

/// `HH:MM:SS.mmm`, rounded once to whole milliseconds so fields carry over.
pub fn format_elapsed(elapsed_time: f64) -> String {
    let millis = (elapsed_time.max(0.0) * 1000.0).round() as u64;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        millis / 3_600_000,
        millis / 60_000 % 60,
        millis / 1000 % 60,
        millis % 1000
    )
}

pub fn progress_line(report: &BatchReport, epochs: usize, batches: usize) -> String {
    format!(
        "Epoch: [{:3}/{:3}] [{:4}/{:4}] time: {}, d_loss: {:.8}, g_loss: {:.8}, counter: {}",
        report.epoch_id + 1,
        epochs,
        report.batch_id + 1,
        batches,
        format_elapsed(report.elapsed_time),
        report.d_loss,
        report.g_loss,
        report.counter
    )
}

/// File name of the sample grid; epoch and batch are shown one-based.
pub fn sample_file_name(
    epoch_id: usize,
    batch_id: usize,
    counter: usize,
    d_loss: f64,
    g_loss: f64,
) -> String {
    format!(
        "train_{:02}_{:04}_{:06}_d_loss{{{:.4}}}_g_loss{{{:.4}}}.png",
        epoch_id + 1,
        batch_id + 1,
        counter,
        d_loss,
        g_loss
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::constants::CHANNELS;
    use crate::observer::{EpochReport, SampleOutput};
    use crate::utils::SampleImageError;
    use image::RgbImage;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::cell::{Cell, RefCell};
    use test_log::test;

    /// Returns `count` mid-grey 2x2 images and fixed losses.
    struct FakeProxy {
        count: usize,
        calls: Cell<usize>,
    }

    impl FakeProxy {
        fn returning(count: usize) -> Self {
            Self {
                count,
                calls: Cell::new(0),
            }
        }
    }

    impl SampleProxy for FakeProxy {
        fn create_sample_images(
            &self,
            latents: &LatentBatch,
            reference: &ImageBatch,
        ) -> anyhow::Result<SampleOutput> {
            assert_eq!(latents.len(), reference.len());
            self.calls.set(self.calls.get() + 1);
            let images =
                ImageBatch::new(vec![0.0; self.count * 4 * CHANNELS], self.count, 2, 2, CHANNELS)?;
            Ok(SampleOutput {
                images,
                d_loss: 1.2345,
                g_loss: 0.6789,
            })
        }
    }

    #[derive(Default)]
    struct MemorySink {
        saved: RefCell<Vec<(PathBuf, RgbImage)>>,
    }

    impl ImageSink for &MemorySink {
        fn save(&self, path: &Path, image: &RgbImage) -> anyhow::Result<()> {
            self.saved
                .borrow_mut()
                .push((path.to_path_buf(), image.clone()));
            Ok(())
        }
    }

    fn reference_images(count: usize) -> ImageBatch {
        ImageBatch::new(vec![0.5; count * 4 * CHANNELS], count, 2, 2, CHANNELS).unwrap()
    }

    fn report(counter: usize) -> BatchReport {
        BatchReport {
            epoch_id: 0,
            batch_id: 0,
            counter,
            g_loss: 0.5,
            d_loss: 1.5,
            elapsed_time: 1.0,
        }
    }

    fn observer(grid: GridShape, sink: &MemorySink) -> ProgressObserver<&MemorySink> {
        let mut rng = StdRng::seed_from_u64(0);
        ProgressObserver::with_sink(
            25,
            50,
            reference_images(grid.capacity()),
            grid,
            "work",
            &mut rng,
            sink,
        )
    }

    #[test]
    fn progress_line_matches_console_format() {
        let report = BatchReport {
            epoch_id: 0,
            batch_id: 49,
            counter: 50,
            g_loss: 0.46044752,
            d_loss: 2.80770445,
            elapsed_time: 32.986,
        };
        assert_eq!(
            progress_line(&report, 25, 50),
            "Epoch: [  1/ 25] [  50/  50] time: 00:00:32.986, d_loss: 2.80770445, g_loss: 0.46044752, counter: 50"
        );
    }

    #[test]
    fn elapsed_time_rolls_over_minutes_and_hours() {
        assert_eq!(format_elapsed(0.0), "00:00:00.000");
        assert_eq!(format_elapsed(5.5), "00:00:05.500");
        assert_eq!(format_elapsed(3725.25), "01:02:05.250");
    }

    #[test]
    fn elapsed_time_carries_rounded_milliseconds() {
        assert_eq!(format_elapsed(59.9996), "00:01:00.000");
        assert_eq!(format_elapsed(119.9999), "00:02:00.000");
        assert_eq!(format_elapsed(0.0004), "00:00:00.000");
    }

    #[test]
    fn sample_file_name_embeds_indices_and_losses() {
        assert_eq!(
            sample_file_name(0, 0, 10, 1.2345, 0.6789),
            "train_01_0001_000010_d_loss{1.2345}_g_loss{0.6789}.png"
        );
    }

    #[test]
    fn sampling_fires_every_tenth_counter() {
        for counter in 1..=100 {
            assert_eq!(should_sample(counter), counter % 10 == 0, "counter {}", counter);
        }
        assert_eq!((1..=100).filter(|&c| should_sample(c)).count(), 10);
    }

    #[test]
    fn observer_writes_grid_only_on_sampling_batches() {
        let sink = MemorySink::default();
        let grid = GridShape::new(2, 3);
        let observer = observer(grid, &sink);
        let proxy = FakeProxy::returning(grid.capacity());

        for counter in 1..=20 {
            assert!(observer.on_completed_batch_train(&proxy, &report(counter)).unwrap());
        }

        assert_eq!(proxy.calls.get(), 2);
        let saved = sink.saved.borrow();
        assert_eq!(saved.len(), 2);
        assert_eq!(
            saved[0].0,
            Path::new("work").join("train_01_0001_000010_d_loss{1.2345}_g_loss{0.6789}.png")
        );
        assert_eq!(saved[0].1.dimensions(), (3 * 2, 2 * 2));
        assert!(saved[0].1.pixels().all(|p| p.0 == [128, 128, 128]));
    }

    #[test]
    fn observer_fails_when_proxy_returns_wrong_count() {
        let sink = MemorySink::default();
        let grid = GridShape::new(8, 8);
        let observer = observer(grid, &sink);
        let proxy = FakeProxy::returning(63);

        let err = observer
            .on_completed_batch_train(&proxy, &report(10))
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<SampleImageError>(),
            Some(&SampleImageError::CountMismatch {
                expected: 64,
                actual: 63
            })
        );
        assert!(sink.saved.borrow().is_empty());
    }

    #[test]
    fn epoch_hook_always_continues() {
        let sink = MemorySink::default();
        let observer = observer(GridShape::new(1, 1), &sink);
        let proxy = FakeProxy::returning(1);
        let report = EpochReport {
            epoch_id: 3,
            batch_id: 9,
            counter: 40,
            elapsed_time: 12.0,
        };
        assert!(observer.on_completed_epoch_train(&proxy, &report).unwrap());
        assert_eq!(proxy.calls.get(), 0);
    }
}
