use std::fmt;
use std::path::{Path, PathBuf};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::ImageReader;
use image::imageops::FilterType;

use crate::model::constants::{CHANNELS, HEIGHT, WIDTH};
use crate::utils::{ImageBatch, normalize_pixel};

const CIFAR_BATCH_FILES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
const CIFAR_CLASSES: u8 = 10;
const CIFAR_RECORD_LEN: usize = 1 + CHANNELS * HEIGHT * WIDTH;

#[derive(Debug)]
pub enum DatasetError {
    Io { path: PathBuf, source: std::io::Error },
    /// A CIFAR batch file whose length is not a whole number of records.
    Truncated { path: PathBuf, len: usize },
    UnknownLabel(u8),
    Empty(String),
}

impl fmt::Display for DatasetError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DatasetError::Io { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            DatasetError::Truncated { path, len } => write!(
                f,
                "{} holds {} bytes, not a multiple of the {}-byte record size",
                path.display(),
                len,
                CIFAR_RECORD_LEN
            ),
            DatasetError::UnknownLabel(label) => {
                write!(f, "label {} is not a CIFAR-10 class", label)
            }
            DatasetError::Empty(what) => write!(f, "no images found: {}", what),
        }
    }
}

impl std::error::Error for DatasetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DatasetError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// One normalized image, HWC, values in `[-1, 1]`.
#[derive(Debug, Clone)]
pub struct ImageItem {
    pub image: Vec<f32>,
    pub label: u8,
}

/// Single-class image collection held in memory.
pub struct CifarDataset {
    items: Vec<ImageItem>,
}

impl CifarDataset {
    /// Loads the CIFAR-10 binary training batches from `dir`, keeping only `label`.
    pub fn from_cifar10_dir<P: AsRef<Path>>(dir: P, label: u8) -> Result<Self, DatasetError> {
        if label >= CIFAR_CLASSES {
            return Err(DatasetError::UnknownLabel(label));
        }
        let dir = dir.as_ref();
        let mut items = Vec::new();
        for name in CIFAR_BATCH_FILES {
            let path = dir.join(name);
            let bytes = std::fs::read(&path).map_err(|source| DatasetError::Io {
                path: path.clone(),
                source,
            })?;
            items.extend(parse_cifar_records(&path, &bytes, label)?);
        }
        if items.is_empty() {
            return Err(DatasetError::Empty(format!(
                "label {} in {}",
                label,
                dir.display()
            )));
        }
        log::info!(
            "loaded {} images with label {} from {}",
            items.len(),
            label,
            dir.display()
        );
        Ok(Self { items })
    }

    /// Treats every image file in `path` as one sample of a single class.
    pub fn from_image_folder<P: AsRef<Path>>(path: P) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let io_error = |source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut image_paths = Vec::new();

        for entry in std::fs::read_dir(path).map_err(io_error)? {
            let entry = entry.map_err(io_error)?;
            let path = entry.path();

            if path.is_file() {
                if let Some(ext) = path.extension().and_then(|s| s.to_str()) {
                    match ext.to_lowercase().as_str() {
                        "jpg" | "jpeg" | "png" | "bmp" | "tiff" => {
                            image_paths.push(path);
                        }
                        _ => {}
                    }
                }
            }
        }
        image_paths.sort();

        let mut items = Vec::with_capacity(image_paths.len());
        for image_path in &image_paths {
            match load_resized(image_path) {
                Some(image) => items.push(ImageItem { image, label: 0 }),
                None => log::warn!("skipping unreadable image {}", image_path.display()),
            }
        }
        if items.is_empty() {
            return Err(DatasetError::Empty(path.display().to_string()));
        }
        log::info!("loaded {} images from {}", items.len(), path.display());
        Ok(Self { items })
    }

    /// The first `count` images, used as fixed reference images while sampling.
    pub fn sample_images(&self, count: usize) -> Result<ImageBatch, DatasetError> {
        if self.items.len() < count {
            return Err(DatasetError::Empty(format!(
                "{} reference images requested, dataset holds {}",
                count,
                self.items.len()
            )));
        }
        let data = self.items[..count]
            .iter()
            .flat_map(|item| item.image.iter().copied())
            .collect();
        ImageBatch::new(data, count, HEIGHT, WIDTH, CHANNELS).map_err(|e| {
            DatasetError::Empty(format!("reference images are malformed: {}", e))
        })
    }

    #[cfg(test)]
    pub(crate) fn from_items(items: Vec<ImageItem>) -> Self {
        Self { items }
    }
}

impl Dataset<ImageItem> for CifarDataset {
    fn len(&self) -> usize {
        self.items.len()
    }

    fn get(&self, index: usize) -> Option<ImageItem> {
        self.items.get(index).cloned()
    }
}

/// Decodes the records of one CIFAR-10 batch file that carry `label`.
/// Each record is a label byte followed by the R, G and B planes.
fn parse_cifar_records(path: &Path, bytes: &[u8], label: u8) -> Result<Vec<ImageItem>, DatasetError> {
    if bytes.len() % CIFAR_RECORD_LEN != 0 {
        return Err(DatasetError::Truncated {
            path: path.to_path_buf(),
            len: bytes.len(),
        });
    }
    let plane = HEIGHT * WIDTH;
    let items = bytes
        .chunks_exact(CIFAR_RECORD_LEN)
        .filter(|record| record[0] == label)
        .map(|record| {
            let pixels = &record[1..];
            let mut image = Vec::with_capacity(CHANNELS * plane);
            for p in 0..plane {
                for c in 0..CHANNELS {
                    image.push(normalize_pixel(pixels[c * plane + p]));
                }
            }
            ImageItem { image, label }
        })
        .collect();
    Ok(items)
}

fn load_resized(path: &Path) -> Option<Vec<f32>> {
    let image = ImageReader::open(path).ok()?.decode().ok()?;
    let image = image
        .resize_exact(WIDTH as u32, HEIGHT as u32, FilterType::Triangle)
        .to_rgb8();
    Some(image.as_raw().iter().map(|&v| normalize_pixel(v)).collect())
}

#[derive(Clone, Default)]
pub struct ImageBatcher {}

#[derive(Clone, Debug)]
pub struct ImageTensorBatch<B: Backend> {
    pub images: Tensor<B, 4>, // Shape: [batch_size, channels, height, width]
}

impl<B: Backend> Batcher<B, ImageItem, ImageTensorBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageTensorBatch<B> {
        let count = items.len();
        let data: Vec<f32> = items.into_iter().flat_map(|item| item.image).collect();
        let images = Tensor::<B, 4>::from_data(
            TensorData::new(data, [count, HEIGHT, WIDTH, CHANNELS]).convert::<B::FloatElem>(),
            device,
        )
        // NHWC -> NCHW
        .swap_dims(1, 3)
        .swap_dims(2, 3);
        ImageTensorBatch { images }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::backend::ndarray::NdArrayDevice;
    use test_log::test;

    /// A record whose planes are filled with `r`, `g` and `b`.
    fn record(label: u8, r: u8, g: u8, b: u8) -> Vec<u8> {
        let plane = HEIGHT * WIDTH;
        let mut bytes = vec![label];
        bytes.extend(std::iter::repeat_n(r, plane));
        bytes.extend(std::iter::repeat_n(g, plane));
        bytes.extend(std::iter::repeat_n(b, plane));
        bytes
    }

    fn write_cifar_dir(dir: &Path, records_per_file: &[Vec<u8>]) {
        for name in CIFAR_BATCH_FILES {
            let bytes: Vec<u8> = records_per_file.iter().flatten().copied().collect();
            std::fs::write(dir.join(name), bytes).unwrap();
        }
    }

    #[test]
    fn cifar_loader_keeps_only_requested_label() {
        let dir = tempfile::tempdir().unwrap();
        write_cifar_dir(
            dir.path(),
            &[record(5, 255, 0, 127), record(3, 1, 1, 1), record(5, 0, 255, 255)],
        );

        let dataset = CifarDataset::from_cifar10_dir(dir.path(), 5).unwrap();
        assert_eq!(dataset.len(), 2 * CIFAR_BATCH_FILES.len());

        let first = dataset.get(0).unwrap();
        assert_eq!(first.label, 5);
        assert_eq!(first.image.len(), HEIGHT * WIDTH * CHANNELS);
        // interleaved RGB per pixel
        assert_eq!(&first.image[..3], &[1.0, -1.0, normalize_pixel(127)]);
        assert!(first.image.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn cifar_loader_rejects_truncated_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = record(5, 0, 0, 0);
        bytes.pop();
        write_cifar_dir(dir.path(), &[bytes]);

        let err = CifarDataset::from_cifar10_dir(dir.path(), 5).err().unwrap();
        assert!(matches!(err, DatasetError::Truncated { .. }));
    }

    #[test]
    fn cifar_loader_rejects_unknown_label_and_empty_result() {
        let dir = tempfile::tempdir().unwrap();
        write_cifar_dir(dir.path(), &[record(2, 0, 0, 0)]);

        assert!(matches!(
            CifarDataset::from_cifar10_dir(dir.path(), 10),
            Err(DatasetError::UnknownLabel(10))
        ));
        assert!(matches!(
            CifarDataset::from_cifar10_dir(dir.path(), 5),
            Err(DatasetError::Empty(_))
        ));
    }

    #[test]
    fn missing_batch_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = CifarDataset::from_cifar10_dir(dir.path(), 5).err().unwrap();
        assert!(matches!(err, DatasetError::Io { .. }));
    }

    #[test]
    fn image_folder_resizes_to_model_shape() {
        let dir = tempfile::tempdir().unwrap();
        image::RgbImage::from_pixel(64, 48, image::Rgb([255, 255, 255]))
            .save(dir.path().join("a.png"))
            .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not an image").unwrap();

        let dataset = CifarDataset::from_image_folder(dir.path()).unwrap();
        assert_eq!(dataset.len(), 1);
        let item = dataset.get(0).unwrap();
        assert_eq!(item.image.len(), HEIGHT * WIDTH * CHANNELS);
        assert!(item.image.iter().all(|&v| v == 1.0));
    }

    #[test]
    fn sample_images_takes_leading_items() {
        let items = (0..4)
            .map(|i| ImageItem {
                image: vec![i as f32 / 4.0; HEIGHT * WIDTH * CHANNELS],
                label: 5,
            })
            .collect();
        let dataset = CifarDataset::from_items(items);

        let batch = dataset.sample_images(2).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.image(1).unwrap()[0], 0.25);
        assert!(dataset.sample_images(5).is_err());
    }

    #[test]
    fn batcher_produces_nchw_tensor() {
        let mut image = vec![0.0; HEIGHT * WIDTH * CHANNELS];
        // pixel (0, 1), blue channel
        image[CHANNELS + 2] = 0.5;
        let items = vec![
            ImageItem { image, label: 5 },
            ImageItem {
                image: vec![0.0; HEIGHT * WIDTH * CHANNELS],
                label: 5,
            },
        ];
        let device = NdArrayDevice::default();
        let batch: ImageTensorBatch<NdArray> = ImageBatcher::default().batch(items, &device);

        assert_eq!(batch.images.dims(), [2, CHANNELS, HEIGHT, WIDTH]);
        let values = batch.images.into_data().to_vec::<f32>().unwrap();
        let plane = HEIGHT * WIDTH;
        assert_eq!(values[2 * plane + 1], 0.5);
        assert_eq!(values.iter().filter(|&&v| v != 0.0).count(), 1);
    }
}
