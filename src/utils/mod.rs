use std::fmt;
use std::path::Path;

use anyhow::Context;
use image::{ImageBuffer, Rgb, RgbImage, imageops};
use rand::Rng;

use crate::model::constants::{CHANNELS, LATENT_DIM};

/// Maps a raw channel value in `[0, 255]` to `[-1, 1]`.
pub fn normalize_pixel(value: u8) -> f32 {
    (value as f32 - 127.5) / 127.5
}

/// Reverses [`normalize_pixel`], rounding to the nearest channel value.
pub fn denormalize_pixel(value: f32) -> u8 {
    let denormalized = (value + 1.0) * 127.5;
    denormalized.round().clamp(0.0, 255.0) as u8
}

#[derive(Debug, Clone, PartialEq)]
pub enum SampleImageError {
    /// The number of images does not fill the grid exactly.
    CountMismatch { expected: usize, actual: usize },
    /// The flat buffer does not hold `count * height * width * channels` values.
    DataLength { expected: usize, actual: usize },
    /// The grid has no cells to fill.
    EmptyGrid,
}

impl fmt::Display for SampleImageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SampleImageError::CountMismatch { expected, actual } => write!(
                f,
                "sample image count does not match the grid: expected {}, got {}",
                expected, actual
            ),
            SampleImageError::DataLength { expected, actual } => write!(
                f,
                "mismatched image data length: expected {}, got {}",
                expected, actual
            ),
            SampleImageError::EmptyGrid => write!(f, "sample grid has no cells"),
        }
    }
}

impl std::error::Error for SampleImageError {}

/// A batch of images, each stored height-major with interleaved channels (HWC).
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBatch {
    data: Vec<f32>,
    count: usize,
    height: usize,
    width: usize,
    channels: usize,
}

impl ImageBatch {
    pub fn new(
        data: Vec<f32>,
        count: usize,
        height: usize,
        width: usize,
        channels: usize,
    ) -> Result<Self, SampleImageError> {
        let expected = count * height * width * channels;
        if data.len() != expected {
            return Err(SampleImageError::DataLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            count,
            height,
            width,
            channels,
        })
    }

    /// Builds a batch from a flat `[count, channels, height, width]` buffer.
    pub fn from_nchw(data: &[f32], dims: [usize; 4]) -> Result<Self, SampleImageError> {
        let [count, channels, height, width] = dims;
        let expected = count * channels * height * width;
        if data.len() != expected {
            return Err(SampleImageError::DataLength {
                expected,
                actual: data.len(),
            });
        }
        let plane = height * width;
        let mut hwc = Vec::with_capacity(expected);
        for n in 0..count {
            let image = &data[n * channels * plane..(n + 1) * channels * plane];
            for pixel in 0..plane {
                for c in 0..channels {
                    hwc.push(image[c * plane + pixel]);
                }
            }
        }
        Self::new(hwc, count, height, width, channels)
    }

    /// Flat `[count, channels, height, width]` copy of the batch.
    pub fn to_nchw(&self) -> Vec<f32> {
        let plane = self.height * self.width;
        let mut nchw = Vec::with_capacity(self.data.len());
        for image in self.data.chunks_exact(self.image_len()) {
            for c in 0..self.channels {
                nchw.extend((0..plane).map(|pixel| image[pixel * self.channels + c]));
            }
        }
        nchw
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    fn image_len(&self) -> usize {
        self.height * self.width * self.channels
    }

    pub fn image(&self, index: usize) -> Option<&[f32]> {
        if index >= self.count {
            return None;
        }
        let len = self.image_len();
        Some(&self.data[index * len..(index + 1) * len])
    }
}

/// A batch of latent vectors, `count x LATENT_DIM` values.
#[derive(Debug, Clone, PartialEq)]
pub struct LatentBatch {
    values: Vec<f32>,
    count: usize,
}

impl LatentBatch {
    /// Draws `count` latent vectors uniformly from `[-1, 1)`.
    pub fn uniform<R: Rng>(count: usize, rng: &mut R) -> Self {
        let values = (0..count * LATENT_DIM)
            .map(|_| rng.random_range(-1.0f32..1.0))
            .collect();
        Self { values, count }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridShape {
    pub rows: usize,
    pub cols: usize,
}

impl GridShape {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols }
    }

    pub fn capacity(&self) -> usize {
        self.rows * self.cols
    }

    /// Grid cell `(row, col)` of the image at flat index `idx`.
    pub fn cell(&self, idx: usize) -> (usize, usize) {
        (idx / self.cols, idx % self.cols)
    }
}

/// Converts one HWC image in `[-1, 1]` to an 8-bit RGB buffer.
pub fn float_vec_to_image(data: &[f32], height: usize, width: usize) -> Option<RgbImage> {
    let expected_len = width * height * CHANNELS;
    if data.len() != expected_len {
        log::warn!(
            "mismatched data length: expected {}, got {}",
            expected_len,
            data.len()
        );
        return None;
    }

    let raw_pixels: Vec<u8> = data.iter().map(|&val| denormalize_pixel(val)).collect();

    ImageBuffer::<Rgb<u8>, Vec<u8>>::from_raw(width as u32, height as u32, raw_pixels)
}

/// Tiles the batch into one image, row-major: image `idx` lands in cell
/// `(idx / cols, idx % cols)`.
pub fn merge_images(images: &ImageBatch, grid: GridShape) -> Result<RgbImage, SampleImageError> {
    if images.len() != grid.capacity() {
        return Err(SampleImageError::CountMismatch {
            expected: grid.capacity(),
            actual: images.len(),
        });
    }
    if images.is_empty() {
        return Err(SampleImageError::EmptyGrid);
    }
    if images.channels() != CHANNELS {
        return Err(SampleImageError::DataLength {
            expected: images.len() * images.height() * images.width() * CHANNELS,
            actual: images.data().len(),
        });
    }

    let (h, w) = (images.height(), images.width());
    let mut merged = RgbImage::new((w * grid.cols) as u32, (h * grid.rows) as u32);
    for idx in 0..images.len() {
        let tile = images
            .image(idx)
            .and_then(|data| float_vec_to_image(data, h, w))
            .ok_or(SampleImageError::DataLength {
                expected: h * w * CHANNELS,
                actual: 0,
            })?;
        let (row, col) = grid.cell(idx);
        imageops::replace(&mut merged, &tile, (col * w) as i64, (row * h) as i64);
    }
    Ok(merged)
}

/// Destination for rendered sample grids.
pub trait ImageSink {
    fn save(&self, path: &Path, image: &RgbImage) -> anyhow::Result<()>;
}

/// Writes sample grids to disk; the format follows the file extension.
#[derive(Debug, Clone, Copy, Default)]
pub struct PngSink;

impl ImageSink for PngSink {
    fn save(&self, path: &Path, image: &RgbImage) -> anyhow::Result<()> {
        image
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))
    }
}
