//! Burn Dataset Integration for shot frames
//!
//! `ShotImageDataset` implements Burn's `Dataset` trait over a slice of the
//! sample table. Every `get` re-reads and re-decodes the image and runs it
//! through the configured transform pipeline; nothing is cached.
//!
//! Burn's loader treats `None` from `get` as the end of the dataset, so a
//! decode failure would otherwise silently shorten the epoch. Failures are
//! therefore recorded in a shared [`FailureLog`] that the training driver
//! checks after every pass.
//!
//! With an augmentation seed, each item draws from its own `ChaCha8Rng`
//! keyed on (seed, epoch, index), so a run is reproducible regardless of
//! which loader worker decodes the item.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::{DynamicImage, ImageReader};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::dataset::table::SampleTable;
use crate::dataset::transform::Pipeline;
use crate::utils::error::{Result, ShotError};

/// Decode an image file into RGB channel order
pub fn load_rgb_image(path: &Path) -> Result<DynamicImage> {
    let img = ImageReader::open(path)
        .map_err(|e| ShotError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .with_guessed_format()
        .map_err(|e| ShotError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| ShotError::ImageLoad(path.to_path_buf(), e.to_string()))?;

    Ok(DynamicImage::ImageRgb8(img.to_rgb8()))
}

/// A single frame ready for Burn
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShotItem {
    /// Image data as flattened CHW float array [3 * H * W]
    pub image: Vec<f32>,
    /// Encoded class label
    pub label: usize,
    /// Image path (for debugging/logging)
    pub path: String,
}

/// Shared record of items that failed to load
#[derive(Clone, Debug, Default)]
pub struct FailureLog {
    failures: Arc<Mutex<Vec<String>>>,
}

impl FailureLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, error: &ShotError) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(error.to_string());
        }
    }

    /// Remove and return every recorded failure
    pub fn take(&self) -> Vec<String> {
        self.failures
            .lock()
            .map(|mut failures| std::mem::take(&mut *failures))
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.lock().map(|f| f.is_empty()).unwrap_or(true)
    }
}

/// Lazily-decoded image dataset over a sample table slice
#[derive(Debug, Clone)]
pub struct ShotImageDataset {
    samples: Vec<(PathBuf, usize)>,
    pipeline: Option<Pipeline>,
    failures: FailureLog,
    seed: Option<u64>,
    epoch: Arc<AtomicUsize>,
}

impl ShotImageDataset {
    pub fn new(table: &SampleTable, pipeline: Option<Pipeline>) -> Self {
        Self {
            samples: table
                .iter()
                .map(|r| (r.image_path.clone(), r.label))
                .collect(),
            pipeline,
            failures: FailureLog::new(),
            seed: None,
            epoch: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Draw augmentations from a seeded per-item generator
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Shared by every clone, including the ones held by loader workers
    pub fn set_epoch(&self, epoch: usize) {
        self.epoch.store(epoch, Ordering::Relaxed);
    }

    fn item_rng(&self, seed: u64, index: usize) -> ChaCha8Rng {
        let epoch = self.epoch.load(Ordering::Relaxed) as u64;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(epoch);
        rng.set_word_pos((index as u128) << 20);
        rng
    }

    /// Share an existing failure log instead of a private one
    pub fn with_failure_log(mut self, failures: FailureLog) -> Self {
        self.failures = failures;
        self
    }

    pub fn failure_log(&self) -> &FailureLog {
        &self.failures
    }

    /// Load, transform and pair one row with its label
    pub fn try_get(&self, index: usize) -> Result<ShotItem> {
        let (path, label) = self.samples.get(index).ok_or_else(|| {
            ShotError::Dataset(format!(
                "Index {} out of range for dataset of {} images",
                index,
                self.samples.len()
            ))
        })?;

        let img = load_rgb_image(path)?;
        let image = match (&self.pipeline, self.seed) {
            (Some(pipeline), Some(seed)) => pipeline.process(&img, &mut self.item_rng(seed, index)),
            (Some(pipeline), None) => pipeline.process(&img, &mut rand::thread_rng()),
            (None, _) => crate::dataset::transform::to_tensor_data(&img.to_rgb32f()),
        };

        Ok(ShotItem {
            image,
            label: *label,
            path: path.to_string_lossy().to_string(),
        })
    }

    /// Get the number of classes in the dataset
    pub fn num_classes(&self) -> usize {
        self.samples
            .iter()
            .map(|(_, label)| *label)
            .max()
            .map(|m| m + 1)
            .unwrap_or(0)
    }
}

impl Dataset<ShotItem> for ShotImageDataset {
    fn get(&self, index: usize) -> Option<ShotItem> {
        if index >= self.samples.len() {
            return None;
        }
        match self.try_get(index) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::error!("{}", e);
                self.failures.record(&e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// A batch of frames
#[derive(Clone, Debug)]
pub struct ShotBatch<B: Backend> {
    /// Batch of images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Batch of labels with shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

/// Stacks already-transformed items into tensors
#[derive(Clone, Debug)]
pub struct ShotBatcher {
    image_size: usize,
}

impl ShotBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, ShotItem, ShotBatch<B>> for ShotBatcher {
    fn batch(&self, items: Vec<ShotItem>, device: &B::Device) -> ShotBatch<B> {
        let batch_size = items.len();

        let images_data: Vec<f32> = items.iter().flat_map(|item| item.image.iter().copied()).collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, self.image_size, self.image_size]),
            device,
        );

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        ShotBatch { images, targets }
    }
}
