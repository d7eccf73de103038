//! Data module: owns the transform pipelines, splits the persisted sample
//! table by fold and builds the train, validation and test loaders.
//!
//! Rows whose fold equals `held_out_fold` validate; every other row trains.
//! Training order is reshuffled each epoch, validation order never changes.
//! The ordered loaders run on the calling thread: Burn's worker pool
//! interleaves batches in completion order.

use std::sync::Arc;

use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::tensor::backend::Backend;
use tracing::{info, warn};

use crate::config::DataConfig;
use crate::dataset::burn_dataset::{FailureLog, ShotBatch, ShotBatcher, ShotImageDataset};
use crate::dataset::table::SampleTable;
use crate::dataset::transform::Pipeline;
use crate::utils::error::{Result, ShotError};

/// Shared loader handle
pub type ShotDataLoader<B> = Arc<dyn DataLoader<B, ShotBatch<B>>>;

pub struct ShotDataModule {
    config: DataConfig,
    train_pipeline: Pipeline,
    valid_pipeline: Pipeline,
    train_dataset: Option<ShotImageDataset>,
    valid_dataset: Option<ShotImageDataset>,
    test_dataset: Option<ShotImageDataset>,
    failures: FailureLog,
}

impl ShotDataModule {
    pub fn new(config: DataConfig) -> Self {
        let size = config.image_size as u32;
        Self {
            train_pipeline: Pipeline::train(size),
            valid_pipeline: Pipeline::validation(size),
            config,
            train_dataset: None,
            valid_dataset: None,
            test_dataset: None,
            failures: FailureLog::new(),
        }
    }

    pub fn config(&self) -> &DataConfig {
        &self.config
    }

    /// Read the persisted table (and the optional test table) and build the splits
    pub fn setup(&mut self) -> Result<()> {
        let table = SampleTable::read_csv(&self.config.table_path)?;
        self.setup_from_table(&table);

        if let Some(test_path) = self.config.test_table_path.clone() {
            let test_table = SampleTable::read_csv(&test_path)?;
            info!("Test split: {} images from {:?}", test_table.len(), test_path);
            self.test_dataset = Some(
                ShotImageDataset::new(&test_table, Some(self.valid_pipeline.clone()))
                    .with_failure_log(self.failures.clone()),
            );
        }
        Ok(())
    }

    /// Build train and validation splits from an in-memory table
    pub fn setup_from_table(&mut self, table: &SampleTable) {
        let fold = self.config.held_out_fold;
        let train = table.outside_fold(fold);
        let valid = table.in_fold(fold);

        info!(
            "Held-out fold {}: {} training images, {} validation images",
            fold,
            train.len(),
            valid.len()
        );
        if valid.is_empty() {
            warn!("No rows have fold {}, the validation split is empty", fold);
        }

        self.train_dataset = Some(
            ShotImageDataset::new(&train, Some(self.train_pipeline.clone()))
                .with_seed(self.config.loader_seed)
                .with_failure_log(self.failures.clone()),
        );
        self.valid_dataset = Some(
            ShotImageDataset::new(&valid, Some(self.valid_pipeline.clone()))
                .with_failure_log(self.failures.clone()),
        );
    }

    pub fn train_dataset(&self) -> Option<&ShotImageDataset> {
        self.train_dataset.as_ref()
    }

    pub fn valid_dataset(&self) -> Option<&ShotImageDataset> {
        self.valid_dataset.as_ref()
    }

    pub fn test_dataset(&self) -> Option<&ShotImageDataset> {
        self.test_dataset.as_ref()
    }

    /// Advance the augmentation stream of the training split
    pub fn set_epoch(&self, epoch: usize) {
        if let Some(dataset) = &self.train_dataset {
            dataset.set_epoch(epoch);
        }
    }

    /// Decode failures from every split
    pub fn failure_log(&self) -> &FailureLog {
        &self.failures
    }

    /// Shuffled training batches, reshuffled every epoch
    pub fn train_dataloader<B: Backend>(&self, device: &B::Device) -> Result<ShotDataLoader<B>> {
        let dataset = self
            .train_dataset
            .clone()
            .ok_or_else(|| ShotError::Dataset("setup() has not been called".to_string()))?;
        let seed = self.config.loader_seed.unwrap_or_else(rand::random);

        Ok(DataLoaderBuilder::new(ShotBatcher::new(self.config.image_size))
            .batch_size(self.config.batch_size)
            .shuffle(seed)
            .num_workers(self.config.num_workers)
            .set_device(device.clone())
            .build(dataset))
    }

    /// Validation batches in table order
    pub fn val_dataloader<B: Backend>(&self, device: &B::Device) -> Result<ShotDataLoader<B>> {
        let dataset = self
            .valid_dataset
            .clone()
            .ok_or_else(|| ShotError::Dataset("setup() has not been called".to_string()))?;
        Ok(self.ordered_loader(dataset, device))
    }

    /// Test batches, when a test table is configured
    pub fn test_dataloader<B: Backend>(&self, device: &B::Device) -> Option<ShotDataLoader<B>> {
        self.test_dataset
            .clone()
            .map(|dataset| self.ordered_loader(dataset, device))
    }

    fn ordered_loader<B: Backend>(
        &self,
        dataset: ShotImageDataset,
        device: &B::Device,
    ) -> ShotDataLoader<B> {
        DataLoaderBuilder::new(ShotBatcher::new(self.config.image_size))
            .batch_size(self.config.batch_size)
            .set_device(device.clone())
            .build(dataset)
    }
}
