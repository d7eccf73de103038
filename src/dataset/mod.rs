//! Dataset module for shot frames
//!
//! This module provides functionality for:
//! - Extracting labels from file names and encoding them
//! - Indexing the image tree into a sample table
//! - Stratified k-fold assignment and CSV persistence of the table
//! - Training and validation transform pipelines
//! - Burn datasets, batchers and the data module that wires them together
//!
//! ## Preparation flow
//!
//! 1. `indexer::index_directory` walks `root/*/*.jpg` and encodes labels
//! 2. `folds::assign_folds` shuffles the table and assigns a fold per row
//! 3. `SampleTable::write_csv` persists `image_id,label,kfold`
//! 4. `ShotDataModule::setup` reads it back and splits on the held-out fold

pub mod burn_dataset;
pub mod data_module;
pub mod folds;
pub mod indexer;
pub mod labels;
pub mod table;
pub mod transform;

// Re-export main types for convenience
pub use burn_dataset::{FailureLog, ShotBatch, ShotBatcher, ShotImageDataset, ShotItem};
pub use data_module::{ShotDataLoader, ShotDataModule};
pub use folds::{assign_folds, stratified_fold_ids};
pub use indexer::{index_directory, DatasetStats, IndexedDataset};
pub use labels::{extract_label, LabelMap};
pub use table::{SampleRecord, SampleTable};
pub use transform::{ImageOp, Pipeline, Stage};
