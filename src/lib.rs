//! # shotclass
//!
//! Shot-type classification of movie-trailer frames with the Burn framework.
//! A pretrained convolutional backbone is fine-tuned on one fold of a
//! stratified k-fold split.
//!
//! ## Modules
//!
//! - `dataset`: label extraction, indexing, fold assignment, transforms and loaders
//! - `model`: backbones and the classifier
//! - `training`: training driver, scheduling, metrics log and checkpoints
//! - `config`: experiment configuration
//! - `backend`: backend, precision and device selection
//! - `utils`: errors and logging
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use shotclass::{index_directory, assign_folds, ExperimentConfig};
//!
//! let config = ExperimentConfig::default();
//! let indexed = index_directory(&config.data.image_root)?;
//! let table = assign_folds(&indexed.table, &config.folds)?;
//! table.write_csv(&config.data.table_path)?;
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::{DataConfig, ExperimentConfig, FoldConfig, TrainingConfig};
pub use dataset::{
    assign_folds, extract_label, index_directory, DatasetStats, LabelMap, Pipeline, SampleRecord,
    SampleTable, ShotDataModule, ShotImageDataset,
};
pub use model::{BackboneKind, ShotClassifier, ShotClassifierConfig};
pub use training::{Checkpoint, TrainingDriver, TrainingOutcome};
pub use utils::error::{Result, ShotError};
