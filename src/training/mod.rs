//! Training module
//!
//! This module provides:
//! - The training driver (epoch loop, validation, optional test pass)
//! - Step-decay learning rate scheduling
//! - The versioned CSV metrics log
//! - Single-file checkpoints

pub mod checkpoint;
pub mod driver;
pub mod metrics_log;
pub mod scheduler;

// Re-export main types for convenience
pub use checkpoint::{Checkpoint, CheckpointMetadata};
pub use driver::{EpochSummary, TrainingDriver, TrainingOutcome};
pub use metrics_log::{read_metrics, MetricsLogger};
pub use scheduler::{LearningRateScheduler, SchedulerType};
