//! Error Handling Module
//!
//! Defines the error type for the shot classification library.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for shot classification operations
#[derive(Error, Debug)]
pub enum ShotError {
    /// Error loading or decoding an image
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// File name carries no `_<label>` suffix
    #[error("Cannot extract a label from '{0}': file name has no '_<label>' suffix")]
    MalformedFileName(PathBuf),

    /// Error with dataset operations
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error while assigning cross-validation folds
    #[error("Fold assignment error: {0}")]
    Fold(String),

    /// Error reading or writing the sample table
    #[error("Sample table error: {0}")]
    Table(String),

    /// Error with model operations
    #[error("Model error: {0}")]
    Model(String),

    /// Error writing or reading a checkpoint
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Error with training
    #[error("Training error: {0}")]
    Training(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

impl From<serde_json::Error> for ShotError {
    fn from(err: serde_json::Error) -> Self {
        ShotError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for ShotError {
    fn from(err: csv::Error) -> Self {
        ShotError::Table(err.to_string())
    }
}

/// Convenience Result type for shot classification operations
pub type Result<T> = std::result::Result<T, ShotError>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| ShotError::Dataset(format!("{}: {}", f(), e)))
    }
}
