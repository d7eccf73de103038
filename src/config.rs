//! Experiment configuration.
//!
//! Every path, hyperparameter and split choice of a run lives here instead of
//! being embedded in the pipeline code. The whole tree is stored as JSON.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backend::Precision;
use crate::model::ShotClassifierConfig;
use crate::utils::error::{Result, ShotError};

/// Environment variable overriding where relative pretrained weights are looked up
pub const CACHE_DIR_ENV: &str = "SHOTCLASS_CACHE_DIR";

/// Complete configuration for one preparation + training run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Data locations and loader settings
    pub data: DataConfig,
    /// Cross-validation fold assignment
    pub folds: FoldConfig,
    /// Classifier hyperparameters
    pub model: ShotClassifierConfig,
    /// Training loop settings
    pub training: TrainingConfig,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            data: DataConfig::default(),
            folds: FoldConfig::default(),
            model: ShotClassifierConfig::new(),
            training: TrainingConfig::default(),
        }
    }
}

impl ExperimentConfig {
    /// Load a configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ShotError::PathNotFound(path.to_path_buf()));
        }
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<()> {
        if self.folds.num_folds < 2 {
            return Err(ShotError::Config(format!(
                "num_folds must be at least 2, got {}",
                self.folds.num_folds
            )));
        }
        if self.data.held_out_fold >= self.folds.num_folds {
            // Not fatal: the validation split simply ends up empty
            tracing::warn!(
                "held_out_fold {} is outside 0..{}, validation split will be empty",
                self.data.held_out_fold,
                self.folds.num_folds
            );
        }
        if self.data.batch_size == 0 {
            return Err(ShotError::Config("batch_size must be positive".to_string()));
        }
        if self.data.image_size == 0 {
            return Err(ShotError::Config("image_size must be positive".to_string()));
        }
        if self.model.num_classes == 0 {
            return Err(ShotError::Config("num_classes must be positive".to_string()));
        }
        if self.model.lr_step_size == 0 {
            return Err(ShotError::Config("lr_step_size must be positive".to_string()));
        }
        Ok(())
    }

    /// Resolve the pretrained weights path against the cache directory override
    pub fn resolve_pretrained_weights(&self) -> Option<PathBuf> {
        let cache_dir = std::env::var_os(CACHE_DIR_ENV).map(PathBuf::from);
        resolve_weights_path(self.model.pretrained_weights.as_deref(), cache_dir.as_deref())
    }
}

fn resolve_weights_path(weights: Option<&Path>, cache_dir: Option<&Path>) -> Option<PathBuf> {
    let weights = weights?;
    match cache_dir {
        Some(dir) if weights.is_relative() => Some(dir.join(weights)),
        _ => Some(weights.to_path_buf()),
    }
}

/// Data locations and loader settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Root of the `root/<subdir>/<name>_<label>.jpg` image tree
    pub image_root: PathBuf,
    /// Persisted sample table (written by `prepare`, read by `train`)
    pub table_path: PathBuf,
    /// Persisted label code map
    pub label_map_path: PathBuf,
    /// Output side length of both transform pipelines
    pub image_size: usize,
    /// Batch size for all loaders
    pub batch_size: usize,
    /// Parallel data-loading workers
    pub num_workers: usize,
    /// Fold used for validation, every other fold trains
    pub held_out_fold: usize,
    /// Optional table evaluated once after training
    pub test_table_path: Option<PathBuf>,
    /// Seed for the per-epoch training shuffle and augmentation draws (random when absent)
    pub loader_seed: Option<u64>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            image_root: PathBuf::from("data/frames"),
            table_path: PathBuf::from("train_folds.csv"),
            label_map_path: PathBuf::from("label_map.json"),
            image_size: 128,
            batch_size: 128,
            num_workers: 12,
            held_out_fold: 1,
            test_table_path: None,
            loader_seed: None,
        }
    }
}

/// Cross-validation fold assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FoldConfig {
    /// Number of folds
    pub num_folds: usize,
    /// Shuffle seed, `None` draws fresh entropy on every run
    pub seed: Option<u64>,
}

impl Default for FoldConfig {
    fn default() -> Self {
        Self {
            num_folds: 5,
            seed: Some(42),
        }
    }
}

/// Training loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Number of epochs
    pub num_epochs: usize,
    /// Arithmetic precision
    pub precision: Precision,
    /// Accelerator index
    pub device_index: usize,
    /// Root directory of the metrics logs
    pub log_dir: PathBuf,
    /// Run name, one subdirectory of `log_dir`
    pub run_name: String,
    /// Final checkpoint file
    pub checkpoint_path: PathBuf,
    /// Seed for parameter initialization
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            num_epochs: 5,
            precision: Precision::Half,
            device_index: 0,
            log_dir: PathBuf::from("logs"),
            run_name: "eff-b5".to_string(),
            checkpoint_path: PathBuf::from("model1.ckpt"),
            seed: 42,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ExperimentConfig::default();
        assert_eq!(config.data.image_size, 128);
        assert_eq!(config.data.batch_size, 128);
        assert_eq!(config.data.held_out_fold, 1);
        assert_eq!(config.folds.num_folds, 5);
        assert_eq!(config.folds.seed, Some(42));
        assert_eq!(config.model.num_classes, 5);
        assert_eq!(config.training.num_epochs, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("experiment.json");

        let mut config = ExperimentConfig::default();
        config.data.held_out_fold = 3;
        config.folds.seed = None;
        config.save(&path).unwrap();

        let loaded = ExperimentConfig::load(&path).unwrap();
        assert_eq!(loaded.data.held_out_fold, 3);
        assert_eq!(loaded.folds.seed, None);
        assert_eq!(loaded.training.precision, Precision::Half);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ExperimentConfig =
            serde_json::from_str(r#"{"data": {"batch_size": 16}}"#).unwrap();
        assert_eq!(config.data.batch_size, 16);
        assert_eq!(config.data.table_path, PathBuf::from("train_folds.csv"));
        assert_eq!(config.folds.num_folds, 5);
    }

    #[test]
    fn test_load_missing_file() {
        let result = ExperimentConfig::load("/definitely/not/here.json");
        assert!(matches!(result, Err(ShotError::PathNotFound(_))));
    }

    #[test]
    fn test_validate_rejects_single_fold() {
        let mut config = ExperimentConfig::default();
        config.folds.num_folds = 1;
        assert!(matches!(config.validate(), Err(ShotError::Config(_))));
    }

    #[test]
    fn test_held_out_fold_out_of_range_is_not_fatal() {
        let mut config = ExperimentConfig::default();
        config.data.held_out_fold = 9;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolve_weights_path() {
        let cache = Path::new("/cache");
        assert_eq!(
            resolve_weights_path(Some(Path::new("effnet.mpk")), Some(cache)),
            Some(PathBuf::from("/cache/effnet.mpk"))
        );
        assert_eq!(
            resolve_weights_path(Some(Path::new("/abs/effnet.mpk")), Some(cache)),
            Some(PathBuf::from("/abs/effnet.mpk"))
        );
        assert_eq!(
            resolve_weights_path(Some(Path::new("effnet.mpk")), None),
            Some(PathBuf::from("effnet.mpk"))
        );
        assert_eq!(resolve_weights_path(None, Some(cache)), None);
    }
}
