//! Single-file model checkpoint
//!
//! The file holds the classifier weights together with a JSON metadata blob
//! (hyperparameters, epochs trained, timestamp), so the model can be rebuilt
//! without any other artifact. It is written at exactly the configured path.

use std::fs;
use std::path::Path;

use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkBytesRecorder, Record, Recorder},
    tensor::backend::Backend,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::model::{ShotClassifier, ShotClassifierConfig};
use crate::utils::error::{Result, ShotError};

/// Everything needed to reconstruct the model shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub hparams: ShotClassifierConfig,
    pub epochs_trained: usize,
    pub class_names: Vec<String>,
    pub timestamp: String,
}

impl CheckpointMetadata {
    pub fn new(hparams: ShotClassifierConfig, epochs_trained: usize, class_names: Vec<String>) -> Self {
        Self {
            hparams,
            epochs_trained,
            class_names,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Record)]
struct CheckpointRecord<B: Backend> {
    model: <ShotClassifier<B> as Module<B>>::Record,
    metadata: String,
}

/// A restored model with its metadata
#[derive(Debug)]
pub struct Checkpoint<B: Backend> {
    pub model: ShotClassifier<B>,
    pub metadata: CheckpointMetadata,
}

fn recorder() -> NamedMpkBytesRecorder<FullPrecisionSettings> {
    NamedMpkBytesRecorder::<FullPrecisionSettings>::default()
}

impl<B: Backend> Checkpoint<B> {
    /// Write weights and metadata to `path`
    pub fn save(model: &ShotClassifier<B>, metadata: &CheckpointMetadata, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let record = CheckpointRecord::<B> {
            model: model.clone().into_record(),
            metadata: serde_json::to_string(metadata)?,
        };
        let bytes = Recorder::<B>::record(&recorder(), record, ())
            .map_err(|e| ShotError::Checkpoint(format!("Failed to serialize checkpoint: {:?}", e)))?;
        fs::write(path, bytes)?;

        info!("Checkpoint saved to {:?}", path);
        Ok(())
    }

    /// Rebuild the model from the stored hyperparameters and restore its weights
    pub fn load(path: &Path, device: &B::Device) -> Result<Self> {
        if !path.exists() {
            return Err(ShotError::PathNotFound(path.to_path_buf()));
        }
        let bytes = fs::read(path)?;
        let record: CheckpointRecord<B> = Recorder::<B>::load(&recorder(), bytes, device)
            .map_err(|e| ShotError::Checkpoint(format!("Failed to read checkpoint {:?}: {:?}", path, e)))?;

        let metadata: CheckpointMetadata = serde_json::from_str(&record.metadata)?;
        let model = metadata
            .hparams
            .init::<B>(device)
            .load_record(record.model);

        info!(
            "Checkpoint loaded from {:?} ({} epochs, {} classes)",
            path,
            metadata.epochs_trained,
            model.num_classes()
        );
        Ok(Self { model, metadata })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BackboneKind;
    use burn::tensor::{Tensor, Tolerance};
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    #[test]
    fn test_save_and_load_restores_model() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("model1.ckpt");
        let device = Default::default();

        let config = ShotClassifierConfig::new()
            .with_backbone(BackboneKind::ResNet18)
            .with_num_classes(3);
        let model = config.init::<TestBackend>(&device);
        let metadata = CheckpointMetadata::new(
            config.clone(),
            5,
            vec!["closeup".into(), "medium".into(), "wide".into()],
        );

        Checkpoint::save(&model, &metadata, &path).unwrap();
        assert!(path.exists());

        let restored = Checkpoint::<TestBackend>::load(&path, &device).unwrap();
        assert_eq!(restored.metadata.epochs_trained, 5);
        assert_eq!(restored.metadata.hparams.num_classes, 3);
        assert_eq!(restored.metadata.class_names.len(), 3);

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);
        let expected = model.forward(input.clone()).into_data();
        let actual = restored.model.forward(input).into_data();
        expected.assert_approx_eq::<f32>(&actual, Tolerance::default());
    }

    #[test]
    fn test_load_missing_checkpoint() {
        let device = Default::default();
        let result = Checkpoint::<TestBackend>::load(Path::new("/no/model1.ckpt"), &device);
        assert!(matches!(result, Err(ShotError::PathNotFound(_))));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model1.ckpt");
        fs::write(&path, b"not a checkpoint").unwrap();

        let device = Default::default();
        let result = Checkpoint::<TestBackend>::load(&path, &device);
        assert!(matches!(result, Err(ShotError::Checkpoint(_))));
    }

    #[test]
    fn test_load_rejects_truncated_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("model1.ckpt");
        let device = Default::default();

        let config = ShotClassifierConfig::new()
            .with_backbone(BackboneKind::ResNet18)
            .with_num_classes(2);
        let model = config.init::<TestBackend>(&device);
        let metadata = CheckpointMetadata::new(config, 1, vec!["closeup".into(), "wide".into()]);
        Checkpoint::save(&model, &metadata, &path).unwrap();

        let bytes = fs::read(&path).unwrap();
        fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

        let result = Checkpoint::<TestBackend>::load(&path, &device);
        assert!(matches!(result, Err(ShotError::Checkpoint(_))));
    }
}
