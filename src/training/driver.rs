//! Training driver
//!
//! Runs the epoch loop over a [`ShotDataModule`] and a [`ShotClassifier`]:
//!
//! 1. every training batch: `training_step`, backward pass, AdamW step
//! 2. every validation batch: `validation_step` on the inference copy of the model
//! 3. epoch aggregates and the learning rate go to the metrics log, then the
//!    step-decay schedule advances
//!
//! After the last epoch an optional test pass runs (only when a test table
//! is configured) and a single checkpoint is written.
//!
//! A decode failure anywhere ends the run: the loader cannot report it, so
//! the shared failure log and the number of items actually seen are checked
//! after every pass.

use std::collections::BTreeMap;
use std::path::PathBuf;

use burn::{
    data::dataset::Dataset,
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer},
    tensor::backend::AutodiffBackend,
};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ExperimentConfig;
use crate::dataset::{LabelMap, ShotDataModule, ShotImageDataset};
use crate::model::ShotClassifier;
use crate::training::checkpoint::{Checkpoint, CheckpointMetadata};
use crate::training::metrics_log::MetricsLogger;
use crate::utils::error::{Result, ShotError};
use crate::utils::logging::EpochLogger;

/// Aggregated metrics of one epoch
#[derive(Debug, Clone, Serialize)]
pub struct EpochSummary {
    pub epoch: usize,
    pub learning_rate: f64,
    pub train_loss: f64,
    pub train_acc: f64,
    pub val_loss: Option<f64>,
    pub val_acc: Option<f64>,
}

impl EpochSummary {
    fn from_aggregates(epoch: usize, learning_rate: f64, aggregates: &BTreeMap<String, f64>) -> Self {
        let get = |name: &str| aggregates.get(name).copied();
        Self {
            epoch,
            learning_rate,
            train_loss: get("train_loss").unwrap_or(f64::NAN),
            train_acc: get("train_acc_step").unwrap_or(f64::NAN),
            val_loss: get("val_loss"),
            val_acc: get("val_acc_step"),
        }
    }
}

/// Result of a complete run
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub epochs: Vec<EpochSummary>,
    /// `test_loss` / `test_acc`, when a test table was configured
    pub test_metrics: Option<BTreeMap<String, f64>>,
    pub checkpoint_path: PathBuf,
    pub log_dir: PathBuf,
}

/// Hyperparameters recorded when a run starts
#[derive(Serialize)]
struct RunHyperparams<'a> {
    #[serde(flatten)]
    experiment: &'a ExperimentConfig,
    backend: &'static str,
    classes: Option<&'a [String]>,
}

/// Drives one single-device training run
pub struct TrainingDriver<'a> {
    config: &'a ExperimentConfig,
    label_map: Option<&'a LabelMap>,
    show_progress: bool,
}

impl<'a> TrainingDriver<'a> {
    pub fn new(config: &'a ExperimentConfig) -> Self {
        Self {
            config,
            label_map: None,
            show_progress: true,
        }
    }

    /// Check `num_classes` against this map and store class names in the checkpoint
    pub fn with_label_map(mut self, label_map: &'a LabelMap) -> Self {
        self.label_map = Some(label_map);
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Train, evaluate and checkpoint
    pub fn run<B: AutodiffBackend>(
        &self,
        data: &ShotDataModule,
        device: &B::Device,
    ) -> Result<TrainingOutcome> {
        let model_config = &self.config.model;
        let training = &self.config.training;

        if let Some(label_map) = self.label_map {
            if label_map.len() != model_config.num_classes {
                return Err(ShotError::Config(format!(
                    "num_classes is {} but the label map has {} classes",
                    model_config.num_classes,
                    label_map.len()
                )));
            }
        }

        let train_dataset = data
            .train_dataset()
            .ok_or_else(|| ShotError::Training("Data module has not been set up".to_string()))?;
        let expected_train = train_dataset.len();
        let expected_valid = data.valid_dataset().map(|d| d.len()).unwrap_or(0);
        if expected_train == 0 {
            return Err(ShotError::Training("Training split is empty".to_string()));
        }
        check_labels(train_dataset, model_config.num_classes)?;

        B::seed(device, training.seed);

        let mut logger = MetricsLogger::create(&training.log_dir, &training.run_name)?;
        logger.log_hyperparams(&RunHyperparams {
            experiment: self.config,
            backend: crate::backend::backend_name(),
            classes: self.label_map.map(|m| m.classes()),
        })?;

        let weights = self.config.resolve_pretrained_weights();
        let mut model: ShotClassifier<B> = model_config.init_with_weights(weights.as_deref(), device)?;
        let (mut optimizer, mut scheduler) = ShotClassifier::<B>::configure_optimizers(model_config);

        let train_loader = data.train_dataloader::<B>(device)?;
        let valid_loader = data.val_dataloader::<B::InnerBackend>(device)?;

        println!("{}", "Starting Training...".green().bold());
        println!("  Backbone:   {}", model_config.backbone);
        println!("  Classes:    {}", model_config.num_classes);
        println!("  Train/Val:  {} / {}", expected_train, expected_valid);
        println!("  Epochs:     {}", training.num_epochs);
        println!("  Batch size: {}", data.config().batch_size);
        println!();

        let mut epoch_logger = EpochLogger::new(training.num_epochs);
        let mut epochs = Vec::with_capacity(training.num_epochs);

        for epoch in 0..training.num_epochs {
            let learning_rate = scheduler.get_lr();
            logger.set_epoch(epoch);
            data.set_epoch(epoch);
            logger.log_value("lr-AdamW", learning_rate)?;
            epoch_logger.start_epoch(epoch, learning_rate);

            // Training phase
            let progress = self.progress_bar(expected_train, "train");
            let mut seen = 0;
            for batch in train_loader.iter() {
                let batch_size = batch.targets.dims()[0];
                let loss = model.training_step(batch, &mut logger)?;
                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(learning_rate, model, grads);
                logger.advance_step();

                seen += batch_size;
                progress.inc(batch_size as u64);
            }
            progress.finish_and_clear();
            check_pass(data, "training", seen, expected_train)?;

            // Validation phase
            let model_valid = model.valid();
            let progress = self.progress_bar(expected_valid, "valid");
            let mut seen = 0;
            for batch in valid_loader.iter() {
                let batch_size = batch.targets.dims()[0];
                model_valid.validation_step(batch, &mut logger)?;

                seen += batch_size;
                progress.inc(batch_size as u64);
            }
            progress.finish_and_clear();
            check_pass(data, "validation", seen, expected_valid)?;

            let aggregates = logger.flush_epoch()?;
            let summary = EpochSummary::from_aggregates(epoch, learning_rate, &aggregates);
            epoch_logger.end_epoch(summary.train_loss, summary.train_acc, summary.val_loss, summary.val_acc);
            epochs.push(summary);

            scheduler.step();
        }
        epoch_logger.log_complete();

        let model_valid = model.valid();
        let test_metrics = match data.test_dataloader::<B::InnerBackend>(device) {
            Some(test_loader) => {
                let expected = data.test_dataset().map(|d| d.len()).unwrap_or(0);
                let progress = self.progress_bar(expected, "test");
                let mut seen = 0;
                for batch in test_loader.iter() {
                    let batch_size = batch.targets.dims()[0];
                    model_valid.test_step(batch, &mut logger);

                    seen += batch_size;
                    progress.inc(batch_size as u64);
                }
                progress.finish_and_clear();
                check_pass(data, "test", seen, expected)?;

                let metrics = logger.flush_aggregates()?;
                info!("Test metrics: {:?}", metrics);
                Some(metrics)
            }
            None => {
                info!("No test table configured, skipping the test pass");
                None
            }
        };

        let class_names = self
            .label_map
            .map(|m| m.classes().to_vec())
            .unwrap_or_default();
        let metadata = CheckpointMetadata::new(model_config.clone(), training.num_epochs, class_names);
        Checkpoint::save(&model_valid, &metadata, &training.checkpoint_path)?;

        println!("{}", "Training Complete!".green().bold());
        println!("  Checkpoint: {:?}", training.checkpoint_path);
        println!("  Metrics:    {:?}", logger.metrics_path());

        Ok(TrainingOutcome {
            epochs,
            test_metrics,
            checkpoint_path: training.checkpoint_path.clone(),
            log_dir: logger.dir().to_path_buf(),
        })
    }

    fn progress_bar(&self, len: usize, phase: &str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let progress = ProgressBar::new(len as u64);
        let style = ProgressStyle::default_bar()
            .template("{prefix:>5} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} images ({eta})")
            .map(|style| style.progress_chars("=>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        progress.set_style(style);
        progress.set_prefix(phase.to_string());
        progress
    }
}

/// Fail the run when any item failed to load or the pass ended early
fn check_pass(data: &ShotDataModule, phase: &str, seen: usize, expected: usize) -> Result<()> {
    let failures = data.failure_log().take();
    if let Some(first) = failures.first() {
        return Err(ShotError::Training(format!(
            "{} pass aborted, {} image(s) failed to load: {}",
            phase,
            failures.len(),
            first
        )));
    }
    if seen != expected {
        return Err(ShotError::Training(format!(
            "{} pass saw {} of {} images",
            phase, seen, expected
        )));
    }
    Ok(())
}

/// Every label must index a logit column
fn check_labels(dataset: &ShotImageDataset, num_classes: usize) -> Result<()> {
    let needed = dataset.num_classes();
    if needed > num_classes {
        return Err(ShotError::Config(format!(
            "Labels go up to {} but num_classes is {}",
            needed - 1,
            num_classes
        )));
    }
    if needed < num_classes {
        warn!(
            "Training split uses {} of {} classes",
            needed, num_classes
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{SampleRecord, SampleTable};
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray>;

    #[test]
    fn test_check_pass_reports_failures() {
        let dir = TempDir::new().unwrap();
        let table: SampleTable = vec![SampleRecord {
            image_path: dir.path().join("missing_wide.jpg"),
            label: 0,
            fold: Some(0),
        }]
        .into_iter()
        .collect();

        let mut data = ShotDataModule::new(crate::config::DataConfig {
            num_workers: 0,
            ..Default::default()
        });
        data.setup_from_table(&table);
        let _ = data.train_dataset().unwrap().get(0);

        let err = check_pass(&data, "training", 0, 1).unwrap_err();
        assert!(err.to_string().contains("failed to load"));
        // The log is drained by the check
        assert!(check_pass(&data, "training", 1, 1).is_ok());
    }

    #[test]
    fn test_check_pass_short_epoch() {
        let data = ShotDataModule::new(crate::config::DataConfig::default());
        assert!(check_pass(&data, "validation", 2, 3).is_err());
        assert!(check_pass(&data, "validation", 3, 3).is_ok());
    }

    #[test]
    fn test_label_map_mismatch_is_config_error() {
        let mut config = ExperimentConfig::default();
        config.model.num_classes = 4;
        let label_map = LabelMap::fit(["a", "b"]);

        let data = ShotDataModule::new(config.data.clone());
        let result = TrainingDriver::new(&config)
            .with_label_map(&label_map)
            .with_progress(false)
            .run::<TestBackend>(&data, &Default::default());
        assert!(matches!(result, Err(ShotError::Config(_))));
    }

    #[test]
    fn test_run_requires_setup() {
        let config = ExperimentConfig::default();
        let data = ShotDataModule::new(config.data.clone());
        let result = TrainingDriver::new(&config)
            .with_progress(false)
            .run::<TestBackend>(&data, &Default::default());
        assert!(matches!(result, Err(ShotError::Training(_))));
    }

    #[test]
    fn test_labels_beyond_head_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip_wide.png");
        RgbImage::from_pixel(8, 8, Rgb([1, 2, 3])).save(&path).unwrap();
        let table: SampleTable = vec![SampleRecord::new(path, 6)].into_iter().collect();
        let dataset = ShotImageDataset::new(&table, None);

        assert!(matches!(check_labels(&dataset, 5), Err(ShotError::Config(_))));
        assert!(check_labels(&dataset, 7).is_ok());
    }
}
