//! Shot-type classifier
//!
//! A pretrained [`Backbone`] whose classification layer is replaced by a
//! fresh linear head sized to the label count. The forward pass returns raw
//! logits; cross-entropy applies its own normalization.
//!
//! The training, validation and test steps compute cross-entropy and top-1
//! accuracy for one batch and report them to the run's [`MetricsLogger`].

use std::path::PathBuf;

use burn::{
    config::Config,
    module::Module,
    nn::{loss::CrossEntropyLossConfig, Linear, LinearConfig},
    optim::{AdamWConfig, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion, Int, Tensor,
    },
};

use crate::dataset::ShotBatch;
use crate::model::backbone::{Backbone, BackboneKind, FeatureExtractor};
use crate::training::metrics_log::MetricsLogger;
use crate::training::scheduler::LearningRateScheduler;

/// Classifier hyperparameters, stored with every checkpoint
#[derive(Config, Debug)]
pub struct ShotClassifierConfig {
    /// Number of shot-type classes
    #[config(default = "5")]
    pub num_classes: usize,

    /// Feature backbone architecture
    #[config(default = "BackboneKind::EfficientNetB0")]
    pub backbone: BackboneKind,

    /// Initial AdamW learning rate
    #[config(default = "1e-4")]
    pub learning_rate: f64,

    /// AdamW weight decay
    #[config(default = "1e-4")]
    pub weight_decay: f64,

    /// Epochs between learning rate decays
    #[config(default = "2")]
    pub lr_step_size: usize,

    /// Learning rate decay factor
    #[config(default = "0.1")]
    pub lr_gamma: f64,

    /// Backbone weights recorded with `CompactRecorder`
    pub pretrained_weights: Option<PathBuf>,
}

impl ShotClassifierConfig {
    /// Randomly initialized backbone and head
    pub fn init<B: Backend>(&self, device: &B::Device) -> ShotClassifier<B> {
        let backbone = Backbone::new(self.backbone, device);
        self.assemble(backbone, device)
    }

    /// Pretrained backbone (when weights are given) with a fresh head
    pub fn init_with_weights<B: Backend>(
        &self,
        weights: Option<&std::path::Path>,
        device: &B::Device,
    ) -> crate::utils::error::Result<ShotClassifier<B>> {
        let backbone = match weights {
            Some(path) => Backbone::pretrained(self.backbone, path, device)?,
            None => {
                tracing::warn!(
                    "No pretrained weights configured, {} starts from random initialization",
                    self.backbone
                );
                Backbone::new(self.backbone, device)
            }
        };
        Ok(self.assemble(backbone, device))
    }

    fn assemble<B: Backend>(&self, backbone: Backbone<B>, device: &B::Device) -> ShotClassifier<B> {
        let head = LinearConfig::new(backbone.feature_dim(), self.num_classes).init(device);
        ShotClassifier {
            backbone,
            head,
            num_classes: self.num_classes,
        }
    }
}

/// Loss and accuracy of one batch
#[derive(Debug, Clone)]
pub struct StepOutput<B: Backend> {
    pub loss: Tensor<B, 1>,
    pub accuracy: f64,
    pub batch_size: usize,
}

impl<B: Backend> StepOutput<B> {
    pub fn loss_value(&self) -> f64 {
        self.loss.clone().into_scalar().elem::<f64>()
    }
}

/// Backbone plus linear classification head
#[derive(Module, Debug)]
pub struct ShotClassifier<B: Backend> {
    backbone: Backbone<B>,
    head: Linear<B>,
    num_classes: usize,
}

impl<B: Backend> ShotClassifier<B> {
    /// Raw class logits, shape `[batch, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.backbone.forward_features(images);
        self.head.forward(features)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn backbone_kind(&self) -> BackboneKind {
        self.backbone.kind()
    }

    /// Cross-entropy and top-1 accuracy for one batch
    pub fn forward_step(&self, batch: ShotBatch<B>) -> StepOutput<B> {
        let batch_size = batch.targets.dims()[0];
        let logits = self.forward(batch.images);

        let loss = CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits.clone(), batch.targets.clone());

        StepOutput {
            loss,
            accuracy: accuracy(logits, batch.targets),
            batch_size,
        }
    }

    /// Log `val_loss` and `val_acc_step`; the epoch aggregate comes from the logger
    pub fn validation_step(&self, batch: ShotBatch<B>, logger: &mut MetricsLogger) -> crate::utils::error::Result<()> {
        let output = self.forward_step(batch);
        logger.log_step("val_loss", output.loss_value(), output.batch_size)?;
        logger.log_step("val_acc_step", output.accuracy, output.batch_size)?;
        Ok(())
    }

    /// Accumulate `test_loss` and `test_acc` over the whole test pass
    pub fn test_step(&self, batch: ShotBatch<B>, logger: &mut MetricsLogger) {
        let output = self.forward_step(batch);
        logger.accumulate("test_loss", output.loss_value(), output.batch_size);
        logger.accumulate("test_acc", output.accuracy, output.batch_size);
    }
}

impl<B: AutodiffBackend> ShotClassifier<B> {
    /// Log `train_loss` and `train_acc_step`, return the loss to backpropagate
    pub fn training_step(&self, batch: ShotBatch<B>, logger: &mut MetricsLogger) -> crate::utils::error::Result<Tensor<B, 1>> {
        let output = self.forward_step(batch);
        logger.log_step("train_loss", output.loss_value(), output.batch_size)?;
        logger.log_step("train_acc_step", output.accuracy, output.batch_size)?;
        Ok(output.loss)
    }

    /// AdamW over every parameter plus the step-decay schedule
    pub fn configure_optimizers(
        config: &ShotClassifierConfig,
    ) -> (impl Optimizer<ShotClassifier<B>, B>, LearningRateScheduler) {
        let optimizer = AdamWConfig::new()
            .with_weight_decay(config.weight_decay as f32)
            .init::<B, ShotClassifier<B>>();
        let scheduler =
            LearningRateScheduler::step_lr(config.learning_rate, config.lr_step_size, config.lr_gamma);
        (optimizer, scheduler)
    }
}

/// Fraction of rows whose highest logit matches the target
pub fn accuracy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> f64 {
    let batch_size = targets.dims()[0];
    if batch_size == 0 {
        return 0.0;
    }
    let predictions = logits.argmax(1).reshape([batch_size]);
    let correct: i64 = predictions
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem();
    correct as f64 / batch_size as f64
}
