//! Model module
//!
//! This module provides:
//! - Pretrained feature backbones (EfficientNet-B0, ResNet-18) behind the
//!   `FeatureExtractor` interface
//! - The shot-type classifier: backbone plus a fresh linear head, with its
//!   optimizer configuration and per-batch steps

pub mod backbone;
pub mod classifier;

pub use backbone::{Backbone, BackboneKind, FeatureExtractor};
pub use classifier::{accuracy, ShotClassifier, ShotClassifierConfig, StepOutput};
