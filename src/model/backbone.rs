//! Image feature backbones.
//!
//! A backbone turns a `[batch, 3, H, W]` image tensor into a
//! `[batch, feature_dim]` feature matrix. The classifier only sees the
//! [`FeatureExtractor`] interface, so architectures are interchangeable.
//!
//! Implements:
//! - EfficientNet-B0 (MBConv blocks with squeeze-and-excitation)
//! - ResNet-18 (basic residual blocks)

use std::path::Path;

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, PaddingConfig2d, Relu,
    },
    record::CompactRecorder,
    tensor::{activation, backend::Backend, Tensor},
};
use serde::{Deserialize, Serialize};

use crate::utils::error::{Result, ShotError};

/// Feature extraction capability of a pretrained network
pub trait FeatureExtractor<B: Backend> {
    /// Pooled features, shape `[batch, feature_dim]`
    fn forward_features(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;

    /// Width of the feature vector
    fn feature_dim(&self) -> usize;
}

/// Supported backbone architectures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum BackboneKind {
    #[default]
    #[serde(rename = "efficientnet-b0")]
    EfficientNetB0,
    #[serde(rename = "resnet18")]
    ResNet18,
}

impl BackboneKind {
    pub fn feature_dim(&self) -> usize {
        match self {
            BackboneKind::EfficientNetB0 => 1280,
            BackboneKind::ResNet18 => 512,
        }
    }
}

impl std::fmt::Display for BackboneKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackboneKind::EfficientNetB0 => write!(f, "efficientnet-b0"),
            BackboneKind::ResNet18 => write!(f, "resnet18"),
        }
    }
}

impl std::str::FromStr for BackboneKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "efficientnet-b0" | "efficientnet_b0" | "efficientnet" => Ok(BackboneKind::EfficientNetB0),
            "resnet18" | "resnet-18" | "resnet" => Ok(BackboneKind::ResNet18),
            other => Err(format!("Unknown backbone '{}'", other)),
        }
    }
}

/// Backbone selected at runtime
#[derive(Module, Debug)]
pub enum Backbone<B: Backend> {
    EfficientNetB0(EfficientNetB0<B>),
    ResNet18(ResNet18<B>),
}

impl<B: Backend> Backbone<B> {
    /// Create a randomly initialized backbone
    pub fn new(kind: BackboneKind, device: &B::Device) -> Self {
        match kind {
            BackboneKind::EfficientNetB0 => Backbone::EfficientNetB0(EfficientNetB0::new(device)),
            BackboneKind::ResNet18 => Backbone::ResNet18(ResNet18::new(device)),
        }
    }

    /// Create a backbone and restore pretrained weights from a recorder file
    pub fn pretrained(kind: BackboneKind, weights: &Path, device: &B::Device) -> Result<Self> {
        if !weights.exists() {
            return Err(ShotError::PathNotFound(weights.to_path_buf()));
        }
        let backbone = Self::new(kind, device)
            .load_file(weights.to_path_buf(), &CompactRecorder::new(), device)
            .map_err(|e| {
                ShotError::Model(format!("Failed to load {} weights from {:?}: {}", kind, weights, e))
            })?;
        tracing::info!("Loaded pretrained {} weights from {:?}", kind, weights);
        Ok(backbone)
    }

    pub fn kind(&self) -> BackboneKind {
        match self {
            Backbone::EfficientNetB0(_) => BackboneKind::EfficientNetB0,
            Backbone::ResNet18(_) => BackboneKind::ResNet18,
        }
    }
}

impl<B: Backend> FeatureExtractor<B> for Backbone<B> {
    fn forward_features(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        match self {
            Backbone::EfficientNetB0(model) => model.forward_features(images),
            Backbone::ResNet18(model) => model.forward_features(images),
        }
    }

    fn feature_dim(&self) -> usize {
        self.kind().feature_dim()
    }
}

/// Conv2d followed by BatchNorm
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
}

impl<B: Backend> ConvBn<B> {
    fn new(
        channels: [usize; 2],
        kernel_size: usize,
        stride: usize,
        groups: usize,
        device: &B::Device,
    ) -> Self {
        let padding = kernel_size / 2;
        let conv = Conv2dConfig::new(channels, [kernel_size, kernel_size])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_groups(groups)
            .with_bias(false)
            .init(device);
        let bn = BatchNormConfig::new(channels[1]).init(device);
        Self { conv, bn }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// Channel attention: pool, squeeze, expand, gate
#[derive(Module, Debug)]
pub struct SqueezeExcitation<B: Backend> {
    pool: AdaptiveAvgPool2d,
    reduce: Conv2d<B>,
    expand: Conv2d<B>,
}

impl<B: Backend> SqueezeExcitation<B> {
    fn new(channels: usize, squeezed: usize, device: &B::Device) -> Self {
        Self {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            reduce: Conv2dConfig::new([channels, squeezed], [1, 1]).init(device),
            expand: Conv2dConfig::new([squeezed, channels], [1, 1]).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let scale = self.pool.forward(x.clone());
        let scale = activation::silu(self.reduce.forward(scale));
        let scale = activation::sigmoid(self.expand.forward(scale));
        x * scale
    }
}

/// Mobile inverted bottleneck block
#[derive(Module, Debug)]
pub struct MBConv<B: Backend> {
    expand: Option<ConvBn<B>>,
    depthwise: ConvBn<B>,
    se: SqueezeExcitation<B>,
    project: ConvBn<B>,
}

impl<B: Backend> MBConv<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        expand_ratio: usize,
        kernel_size: usize,
        stride: usize,
        device: &B::Device,
    ) -> Self {
        let hidden = in_channels * expand_ratio;
        let expand = (expand_ratio != 1).then(|| ConvBn::new([in_channels, hidden], 1, 1, 1, device));
        let depthwise = ConvBn::new([hidden, hidden], kernel_size, stride, hidden, device);
        let se = SqueezeExcitation::new(hidden, (in_channels / 4).max(1), device);
        let project = ConvBn::new([hidden, out_channels], 1, 1, 1, device);

        Self {
            expand,
            depthwise,
            se,
            project,
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = input.clone();
        if let Some(expand) = &self.expand {
            x = activation::silu(expand.forward(x));
        }
        x = activation::silu(self.depthwise.forward(x));
        x = self.se.forward(x);
        x = self.project.forward(x);

        // Identity skip when the block keeps the shape
        if x.dims() == input.dims() {
            x + input
        } else {
            x
        }
    }
}

/// EfficientNet-B0 stages: (expand ratio, output channels, repeats, stride, kernel)
const EFFICIENTNET_B0_STAGES: [(usize, usize, usize, usize, usize); 7] = [
    (1, 16, 1, 1, 3),
    (6, 24, 2, 2, 3),
    (6, 40, 2, 2, 5),
    (6, 80, 3, 2, 3),
    (6, 112, 3, 1, 5),
    (6, 192, 4, 2, 5),
    (6, 320, 1, 1, 3),
];

/// EfficientNet-B0 feature extractor
///
/// - Stem: Conv 3x3, stride 2, 32 channels
/// - 16 MBConv blocks in 7 stages
/// - Head: Conv 1x1 to 1280 channels, global average pooling, dropout
#[derive(Module, Debug)]
pub struct EfficientNetB0<B: Backend> {
    stem: ConvBn<B>,
    blocks: Vec<MBConv<B>>,
    head: ConvBn<B>,
    pool: AdaptiveAvgPool2d,
    dropout: Dropout,
}

impl<B: Backend> EfficientNetB0<B> {
    pub fn new(device: &B::Device) -> Self {
        let stem = ConvBn::new([3, 32], 3, 2, 1, device);

        let mut blocks = Vec::new();
        let mut in_channels = 32;
        for (expand_ratio, out_channels, repeats, stride, kernel) in EFFICIENTNET_B0_STAGES {
            for i in 0..repeats {
                let stride = if i == 0 { stride } else { 1 };
                blocks.push(MBConv::new(in_channels, out_channels, expand_ratio, kernel, stride, device));
                in_channels = out_channels;
            }
        }

        Self {
            stem,
            blocks,
            head: ConvBn::new([in_channels, 1280], 1, 1, 1, device),
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            dropout: DropoutConfig::new(0.2).init(),
        }
    }
}

impl<B: Backend> FeatureExtractor<B> for EfficientNetB0<B> {
    fn forward_features(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = activation::silu(self.stem.forward(images));
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x = activation::silu(self.head.forward(x));
        let x = self.pool.forward(x);

        // Flatten [batch, channels, 1, 1] -> [batch, channels]
        let [batch, channels, _, _] = x.dims();
        self.dropout.forward(x.reshape([batch, channels]))
    }

    fn feature_dim(&self) -> usize {
        1280
    }
}

/// Two 3x3 convolutions with a residual connection
#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    conv1: ConvBn<B>,
    conv2: ConvBn<B>,
    downsample: Option<ConvBn<B>>,
    activation: Relu,
}

impl<B: Backend> BasicBlock<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        let downsample = (stride != 1 || in_channels != out_channels)
            .then(|| ConvBn::new([in_channels, out_channels], 1, stride, 1, device));

        Self {
            conv1: ConvBn::new([in_channels, out_channels], 3, stride, 1, device),
            conv2: ConvBn::new([out_channels, out_channels], 3, 1, 1, device),
            downsample,
            activation: Relu::new(),
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(input.clone()),
            None => input.clone(),
        };

        let x = self.activation.forward(self.conv1.forward(input));
        let x = self.conv2.forward(x);
        self.activation.forward(x + identity)
    }
}

/// ResNet-18 feature extractor
///
/// - Conv1: 7x7, stride 2, then 3x3 max pooling
/// - 4 residual stages (64, 128, 256, 512 channels), 2 blocks each
/// - Global average pooling
#[derive(Module, Debug)]
pub struct ResNet18<B: Backend> {
    conv1: ConvBn<B>,
    maxpool: MaxPool2d,
    blocks: Vec<BasicBlock<B>>,
    avgpool: AdaptiveAvgPool2d,
    activation: Relu,
}

impl<B: Backend> ResNet18<B> {
    pub fn new(device: &B::Device) -> Self {
        let conv1 = ConvBn::new([3, 64], 7, 2, 1, device);
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let mut blocks = Vec::new();
        let mut in_channels = 64;
        for (stage, out_channels) in [64, 128, 256, 512].into_iter().enumerate() {
            let stride = if stage == 0 { 1 } else { 2 };
            blocks.push(BasicBlock::new(in_channels, out_channels, stride, device));
            blocks.push(BasicBlock::new(out_channels, out_channels, 1, device));
            in_channels = out_channels;
        }

        Self {
            conv1,
            maxpool,
            blocks,
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            activation: Relu::new(),
        }
    }
}

impl<B: Backend> FeatureExtractor<B> for ResNet18<B> {
    fn forward_features(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.activation.forward(self.conv1.forward(images));
        let mut x = self.maxpool.forward(x);
        for block in &self.blocks {
            x = block.forward(x);
        }
        let x = self.avgpool.forward(x);

        let [batch, channels, _, _] = x.dims();
        x.reshape([batch, channels])
    }

    fn feature_dim(&self) -> usize {
        512
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    #[test]
    fn test_efficientnet_features() {
        let device = Default::default();
        let model = EfficientNetB0::<TestBackend>::new(&device);
        assert_eq!(model.blocks.len(), 16);

        let input = Tensor::<TestBackend, 4>::zeros([2, 3, 32, 32], &device);
        let features = model.forward_features(input);
        assert_eq!(features.dims(), [2, 1280]);
    }

    #[test]
    fn test_resnet_features() {
        let device = Default::default();
        let model = ResNet18::<TestBackend>::new(&device);
        assert_eq!(model.blocks.len(), 8);

        let input = Tensor::<TestBackend, 4>::zeros([1, 3, 32, 32], &device);
        let features = model.forward_features(input);
        assert_eq!(features.dims(), [1, 512]);
    }

    #[test]
    fn test_backbone_dispatch() {
        let device = Default::default();
        let backbone = Backbone::<TestBackend>::new(BackboneKind::ResNet18, &device);
        assert_eq!(backbone.kind(), BackboneKind::ResNet18);
        assert_eq!(backbone.feature_dim(), 512);
    }

    #[test]
    fn test_backbone_kind_parse_and_serde() {
        assert_eq!("efficientnet-b0".parse::<BackboneKind>().unwrap(), BackboneKind::EfficientNetB0);
        assert_eq!("ResNet18".parse::<BackboneKind>().unwrap(), BackboneKind::ResNet18);
        assert!("vgg16".parse::<BackboneKind>().is_err());

        let json = serde_json::to_string(&BackboneKind::ResNet18).unwrap();
        assert_eq!(json, "\"resnet18\"");
    }

    #[test]
    fn test_pretrained_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("resnet18");
        let device = Default::default();

        let source = Backbone::<TestBackend>::new(BackboneKind::ResNet18, &device);
        source
            .clone()
            .save_file(path.clone(), &CompactRecorder::new())
            .unwrap();

        let loaded =
            Backbone::<TestBackend>::pretrained(BackboneKind::ResNet18, &path.with_extension("mpk"), &device)
                .unwrap();

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);
        let expected = source.forward_features(input.clone()).into_data();
        let actual = loaded.forward_features(input).into_data();
        // CompactRecorder stores half-precision weights
        expected.assert_approx_eq::<f32>(&actual, burn::tensor::Tolerance::rel_abs(5e-2, 1e-3));
    }

    #[test]
    fn test_pretrained_missing_file() {
        let device = Default::default();
        let result = Backbone::<TestBackend>::pretrained(
            BackboneKind::EfficientNetB0,
            Path::new("/no/weights.mpk"),
            &device,
        );
        assert!(matches!(result, Err(ShotError::PathNotFound(_))));
    }
}
