//! CNN Model Architecture for Leaf Disease Classification
//!
//! A Convolutional Neural Network built with the Burn framework. The serving
//! pipeline hands it channels-last input `[batch, height, width, 3]`; the
//! network itself convolves in Burn's native `[batch, 3, height, width]` layout.
//!
//! The feature extractor is a stack of `depth` downsampling stages. Stage `i`
//! has `base_filters << i` filters and halves the spatial size, so a 224px
//! input with the default depth of 4 reaches the pooling layer at 14×14.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{activation::softmax, backend::Backend, Tensor},
};

/// Leaf photos are always RGB
pub const INPUT_CHANNELS: usize = 3;

/// Configuration for the LeafClassifier CNN model
#[derive(Config, Debug)]
pub struct LeafClassifierConfig {
    /// Number of output classes (15: pepper, potato and tomato diseases)
    #[config(default = "15")]
    pub num_classes: usize,

    /// Input image size (assumes square images)
    #[config(default = "224")]
    pub input_size: usize,

    /// Filters in the first stage; each later stage doubles them
    #[config(default = "32")]
    pub base_filters: usize,

    /// Number of downsampling stages
    #[config(default = "4")]
    pub depth: usize,

    /// Width of the hidden fully connected layer
    #[config(default = "256")]
    pub hidden_units: usize,

    /// Dropout rate used while training; inactive at inference
    #[config(default = "0.3")]
    pub dropout_rate: f64,
}

impl LeafClassifierConfig {
    /// Channels coming out of the last stage
    pub fn feature_channels(&self) -> usize {
        self.base_filters << self.depth.saturating_sub(1)
    }

    /// Side length of the feature map entering global pooling
    pub fn feature_map_size(&self) -> usize {
        self.input_size >> self.depth
    }
}

/// One downsampling stage: 3×3 Conv2d, BatchNorm, ReLU, 2×2 MaxPool
#[derive(Module, Debug)]
pub struct Stage<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
    pool: MaxPool2d,
}

impl<B: Backend> Stage<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
            relu: Relu::new(),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.bn.forward(self.conv.forward(x));
        self.pool.forward(self.relu.forward(x))
    }
}

/// Leaf Disease Classifier CNN
///
/// `depth` stages, global average pooling, then a hidden layer with dropout
/// and the class head.
#[derive(Module, Debug)]
pub struct LeafClassifier<B: Backend> {
    stages: Vec<Stage<B>>,
    global_pool: AdaptiveAvgPool2d,
    hidden: Linear<B>,
    dropout: Dropout,
    head: Linear<B>,
    num_classes: usize,
}

impl<B: Backend> LeafClassifier<B> {
    /// Create a new, randomly initialised classifier from configuration
    pub fn new(config: &LeafClassifierConfig, device: &B::Device) -> Self {
        let mut stages = Vec::with_capacity(config.depth);
        let mut in_channels = INPUT_CHANNELS;
        for i in 0..config.depth {
            let out_channels = config.base_filters << i;
            stages.push(Stage::new(in_channels, out_channels, device));
            in_channels = out_channels;
        }

        Self {
            stages,
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            hidden: LinearConfig::new(config.feature_channels(), config.hidden_units).init(device),
            dropout: DropoutConfig::new(config.dropout_rate).init(),
            head: LinearConfig::new(config.hidden_units, config.num_classes).init(device),
            num_classes: config.num_classes,
        }
    }

    /// Logits `[batch, num_classes]` for channels-first input `[batch, 3, h, w]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self
            .stages
            .iter()
            .fold(x, |x, stage| stage.forward(x));

        // [B, C, H, W] -> [B, C, 1, 1] -> [B, C]
        let x = self.global_pool.forward(x);
        let [batch_size, channels, _, _] = x.dims();
        let x = x.reshape([batch_size, channels]);

        let x = Relu::new().forward(self.hidden.forward(x));
        self.head.forward(self.dropout.forward(x))
    }

    /// Class probabilities for channels-last input `[batch, height, width, 3]`
    pub fn forward_nhwc_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(x.permute([0, 3, 1, 2])), 1)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn depth(&self) -> usize {
        self.stages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InferenceBackend;

    type TestBackend = InferenceBackend;

    fn small_config() -> LeafClassifierConfig {
        LeafClassifierConfig::new()
            .with_input_size(32)
            .with_base_filters(4)
            .with_hidden_units(16)
    }

    #[test]
    fn test_default_geometry() {
        let config = LeafClassifierConfig::new();
        assert_eq!(config.feature_channels(), 256);
        assert_eq!(config.feature_map_size(), 14);
    }

    #[test]
    fn test_leaf_classifier_output_shape() {
        let device = Default::default();
        let model = LeafClassifier::<TestBackend>::new(&small_config(), &device);

        let input = Tensor::<TestBackend, 4>::zeros([2, INPUT_CHANNELS, 32, 32], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [2, 15]);
        assert_eq!(model.num_classes(), 15);
        assert_eq!(model.depth(), 4);
    }

    #[test]
    fn test_depth_changes_stage_count_not_output() {
        let device = Default::default();
        let config = small_config().with_depth(2).with_num_classes(5);
        let model = LeafClassifier::<TestBackend>::new(&config, &device);

        let input = Tensor::<TestBackend, 4>::zeros([1, INPUT_CHANNELS, 32, 32], &device);
        assert_eq!(model.depth(), 2);
        assert_eq!(model.forward(input).dims(), [1, 5]);
        assert_eq!(config.feature_channels(), 8);
    }

    #[test]
    fn test_nhwc_softmax_is_distribution() {
        let device = Default::default();
        let model = LeafClassifier::<TestBackend>::new(&small_config(), &device);

        let input = Tensor::<TestBackend, 4>::ones([1, 32, 32, INPUT_CHANNELS], &device);
        let probs: Vec<f32> = model
            .forward_nhwc_softmax(input)
            .into_data()
            .to_vec()
            .unwrap();

        assert_eq!(probs.len(), 15);
        assert!(probs.iter().all(|&p| p >= 0.0));
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
    }
}
