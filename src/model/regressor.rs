//! CNN regressor for spherical-harmonic coefficients
//!
//! Small convolutional backbone with a regression head. The training pipeline only
//! relies on the input/output tensor contract; the architecture itself can be
//! swapped without touching the loop.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig,
        PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::NUM_COEFFICIENTS;

/// Configuration for the coefficient regressor
#[derive(Config, Debug)]
pub struct ShRegressorConfig {
    /// Length of the output coefficient vector
    #[config(default = "27")]
    pub num_coefficients: usize,

    /// Number of input channels (3 for RGB)
    #[config(default = "3")]
    pub in_channels: usize,

    /// Base number of convolutional filters
    #[config(default = "32")]
    pub base_filters: usize,

    /// Dropout rate in the regression head
    #[config(default = "0.2")]
    pub dropout_rate: f64,
}

/// A CNN block with Conv2d, BatchNorm, ReLU and MaxPool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
    pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        let bn = BatchNormConfig::new(out_channels).init(device);
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();

        Self {
            conv,
            bn,
            relu: Relu::new(),
            pool,
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);
        self.pool.forward(x)
    }
}

/// Spherical-harmonic coefficient regressor
///
/// Four convolutional blocks with doubling filter counts, global average pooling,
/// and a two-layer regression head with a linear output (no activation, the
/// coefficients are signed and unbounded).
#[derive(Module, Debug)]
pub struct ShRegressor<B: Backend> {
    conv1: ConvBlock<B>,
    conv2: ConvBlock<B>,
    conv3: ConvBlock<B>,
    conv4: ConvBlock<B>,
    global_pool: AdaptiveAvgPool2d,
    fc1: Linear<B>,
    relu: Relu,
    dropout: Dropout,
    fc2: Linear<B>,
}

impl<B: Backend> ShRegressor<B> {
    /// Create a new regressor from configuration
    pub fn new(config: &ShRegressorConfig, device: &B::Device) -> Self {
        let base = config.base_filters;

        let conv1 = ConvBlock::new(config.in_channels, base, device);
        let conv2 = ConvBlock::new(base, base * 2, device);
        let conv3 = ConvBlock::new(base * 2, base * 4, device);
        let conv4 = ConvBlock::new(base * 4, base * 8, device);

        let global_pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();

        let fc1 = LinearConfig::new(base * 8, 256).init(device);
        let dropout = DropoutConfig::new(config.dropout_rate).init();
        let fc2 = LinearConfig::new(256, config.num_coefficients).init(device);

        Self {
            conv1,
            conv2,
            conv3,
            conv4,
            global_pool,
            fc1,
            relu: Relu::new(),
            dropout,
            fc2,
        }
    }

    /// Forward pass: [batch, 3, H, W] -> [batch, num_coefficients]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(x);
        let x = self.conv2.forward(x);
        let x = self.conv3.forward(x);
        let x = self.conv4.forward(x);

        let x = self.global_pool.forward(x);
        let x = x.flatten::<2>(1, 3);

        let x = self.fc1.forward(x);
        let x = self.relu.forward(x);
        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }
}

impl ShRegressorConfig {
    /// Initialize a regressor on the given device
    pub fn init<B: Backend>(&self, device: &B::Device) -> ShRegressor<B> {
        ShRegressor::new(self, device)
    }

    /// Tiny configuration for tests
    pub fn tiny() -> Self {
        Self::new()
            .with_num_coefficients(NUM_COEFFICIENTS)
            .with_base_filters(4)
            .with_dropout_rate(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{default_device, DefaultBackend};

    #[test]
    fn test_forward_output_shape() {
        let device = default_device();
        let model: ShRegressor<DefaultBackend> = ShRegressorConfig::tiny().init(&device);

        // 16x32 input survives the four 2x2 pools (down to 1x2)
        let input = Tensor::<DefaultBackend, 4>::zeros([2, 3, 16, 32], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [2, 27]);
    }

    #[test]
    fn test_forward_is_deterministic_without_dropout() {
        let device = default_device();
        let model: ShRegressor<DefaultBackend> = ShRegressorConfig::tiny().init(&device);

        let input = Tensor::<DefaultBackend, 4>::ones([1, 3, 16, 32], &device);
        let a: Vec<f32> = model.forward(input.clone()).into_data().to_vec().unwrap();
        let b: Vec<f32> = model.forward(input).into_data().to_vec().unwrap();

        assert_eq!(a, b);
    }
}
