use burn::{
    nn::{
        Initializer, LeakyRelu, LeakyReluConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
        Tanh,
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
    },
    prelude::*,
};

use crate::model::constants::{CHANNELS, LATENT_DIM};

/// Spatial size of the projected latent map.
const BASE_SIZE: usize = 2;
const KERNEL: usize = 5;

#[derive(Module, Debug)]
pub struct GeneratorModel<B: Backend> {
    linear1: Linear<B>,
    conv1: ConvTranspose2d<B>,
    conv2: ConvTranspose2d<B>,
    conv3: ConvTranspose2d<B>,
    conv4: ConvTranspose2d<B>,
    activation: Relu,
    activation2: Tanh,
}

/// Maps a 100-dimensional latent vector to a 32x32 RGB image in `[-1, 1]`.
#[derive(Config, Debug)]
pub struct GeneratorModelConfig {
    /// Standard deviation of the transpose-convolution kernel initializer.
    #[config(default = "0.02")]
    init_std: f64,
    /// Channel multiplier: stages carry `size * 8`, `size * 8`, `size * 4`, `size * 2` channels.
    #[config(default = 64)]
    size: usize,
}

#[derive(Module, Debug)]
pub struct DiscriminatorModel<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv3: Conv2d<B>,
    conv4: Conv2d<B>,
    output: Linear<B>,
    activation: LeakyRelu,
}

#[derive(Config, Debug)]
pub struct DiscriminatorModelConfig {
    #[config(default = "0.2")]
    leaky_relu_slope: f64,
    #[config(default = "0.02")]
    init_std: f64,
    /// Channel multiplier: stages carry `size`, `size * 2`, `size * 4`, `size * 8` channels.
    #[config(default = 64)]
    size: usize,
}

/// Stride-2 transpose convolution with "same" padding: doubles height and width.
fn upsample(channels: [usize; 2], std: f64) -> ConvTranspose2dConfig {
    ConvTranspose2dConfig::new(channels, [KERNEL, KERNEL])
        .with_stride([2, 2])
        .with_padding([2, 2])
        .with_padding_out([1, 1])
        .with_initializer(Initializer::Normal { mean: 0.0, std })
}

/// Stride-2 convolution: halves height and width.
fn downsample(channels: [usize; 2], std: f64) -> Conv2dConfig {
    Conv2dConfig::new(channels, [KERNEL, KERNEL])
        .with_stride([2, 2])
        .with_padding(PaddingConfig2d::Explicit(2, 2))
        .with_initializer(Initializer::Normal { mean: 0.0, std })
}

impl GeneratorModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> GeneratorModel<B> {
        let size = self.size;
        GeneratorModel {
            linear1: LinearConfig::new(LATENT_DIM, size * 8 * BASE_SIZE * BASE_SIZE).init(device),
            conv1: upsample([size * 8, size * 8], self.init_std).init(device), // 2 -> 4
            conv2: upsample([size * 8, size * 4], self.init_std).init(device), // 4 -> 8
            conv3: upsample([size * 4, size * 2], self.init_std).init(device), // 8 -> 16
            conv4: upsample([size * 2, CHANNELS], self.init_std).init(device), // 16 -> 32
            activation: Relu::new(),
            activation2: Tanh::new(),
        }
    }
}

impl DiscriminatorModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> DiscriminatorModel<B> {
        let size = self.size;
        DiscriminatorModel {
            conv1: downsample([CHANNELS, size], self.init_std).init(device), // 32 -> 16
            conv2: downsample([size, size * 2], self.init_std).init(device), // 16 -> 8
            conv3: downsample([size * 2, size * 4], self.init_std).init(device), // 8 -> 4
            conv4: downsample([size * 4, size * 8], self.init_std).init(device), // 4 -> 2
            output: LinearConfig::new(size * 8 * BASE_SIZE * BASE_SIZE, 1).init(device),
            activation: LeakyReluConfig::new()
                .with_negative_slope(self.leaky_relu_slope)
                .init(),
        }
    }
}

impl<B: Backend> GeneratorModel<B> {
    /// `[batch, LATENT_DIM]` -> `[batch, 3, 32, 32]`
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 4> {
        let x = self.linear1.forward(input);
        let [batch, features] = x.dims();
        let mut x = x.reshape([batch, features / (BASE_SIZE * BASE_SIZE), BASE_SIZE, BASE_SIZE]);
        x = self.activation.forward(x);
        x = self.conv1.forward(x);
        x = self.activation.forward(x);
        x = self.conv2.forward(x);
        x = self.activation.forward(x);
        x = self.conv3.forward(x);
        x = self.activation.forward(x);
        x = self.conv4.forward(x);
        self.activation2.forward(x)
    }
}

impl<B: Backend> DiscriminatorModel<B> {
    /// `[batch, 3, 32, 32]` -> `[batch, 1]` logits
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = self.conv1.forward(input);
        x = self.activation.forward(x);
        x = self.conv2.forward(x);
        x = self.activation.forward(x);
        x = self.conv3.forward(x);
        x = self.activation.forward(x);
        x = self.conv4.forward(x);
        x = self.activation.forward(x);

        let x_flat: Tensor<B, 2> = x.flatten(1, 3);
        self.output.forward(x_flat)
    }
}
