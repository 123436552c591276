pub const LATENT_DIM: usize = 100;
pub const HEIGHT: usize = 32;
pub const WIDTH: usize = 32;
pub const CHANNELS: usize = 3;

/// CIFAR-10 class index of "dog".
pub const DOG_LABEL: u8 = 5;

/// A sample grid is rendered every this many completed batches.
pub const SAMPLE_INTERVAL: usize = 10;
