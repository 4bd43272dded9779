//! # Projection Shortcut
//!
//! The ``branch1`` of a `conv_block`: a strided 1x1 conv + norm that projects
//! the block input onto the residual branch's channels and resolution.

use crate::layers::blocks::conv_norm::{ConvNorm2d, ConvNorm2dConfig, ConvNorm2dMeta};
use crate::models::dilated_resnet::util::CONV_INTO_RELU_INITIALIZER;
use burn::nn::conv::Conv2dConfig;
use burn::nn::{BatchNormConfig, Initializer, PaddingConfig2d};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`ProjectionShortcut`] Meta trait.
pub trait ProjectionShortcutMeta {
    /// The size of the in channels dimension.
    fn in_channels(&self) -> usize;

    /// The size of the out channels dimension.
    fn out_channels(&self) -> usize;

    /// The stride of the projection.
    fn stride(&self) -> usize;
}

/// [`ProjectionShortcut`] configuration.
#[derive(Config, Debug)]
pub struct ProjectionShortcutConfig {
    /// The size of the in channels dimension.
    pub in_channels: usize,

    /// The size of the out channels dimension.
    pub out_channels: usize,

    /// The stride of the projection.
    #[config(default = 1)]
    pub stride: usize,

    /// Does the conv carry a bias?
    #[config(default = true)]
    pub conv_bias: bool,

    /// The norm config; `num_features` is replaced on init.
    #[config(default = "BatchNormConfig::new(0)")]
    pub norm: BatchNormConfig,

    /// The conv initializer.
    #[config(default = "CONV_INTO_RELU_INITIALIZER")]
    pub initializer: Initializer,
}

impl ProjectionShortcutMeta for ProjectionShortcutConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn out_channels(&self) -> usize {
        self.out_channels
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl ProjectionShortcutConfig {
    /// The [`ConvNorm2dConfig`] of the projection.
    pub fn conv_norm_config(&self) -> ConvNorm2dConfig {
        ConvNorm2dConfig::new(
            Conv2dConfig::new([self.in_channels, self.out_channels], [1, 1])
                .with_stride([self.stride, self.stride])
                .with_padding(PaddingConfig2d::Explicit(0, 0))
                .with_initializer(self.initializer.clone())
                .with_bias(self.conv_bias),
        )
        .with_norm(self.norm.clone())
    }

    /// Initialize a [`ProjectionShortcut`] `Module`.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ProjectionShortcut<B> {
        ProjectionShortcut {
            conv_norm: self.conv_norm_config().init(device),
        }
    }
}

/// Projection shortcut; maps ``[batch, in_channels, in_height, in_width]``
/// to ``[batch, out_channels, out_height, out_width]``.
#[derive(Module, Debug)]
pub struct ProjectionShortcut<B: Backend> {
    /// Embedded conv/norm.
    pub conv_norm: ConvNorm2d<B>,
}

impl<B: Backend> ProjectionShortcutMeta for ProjectionShortcut<B> {
    fn in_channels(&self) -> usize {
        self.conv_norm.in_channels()
    }

    fn out_channels(&self) -> usize {
        self.conv_norm.out_channels()
    }

    fn stride(&self) -> usize {
        self.conv_norm.stride()[0]
    }
}

impl<B: Backend> ProjectionShortcut<B> {
    /// Forward pass.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        self.conv_norm.forward(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    #[test]
    fn test_config() {
        let config = ProjectionShortcutConfig::new(64, 256);
        assert_eq!(config.in_channels(), 64);
        assert_eq!(config.out_channels(), 256);
        assert_eq!(config.stride(), 1);
        assert!(config.conv_bias);

        let config = config.with_stride(2).with_conv_bias(false);
        let conv_norm = config.conv_norm_config();
        assert_eq!(conv_norm.conv.stride, [2, 2]);
        assert_eq!(conv_norm.conv.kernel_size, [1, 1]);
        assert!(!conv_norm.conv.bias);
    }

    #[test]
    fn test_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let shortcut: ProjectionShortcut<B> = ProjectionShortcutConfig::new(4, 8)
            .with_stride(2)
            .init(&device);

        assert_eq!(shortcut.in_channels(), 4);
        assert_eq!(shortcut.out_channels(), 8);
        assert_eq!(shortcut.stride(), 2);

        let output = shortcut.forward(Tensor::ones([2, 4, 7, 8], &device));
        assert_eq!(output.dims(), [2, 8, 4, 4]);
    }
}
