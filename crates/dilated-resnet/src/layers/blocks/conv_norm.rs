//! # `ConvNorm` Module
//!
//! A [`ConvNorm2d`] module is a [`Conv2d`] layer followed by a [`BatchNorm`] layer.
//!
//! This is the unit every named ``conv*`` / ``bn*`` pair of the dilated `ResNet` is built from.

use crate::compat::conv_shape::expect_conv_output_shape;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};

/// [`ConvNorm2d`] Meta.
pub trait ConvNorm2dMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Get the stride.
    fn stride(&self) -> [usize; 2];

    /// Get the dilation.
    fn dilation(&self) -> [usize; 2];

    /// Does the conv layer carry a bias?
    fn has_bias(&self) -> bool;
}

/// [`ConvNorm2d`] Config.
#[derive(Config, Debug)]
pub struct ConvNorm2dConfig {
    /// The [`Conv2d`] config.
    pub conv: Conv2dConfig,

    /// The [`BatchNorm`] config.
    ///
    /// `num_features` is replaced by the conv output channels on init.
    #[config(default = "BatchNormConfig::new(0)")]
    pub norm: BatchNormConfig,
}

impl ConvNorm2dMeta for ConvNorm2dConfig {
    fn in_channels(&self) -> usize {
        self.conv.channels[0]
    }

    fn out_channels(&self) -> usize {
        self.conv.channels[1]
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }

    fn dilation(&self) -> [usize; 2] {
        self.conv.dilation
    }

    fn has_bias(&self) -> bool {
        self.conv.bias
    }
}

impl From<Conv2dConfig> for ConvNorm2dConfig {
    fn from(conv: Conv2dConfig) -> Self {
        Self::new(conv)
    }
}

impl ConvNorm2dConfig {
    /// Initialize a [`ConvNorm2d`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> ConvNorm2d<B> {
        let norm = BatchNormConfig {
            num_features: self.out_channels(),
            ..self.norm
        };

        ConvNorm2d {
            conv: self.conv.init(device),
            norm: norm.init(device),
        }
    }
}

/// [`Conv2d`] and [`BatchNorm`] layer.
#[derive(Module, Debug)]
pub struct ConvNorm2d<B: Backend> {
    /// Internal Conv2d layer.
    pub conv: Conv2d<B>,

    /// Internal Norm Layer.
    pub norm: BatchNorm<B, 2>,
}

impl<B: Backend> ConvNorm2dMeta for ConvNorm2d<B> {
    fn in_channels(&self) -> usize {
        self.conv.weight.shape().dims[1] * self.conv.groups
    }

    fn out_channels(&self) -> usize {
        self.conv.weight.shape().dims[0]
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }

    fn dilation(&self) -> [usize; 2] {
        self.conv.dilation
    }

    fn has_bias(&self) -> bool {
        self.conv.bias.is_some()
    }
}

impl<B: Backend> ConvNorm2d<B> {
    /// The explicit conv padding; ``'same'`` and ``'valid'`` report ``[0, 0]``.
    pub fn padding(&self) -> [usize; 2] {
        match self.conv.padding.0 {
            PaddingConfig2d::Explicit(h, w) => [h, w],
            _ => [0, 0],
        }
    }

    /// Get the output resolution for a given input resolution.
    pub fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        if let PaddingConfig2d::Same = self.conv.padding.0 {
            return input_resolution;
        }
        expect_conv_output_shape(
            input_resolution,
            self.conv.kernel_size,
            self.conv.stride,
            self.padding(),
            self.conv.dilation,
        )
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, in_height, in_width] = unpack_shape_contract!(
            ["batch", "in_channels", "in_height", "in_width"],
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_channels", self.in_channels())],
        );
        let [out_height, out_width] = self.output_resolution([in_height, in_width]);

        let x = self.conv.forward(input);
        let x = self.norm.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", out_height),
                ("out_width", out_width)
            ],
        );

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;

    #[test]
    fn test_conv_norm_config() {
        let inner_config = Conv2dConfig::new([2, 4], [3, 3])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false);

        let config: ConvNorm2dConfig = inner_config.clone().into();

        assert_eq!(&config.conv.channels, &inner_config.channels);
        assert_eq!(&config.conv.kernel_size, &inner_config.kernel_size);
        assert_eq!(config.in_channels(), 2);
        assert_eq!(config.out_channels(), 4);
        assert_eq!(config.stride(), [2, 2]);
        assert_eq!(config.dilation(), [1, 1]);
        assert!(!config.has_bias());
    }

    #[test]
    fn test_conv_norm_init_and_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer: ConvNorm2d<B> = ConvNorm2dConfig::new(
            Conv2dConfig::new([2, 4], [3, 3])
                .with_dilation([2, 2])
                .with_padding(PaddingConfig2d::Explicit(2, 2)),
        )
        .with_norm(BatchNormConfig::new(0).with_epsilon(1e-3))
        .init(&device);

        assert_eq!(layer.in_channels(), 2);
        assert_eq!(layer.out_channels(), 4);
        assert_eq!(layer.dilation(), [2, 2]);
        assert!(layer.has_bias());
        assert_eq!(layer.norm.epsilon, 1e-3);
        assert_eq!(layer.norm.gamma.dims(), [4]);

        let input: Tensor<B, 4> = Tensor::ones([2, 2, 9, 9], &device);
        let output = layer.forward(input);
        assert_shape_contract!(
            ["batch", "out_channels", "out_height", "out_width"],
            &output,
            &[
                ("batch", 2),
                ("out_channels", 4),
                ("out_height", 9),
                ("out_width", 9)
            ],
        );
    }

    #[test]
    fn test_conv_norm_strided_odd_resolution() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer: ConvNorm2d<B> = ConvNorm2dConfig::new(
            Conv2dConfig::new([2, 3], [3, 3])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1)),
        )
        .init(&device);

        assert_eq!(layer.padding(), [1, 1]);
        assert_eq!(layer.output_resolution([9, 8]), [5, 4]);

        let output = layer.forward(Tensor::ones([1, 2, 9, 8], &device));
        assert_eq!(output.dims(), [1, 3, 5, 4]);
    }

    #[test]
    #[should_panic]
    fn test_conv_norm_forward_channel_mismatch() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer: ConvNorm2d<B> =
            ConvNorm2dConfig::new(Conv2dConfig::new([2, 4], [1, 1])).init(&device);
        layer.forward(Tensor::ones([1, 3, 4, 4], &device));
    }
}
