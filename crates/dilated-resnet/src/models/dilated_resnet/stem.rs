//! # Input Stem
//!
//! Stage 1 of the network:
//!
//! ```text
//! zero-pad 3 ─ conv1 7x7/2 ─ bn_conv1 ─ relu ─ maxpool 3x3/2 'same'
//! ```
//!
//! The zero padding is folded into the convolution's explicit padding.

use crate::layers::blocks::conv_norm::{ConvNorm2d, ConvNorm2dConfig, ConvNorm2dMeta};
use crate::layers::pool::{MaxPool2dSame, MaxPool2dSameConfig};
use crate::models::dilated_resnet::util::CONV_INTO_RELU_INITIALIZER;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::Module;
use burn::nn::conv::Conv2dConfig;
use burn::nn::{BatchNormConfig, PaddingConfig2d, Relu};
use burn::prelude::{Backend, Tensor};

/// [`ResNetStem`] Config.
#[derive(Config, Debug)]
pub struct ResNetStemConfig {
    /// The input conv/norm.
    pub conv_norm: ConvNorm2dConfig,

    /// The stem pooling.
    #[config(default = "MaxPool2dSameConfig::new([3, 3]).with_strides([2, 2])")]
    pub pool: MaxPool2dSameConfig,
}

impl ResNetStemConfig {
    /// The standard stem.
    ///
    /// # Arguments
    ///
    /// - `in_channels`: image channels.
    /// - `stem_width`: ``conv1`` output channels.
    /// - `conv_bias`: does ``conv1`` carry a bias?
    /// - `norm`: ``bn_conv1`` config; `num_features` is replaced on init.
    pub fn standard(
        in_channels: usize,
        stem_width: usize,
        conv_bias: bool,
        norm: BatchNormConfig,
    ) -> Self {
        Self::new(
            ConvNorm2dConfig::new(
                Conv2dConfig::new([in_channels, stem_width], [7, 7])
                    .with_stride([2, 2])
                    .with_padding(PaddingConfig2d::Explicit(3, 3))
                    .with_initializer(CONV_INTO_RELU_INITIALIZER)
                    .with_bias(conv_bias),
            )
            .with_norm(norm),
        )
    }

    /// The number of output feature planes.
    pub fn out_planes(&self) -> usize {
        self.conv_norm.out_channels()
    }

    /// Initialize a [`ResNetStem`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> ResNetStem<B> {
        ResNetStem {
            conv_norm: self.conv_norm.init(device),
            act: Relu::new(),
            pool: self.pool.init(),
        }
    }
}

/// Stem module.
#[derive(Module, Debug)]
pub struct ResNetStem<B: Backend> {
    /// ``conv1`` / ``bn_conv1``.
    pub conv_norm: ConvNorm2d<B>,

    /// Activation.
    pub act: Relu,

    /// The pooling.
    pub pool: MaxPool2dSame,
}

impl<B: Backend> ResNetStem<B> {
    /// The number of input channels.
    pub fn in_channels(&self) -> usize {
        self.conv_norm.in_channels()
    }

    /// The number of output feature planes.
    pub fn out_planes(&self) -> usize {
        self.conv_norm.out_channels()
    }

    /// The stride of the stem; the conv stride times the pool stride.
    pub fn stride(&self) -> usize {
        self.conv_norm.stride()[0] * self.pool.strides()[0]
    }

    /// Get the output resolution for a given input resolution.
    pub fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        let x = self.conv_norm.output_resolution(input_resolution);
        self.pool.output_resolution(x)
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_planes, out_height, out_width]``, see [`Self::output_resolution`].
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

        let x = self.conv_norm.forward(input);
        let x = self.act.forward(x);
        let x = self.pool.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_planes", self.out_planes()),
                ("out_height", out_height),
                ("out_width", out_width)
            ],
        );

        x
    }
}
