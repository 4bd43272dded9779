//! # [`BottleneckBlock`] Block for the Dilated `ResNet`
//!
//! [`BottleneckBlock`] is the residual unit of every stage:
//!
//! ```text
//! x ─┬─ 1x1 (2a) ─ bn ─ relu ─ kxk (2b, dilated) ─ bn ─ relu ─ 1x1 (2c) ─ bn ─┬─ add ─ relu
//!    └──────────────── identity | projection 1x1 (1) ─ bn ──────────────────┘
//! ```
//!
//! The four classic block builders map onto one config:
//!
//! | builder                                         | shortcut   | stride | dilation |
//! |-------------------------------------------------|------------|--------|----------|
//! | [`BottleneckBlockConfig::identity_block`]          | identity   | 1      | 1        |
//! | [`BottleneckBlockConfig::conv_block`]              | projection | `s`    | 1        |
//! | [`BottleneckBlockConfig::identity_block_dilation`] | identity   | 1      | `d`      |
//! | [`BottleneckBlockConfig::conv_block_dilation`]     | projection | 1      | `d`      |
//!
//! [`BottleneckBlockConfig`] implements [`Config`], and provides
//! [`BottleneckBlockConfig::init`] to initialize a [`BottleneckBlock`].

use crate::compat::conv_shape::{expect_conv_output_shape, symmetric_same_padding};
use crate::layers::blocks::conv_norm::{ConvNorm2d, ConvNorm2dConfig, ConvNorm2dMeta};
use crate::models::dilated_resnet::shortcut::{
    ProjectionShortcut, ProjectionShortcutConfig, ProjectionShortcutMeta,
};
use crate::models::dilated_resnet::util::{CONV_INTO_RELU_INITIALIZER, StridePlacement};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::nn::conv::Conv2dConfig;
use burn::nn::{BatchNormConfig, PaddingConfig2d, Relu};
use burn::prelude::{Backend, Config, Module, Tensor};

/// [`BottleneckBlock`] Meta trait.
pub trait BottleneckBlockMeta {
    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The output planes of the ``2a``, ``2b`` and ``2c`` convolutions.
    fn filters(&self) -> [usize; 3];

    /// The number of output feature planes.
    fn out_planes(&self) -> usize {
        self.filters()[2]
    }

    /// The size of the spatial ``2b`` kernel.
    fn kernel_size(&self) -> usize;

    /// The stride of the block.
    fn stride(&self) -> usize;

    /// The dilation rate of the ``2b`` conv.
    fn dilation(&self) -> usize;

    /// Does the block project its shortcut?
    fn has_projection(&self) -> bool;

    /// Get the output resolution for a given input resolution.
    ///
    /// ``ceil(input / stride)`` on each axis.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        let stride = self.stride();
        expect_conv_output_shape(input_resolution, [1, 1], [stride, stride], [0, 0], [1, 1])
    }
}

/// [`BottleneckBlock`] Config.
///
/// Implements [`BottleneckBlockMeta`].
#[derive(Config, Debug)]
pub struct BottleneckBlockConfig {
    /// The size of the in channels dimension.
    pub in_planes: usize,

    /// The output planes of the ``2a``, ``2b`` and ``2c`` convolutions.
    pub filters: [usize; 3],

    /// The size of the spatial ``2b`` kernel; must be odd.
    #[config(default = 3)]
    pub kernel_size: usize,

    /// The stride of the block.
    #[config(default = 1)]
    pub stride: usize,

    /// The dilation rate of the ``2b`` conv.
    #[config(default = 1)]
    pub dilation: usize,

    /// Project the shortcut through a 1x1 conv + norm.
    #[config(default = false)]
    pub projection: bool,

    /// Which conv carries the stride.
    #[config(default = "StridePlacement::Reduce")]
    pub stride_placement: StridePlacement,

    /// Do the convolutions carry a bias?
    #[config(default = true)]
    pub conv_bias: bool,

    /// The norm config; `num_features` is replaced on init.
    #[config(default = "BatchNormConfig::new(0)")]
    pub norm: BatchNormConfig,
}

impl BottleneckBlockMeta for BottleneckBlockConfig {
    fn in_planes(&self) -> usize {
        self.in_planes
    }

    fn filters(&self) -> [usize; 3] {
        self.filters
    }

    fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    fn stride(&self) -> usize {
        self.stride
    }

    fn dilation(&self) -> usize {
        self.dilation
    }

    fn has_projection(&self) -> bool {
        self.projection
    }
}

impl BottleneckBlockConfig {
    /// Block whose shortcut is the input.
    pub fn identity_block(
        in_planes: usize,
        kernel_size: usize,
        filters: [usize; 3],
    ) -> Self {
        Self::new(in_planes, filters).with_kernel_size(kernel_size)
    }

    /// Block with a projected (and possibly strided) shortcut.
    pub fn conv_block(
        in_planes: usize,
        kernel_size: usize,
        filters: [usize; 3],
        stride: usize,
    ) -> Self {
        Self::new(in_planes, filters)
            .with_kernel_size(kernel_size)
            .with_stride(stride)
            .with_projection(true)
    }

    /// Identity block with a dilated spatial conv.
    pub fn identity_block_dilation(
        in_planes: usize,
        kernel_size: usize,
        filters: [usize; 3],
        dilation: usize,
    ) -> Self {
        Self::identity_block(in_planes, kernel_size, filters).with_dilation(dilation)
    }

    /// Projection block with a dilated spatial conv; the stride stays 1.
    pub fn conv_block_dilation(
        in_planes: usize,
        kernel_size: usize,
        filters: [usize; 3],
        dilation: usize,
    ) -> Self {
        Self::conv_block(in_planes, kernel_size, filters, 1).with_dilation(dilation)
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.kernel_size % 2 == 0 {
            return Err(format!("kernel_size must be odd: {}", self.kernel_size));
        }
        if self.stride == 0 || self.dilation == 0 {
            return Err(format!(
                "stride ({}) and dilation ({}) must be > 0",
                self.stride, self.dilation
            ));
        }
        if !self.projection {
            if self.stride != 1 {
                return Err(format!(
                    "identity block requires stride 1, got {}",
                    self.stride
                ));
            }
            if self.in_planes != self.filters[2] {
                return Err(format!(
                    "identity block requires in_planes ({}) == out_planes ({})",
                    self.in_planes, self.filters[2]
                ));
            }
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
    }

    fn conv_norm(
        &self,
        channels: [usize; 2],
        kernel_size: usize,
        stride: usize,
        dilation: usize,
    ) -> ConvNorm2dConfig {
        let padding = symmetric_same_padding(kernel_size, dilation);
        ConvNorm2dConfig::new(
            Conv2dConfig::new(channels, [kernel_size, kernel_size])
                .with_stride([stride, stride])
                .with_dilation([dilation, dilation])
                .with_padding(PaddingConfig2d::Explicit(padding, padding))
                .with_initializer(CONV_INTO_RELU_INITIALIZER)
                .with_bias(self.conv_bias),
        )
        .with_norm(self.norm.clone())
    }

    /// Initialize a [`BottleneckBlock`].
    ///
    /// # Panics
    ///
    /// If the config is not valid.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> BottleneckBlock<B> {
        self.expect_valid();

        let [f1, f2, f3] = self.filters;
        let (reduce_stride, spatial_stride) = match self.stride_placement {
            StridePlacement::Reduce => (self.stride, 1),
            StridePlacement::Spatial => (1, self.stride),
        };

        let shortcut = self.projection.then(|| {
            ProjectionShortcutConfig::new(self.in_planes, f3)
                .with_stride(self.stride)
                .with_conv_bias(self.conv_bias)
                .with_norm(self.norm.clone())
        });

        BottleneckBlock {
            branch2a: self
                .conv_norm([self.in_planes, f1], 1, reduce_stride, 1)
                .init(device),
            branch2b: self
                .conv_norm([f1, f2], self.kernel_size, spatial_stride, self.dilation)
                .init(device),
            branch2c: self.conv_norm([f2, f3], 1, 1, 1).init(device),
            shortcut: shortcut.map(|c| c.init(device)),
            act: Relu::new(),
        }
    }
}

/// Bottleneck Block.
///
/// Implements [`BottleneckBlockMeta`].
#[derive(Module, Debug)]
pub struct BottleneckBlock<B: Backend> {
    /// ``2a``: 1x1 reduction conv/norm.
    pub branch2a: ConvNorm2d<B>,

    /// ``2b``: kxk spatial conv/norm.
    pub branch2b: ConvNorm2d<B>,

    /// ``2c``: 1x1 expansion conv/norm.
    pub branch2c: ConvNorm2d<B>,

    /// ``1``: optional projection shortcut.
    pub shortcut: Option<ProjectionShortcut<B>>,

    /// Activation.
    pub act: Relu,
}

impl<B: Backend> BottleneckBlockMeta for BottleneckBlock<B> {
    fn in_planes(&self) -> usize {
        self.branch2a.in_channels()
    }

    fn filters(&self) -> [usize; 3] {
        [
            self.branch2a.out_channels(),
            self.branch2b.out_channels(),
            self.branch2c.out_channels(),
        ]
    }

    fn kernel_size(&self) -> usize {
        self.branch2b.conv.kernel_size[0]
    }

    fn stride(&self) -> usize {
        self.branch2a.stride()[0] * self.branch2b.stride()[0]
    }

    fn dilation(&self) -> usize {
        self.branch2b.dilation()[0]
    }

    fn has_projection(&self) -> bool {
        self.shortcut.is_some()
    }
}

impl<B: Backend> BottleneckBlock<B> {
    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// A ``[batch, out_planes, ceil(in_height/stride), ceil(in_width/stride)]`` tensor.
    ///
    /// # Panics
    ///
    /// If the input does not carry ``in_planes`` channels.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch, in_height, in_width] = unpack_shape_contract!(
            ["batch", "in_planes", "in_height", "in_width"],
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_planes", self.in_planes())],
        );
        let [out_height, out_width] = self.output_resolution([in_height, in_width]);
        let bindings = [
            ("batch", batch),
            ("out_planes", self.out_planes()),
            ("out_height", out_height),
            ("out_width", out_width),
        ];

        let identity = match &self.shortcut {
            Some(shortcut) => shortcut.forward(input.clone()),
            None => input.clone(),
        };
        assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &identity,
            &bindings,
        );

        let x = self.act.forward(self.branch2a.forward(input));
        let x = self.act.forward(self.branch2b.forward(x));
        let x = self.branch2c.forward(x);
        assert_shape_contract_periodically!(
            ["batch", "out_planes", "out_height", "out_width"],
            &x,
            &bindings,
        );

        self.act.forward(x + identity)
    }
}
