//! # Residual Stage
//!
//! A [`Stage`] is a sequence of [`BottleneckBlock`]s sharing one output width:
//! a projection ``conv_block`` followed by ``depth - 1`` identity blocks.
//!
//! [`StageMeta`] defines a common meta API for [`Stage`] and [`StageConfig`].

use crate::models::dilated_resnet::bottleneck::{
    BottleneckBlock, BottleneckBlockConfig, BottleneckBlockMeta,
};
use crate::models::dilated_resnet::naming::MAX_STAGE_DEPTH;
use crate::models::dilated_resnet::util::StridePlacement;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::nn::BatchNormConfig;
use burn::prelude::{Backend, Module, Tensor};

/// [`Stage`] Meta API.
pub trait StageMeta {
    /// The number of blocks.
    fn len(&self) -> usize;

    /// Check if the stage is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The number of input feature planes.
    fn in_planes(&self) -> usize;

    /// The number of output feature planes.
    fn out_planes(&self) -> usize;

    /// The effective stride of the stage.
    fn stride(&self) -> usize;

    /// The dilation of the stage's spatial convolutions.
    fn dilation(&self) -> usize;

    /// Get the output resolution for a given input resolution.
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2];
}

/// [`Stage`] Configuration.
#[derive(Config, Debug)]
pub struct StageConfig {
    /// The component blocks.
    pub blocks: Vec<BottleneckBlockConfig>,
}

impl From<Vec<BottleneckBlockConfig>> for StageConfig {
    fn from(blocks: Vec<BottleneckBlockConfig>) -> Self {
        Self { blocks }
    }
}

impl StageMeta for StageConfig {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_planes()
    }

    fn stride(&self) -> usize {
        self.blocks.iter().map(|b| b.stride()).product()
    }

    fn dilation(&self) -> usize {
        self.blocks[0].dilation()
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        self.blocks
            .iter()
            .fold(input_resolution, |res, b| b.output_resolution(res))
    }
}

/// Block options shared by every block of a stage.
#[derive(Config, Debug)]
pub struct StageBlockOptions {
    /// The size of the spatial kernel.
    #[config(default = 3)]
    pub kernel_size: usize,

    /// Which conv carries the stride.
    #[config(default = "StridePlacement::Reduce")]
    pub stride_placement: StridePlacement,

    /// Do the convolutions carry a bias?
    #[config(default = true)]
    pub conv_bias: bool,

    /// The norm config.
    #[config(default = "BatchNormConfig::new(0)")]
    pub norm: BatchNormConfig,
}

impl Default for StageBlockOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl StageConfig {
    /// Build a stage config.
    ///
    /// The first block projects (``conv_block``, or ``conv_block_dilation``
    /// when `dilation > 1`); the rest are identity blocks.
    ///
    /// # Arguments
    ///
    /// - `depth`: the number of blocks; must be > 0.
    /// - `in_planes`: the input planes.
    /// - `filters`: the ``2a``, ``2b``, ``2c`` planes of every block.
    /// - `stride`: the stride of the first block.
    /// - `dilation`: the dilation of every block.
    /// - `options`: shared block options.
    pub fn build(
        depth: usize,
        in_planes: usize,
        filters: [usize; 3],
        stride: usize,
        dilation: usize,
        options: &StageBlockOptions,
    ) -> Self {
        let k = options.kernel_size;
        let apply = |block: BottleneckBlockConfig| {
            block
                .with_stride_placement(options.stride_placement)
                .with_conv_bias(options.conv_bias)
                .with_norm(options.norm.clone())
        };

        let blocks = (0..depth)
            .map(|b| match (b, dilation) {
                (0, 1) => BottleneckBlockConfig::conv_block(in_planes, k, filters, stride),
                (0, d) => BottleneckBlockConfig::conv_block_dilation(in_planes, k, filters, d)
                    .with_stride(stride),
                (_, 1) => BottleneckBlockConfig::identity_block(filters[2], k, filters),
                (_, d) => BottleneckBlockConfig::identity_block_dilation(filters[2], k, filters, d),
            })
            .map(apply)
            .collect();

        Self { blocks }
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("blocks is empty".to_string());
        }
        if self.len() > MAX_STAGE_DEPTH {
            return Err(format!(
                "stage depth {} exceeds the {MAX_STAGE_DEPTH} nameable blocks",
                self.len()
            ));
        }

        for (idx, block) in self.blocks.iter().enumerate() {
            block
                .try_validate()
                .map_err(|err| format!("block[{idx}]: {err}"))?;
        }

        for idx in 1..self.blocks.len() {
            let prev = &self.blocks[idx - 1];
            let curr = &self.blocks[idx];
            if prev.out_planes() != curr.in_planes() {
                return Err(format!(
                    "block[{}].out_planes({}) != block[{}].in_planes({})",
                    idx - 1,
                    prev.out_planes(),
                    idx,
                    curr.in_planes(),
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

    /// Initialize a new [`Stage`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> Stage<B> {
        self.expect_valid();

        Stage {
            blocks: self
                .blocks
                .into_iter()
                .map(|block| block.init(device))
                .collect(),
        }
    }
}

/// Residual stage.
#[derive(Module, Debug)]
pub struct Stage<B: Backend> {
    /// Internal blocks.
    pub blocks: Vec<BottleneckBlock<B>>,
}

impl<B: Backend> StageMeta for Stage<B> {
    fn len(&self) -> usize {
        self.blocks.len()
    }

    fn in_planes(&self) -> usize {
        self.blocks[0].in_planes()
    }

    fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_planes()
    }

    fn stride(&self) -> usize {
        self.blocks.iter().map(|b| b.stride()).product()
    }

    fn dilation(&self) -> usize {
        self.blocks[0].dilation()
    }

    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        self.blocks
            .iter()
            .fold(input_resolution, |res, b| b.output_resolution(res))
    }
}

impl<B: Backend> Stage<B> {
    /// Apply the stage.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_planes, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_planes, out_height, out_width]``, see [`StageMeta::output_resolution`].
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

        let x = self
            .blocks
            .iter()
            .fold(input, |x, block| block.forward(x));

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

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;
    use hamcrest::prelude::*;

    type B = NdArray<f32>;

    #[test]
    fn test_build_strided_stage() {
        let config = StageConfig::build(4, 256, [128, 128, 512], 2, 1, &Default::default());

        assert_eq!(config.len(), 4);
        assert_eq!(config.in_planes(), 256);
        assert_eq!(config.out_planes(), 512);
        assert_eq!(config.stride(), 2);
        assert_eq!(config.dilation(), 1);
        assert_eq!(config.output_resolution([56, 56]), [28, 28]);

        assert!(config.blocks[0].has_projection());
        assert_that!(
            config.blocks[1..].iter().any(|b| b.has_projection()),
            is(equal_to(false))
        );
        assert_that!(config.blocks[1].in_planes(), equal_to(512));
        config.expect_valid();
    }

    #[test]
    fn test_build_dilated_stage() {
        let options = StageBlockOptions::new()
            .with_conv_bias(false)
            .with_stride_placement(StridePlacement::Spatial);
        let config = StageConfig::build(6, 512, [256, 256, 1024], 1, 2, &options);

        assert_eq!(config.stride(), 1);
        assert_eq!(config.dilation(), 2);
        assert_eq!(config.output_resolution([28, 28]), [28, 28]);
        for block in &config.blocks {
            assert_eq!(block.dilation(), 2);
            assert!(!block.conv_bias);
            assert_eq!(block.stride_placement, StridePlacement::Spatial);
        }
        assert!(config.blocks[0].has_projection());
        config.expect_valid();
    }

    #[test]
    fn test_validate() {
        let err = StageConfig::new(vec![]).try_validate().unwrap_err();
        assert_eq!(err, "blocks is empty");

        let config: StageConfig = vec![
            BottleneckBlockConfig::conv_block(4, 3, [2, 2, 8], 1),
            BottleneckBlockConfig::conv_block(16, 3, [2, 2, 8], 1),
        ]
        .into();
        let err = config.try_validate().unwrap_err();
        assert_eq!(err, "block[0].out_planes(8) != block[1].in_planes(16)");

        let config: StageConfig = vec![
            BottleneckBlockConfig::conv_block(4, 3, [2, 2, 8], 1),
            BottleneckBlockConfig::identity_block(8, 3, [2, 2, 4]),
        ]
        .into();
        let err = config.try_validate().unwrap_err();
        assert!(err.starts_with("block[1]: identity block requires"));

        let config = StageConfig::build(27, 4, [2, 2, 4], 1, 1, &Default::default());
        let err = config.try_validate().unwrap_err();
        assert_eq!(err, "stage depth 27 exceeds the 26 nameable blocks");

        StageConfig::build(26, 4, [2, 2, 4], 1, 1, &Default::default()).expect_valid();
    }

    #[test]
    fn test_forward() {
        let device = Default::default();

        let stage: Stage<B> =
            StageConfig::build(2, 4, [2, 2, 8], 2, 1, &Default::default()).init(&device);
        assert_eq!(stage.len(), 2);
        assert_eq!(stage.in_planes(), 4);
        assert_eq!(stage.out_planes(), 8);
        assert_eq!(stage.stride(), 2);

        let output = stage.forward(Tensor::ones([1, 4, 8, 6], &device));
        assert_shape_contract!(
            ["batch", "out_planes", "out_height", "out_width"],
            &output,
            &[
                ("batch", 1),
                ("out_planes", 8),
                ("out_height", 4),
                ("out_width", 3)
            ],
        );

        let stage: Stage<B> =
            StageConfig::build(3, 8, [2, 2, 16], 1, 4, &Default::default()).init(&device);
        assert_eq!(stage.dilation(), 4);
        let output = stage.forward(Tensor::ones([1, 8, 5, 5], &device));
        assert_eq!(output.dims(), [1, 16, 5, 5]);
        assert_eq!(stage.output_resolution([5, 5]), [5, 5]);
    }
}
