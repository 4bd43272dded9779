//! # Dilated `ResNet` Core Model
//!
//! [`DilatedResNet`] is the feature extractor: a stem followed by four
//! bottleneck stages, with the late stages dilated instead of strided.
//!
//! [`DilatedResNetContractConfig`] implements [`Config`], and provides
//! the high-level configuration interface (depths, output stride, widths).
//! It provides [`DilatedResNetContractConfig::to_structure`] to convert
//! to a [`DilatedResNetConfig`].
//!
//! [`DilatedResNetConfig`] implements [`Config`], and provides
//! [`DilatedResNetConfig::init`] to initialize a [`DilatedResNet`].
//!
//! [`DilatedResNet`] implements [`Module`], and provides
//! [`DilatedResNet::forward`] and [`DilatedResNet::forward_features`].

use crate::models::dilated_resnet::bottleneck::BottleneckBlockMeta;
use crate::models::dilated_resnet::naming::{
    LayerName, MAX_STAGE_DEPTH, block_layer_names, stem_layer_names,
};
use crate::models::dilated_resnet::stage::{Stage, StageBlockOptions, StageConfig, StageMeta};
use crate::models::dilated_resnet::stem::{ResNetStem, ResNetStemConfig};
use crate::models::dilated_resnet::util::{
    KerasKernelOrder, StridePlacement, WeightLayout, stage_stride_schedule,
};
use burn::module::Module;
use burn::nn::BatchNormConfig;
use burn::prelude::{Backend, Config, Tensor};

/// `ResNet-50` block depths.
pub const RESNET50_BLOCKS: [usize; 4] = [3, 4, 6, 3];

/// The undilated stride of each residual stage.
pub const NOMINAL_STAGE_STRIDES: [usize; 4] = [1, 2, 2, 2];

/// The stride of the stem.
pub const STEM_STRIDE: usize = 4;

/// High-level dilated `ResNet` model configuration.
#[derive(Config, Debug)]
pub struct DilatedResNetContractConfig {
    /// Stage block depths.
    #[config(default = "RESNET50_BLOCKS")]
    pub stage_depths: [usize; 4],

    /// Ratio of input resolution to output feature resolution.
    ///
    /// A power of two in ``4..=32``; 8 dilates stages 4 and 5 by 2 and 4.
    #[config(default = 8)]
    pub output_stride: usize,

    /// Number of image channels.
    #[config(default = 3)]
    pub in_channels: usize,

    /// Number of channels in the stem convolution.
    #[config(default = 64)]
    pub stem_width: usize,

    /// Width of the first stage's reduction convs; doubled each stage.
    #[config(default = 64)]
    pub base_planes: usize,

    /// Ratio of block output planes to reduction planes.
    #[config(default = 4)]
    pub expansion: usize,

    /// The size of the spatial block kernels.
    #[config(default = 3)]
    pub kernel_size: usize,

    /// Which conv of a strided block carries the stride.
    #[config(default = "StridePlacement::Reduce")]
    pub stride_placement: StridePlacement,

    /// Do the convolutions carry a bias?
    #[config(default = true)]
    pub conv_bias: bool,

    /// Batch norm epsilon.
    #[config(default = 1e-3)]
    pub norm_epsilon: f64,

    /// Batch norm running-stat momentum (weight of the new batch statistic).
    #[config(default = 0.01)]
    pub norm_momentum: f64,

    /// The key layout of weight files published for this topology.
    #[config(default = "WeightLayout::Keras")]
    pub weight_layout: WeightLayout,

    /// The kernel order of Keras ``.h5`` archives published for this topology.
    #[config(default = "KerasKernelOrder::Theano")]
    pub kernel_order: KerasKernelOrder,
}

impl Default for DilatedResNetContractConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl DilatedResNetContractConfig {
    /// The torchvision flavor: spatial stride, no conv bias, torch norm defaults.
    pub fn torchvision() -> Self {
        Self::new()
            .with_stride_placement(StridePlacement::Spatial)
            .with_conv_bias(false)
            .with_norm_epsilon(1e-5)
            .with_norm_momentum(0.1)
            .with_weight_layout(WeightLayout::TorchVision)
    }

    /// Per-stage ``(stride, dilation)``.
    pub fn stage_schedule(&self) -> Vec<(usize, usize)> {
        stage_stride_schedule(STEM_STRIDE, self.output_stride, &NOMINAL_STAGE_STRIDES)
    }

    /// Per-stage ``[2a, 2b, 2c]`` filters.
    pub fn stage_filters(&self) -> [[usize; 3]; 4] {
        let mut filters = [[0; 3]; 4];
        for (idx, f) in filters.iter_mut().enumerate() {
            let planes = self.base_planes << idx;
            *f = [planes, planes, planes * self.expansion];
        }
        filters
    }

    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if !self.output_stride.is_power_of_two()
            || !(STEM_STRIDE..=32).contains(&self.output_stride)
        {
            return Err(format!(
                "output_stride must be a power of two in {STEM_STRIDE}..=32: {}",
                self.output_stride
            ));
        }
        if self.stage_depths.contains(&0) {
            return Err(format!(
                "stage_depths must be > 0: {:?}",
                self.stage_depths
            ));
        }
        if self.stage_depths.iter().any(|&d| d > MAX_STAGE_DEPTH) {
            return Err(format!(
                "stage_depths must be <= {MAX_STAGE_DEPTH}: {:?}",
                self.stage_depths
            ));
        }
        if self.in_channels == 0 {
            return Err("in_channels must be > 0".to_string());
        }
        if self.kernel_size == 0 || self.kernel_size % 2 == 0 {
            return Err(format!(
                "kernel_size must be odd and > 0: {}",
                self.kernel_size
            ));
        }
        if self.expansion == 0 || self.base_planes == 0 || self.stem_width == 0 {
            return Err("expansion, base_planes and stem_width must be > 0".to_string());
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
    }

    fn norm(&self) -> BatchNormConfig {
        BatchNormConfig::new(0)
            .with_epsilon(self.norm_epsilon)
            .with_momentum(self.norm_momentum)
    }

    /// Convert to a [`DilatedResNetConfig`].
    ///
    /// # Panics
    ///
    /// If the config is not valid.
    pub fn to_structure(&self) -> DilatedResNetConfig {
        self.expect_valid();

        let stem = ResNetStemConfig::standard(
            self.in_channels,
            self.stem_width,
            self.conv_bias,
            self.norm(),
        );

        let options = StageBlockOptions::new()
            .with_kernel_size(self.kernel_size)
            .with_stride_placement(self.stride_placement)
            .with_conv_bias(self.conv_bias)
            .with_norm(self.norm());

        let mut in_planes = self.stem_width;
        let stages = self
            .stage_filters()
            .into_iter()
            .zip(self.stage_schedule())
            .zip(self.stage_depths)
            .map(|((filters, (stride, dilation)), depth)| {
                let stage =
                    StageConfig::build(depth, in_planes, filters, stride, dilation, &options);
                in_planes = filters[2];
                stage
            })
            .collect();

        DilatedResNetConfig::new(stem, stages)
    }
}

impl From<DilatedResNetContractConfig> for DilatedResNetConfig {
    fn from(config: DilatedResNetContractConfig) -> Self {
        config.to_structure()
    }
}

/// [`DilatedResNet`] Structure Config.
///
/// This config defines the structure of the model layer by layer.
/// It is not a semantic configuration; see [`DilatedResNetContractConfig`].
#[derive(Config, Debug)]
pub struct DilatedResNetConfig {
    /// The stem configuration.
    pub stem: ResNetStemConfig,

    /// The residual stages.
    pub stages: Vec<StageConfig>,
}

impl DilatedResNetConfig {
    /// Check if the config is valid.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.stages.is_empty() {
            return Err("stages is empty".to_string());
        }
        let mut in_planes = self.stem.out_planes();
        for (idx, stage) in self.stages.iter().enumerate() {
            stage
                .try_validate()
                .map_err(|err| format!("stage[{idx}]: {err}"))?;
            if stage.in_planes() != in_planes {
                return Err(format!(
                    "stage[{idx}].in_planes({}) != {in_planes}",
                    stage.in_planes()
                ));
            }
            in_planes = stage.out_planes();
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{}", err);
        }
    }

    /// The number of output feature planes.
    pub fn out_planes(&self) -> usize {
        self.stages[self.stages.len() - 1].out_planes()
    }

    /// Initialize a [`DilatedResNet`] model.
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> DilatedResNet<B> {
        self.expect_valid();

        DilatedResNet {
            stem: self.stem.init(device),
            stages: self
                .stages
                .into_iter()
                .map(|c| c.init(device))
                .collect(),
        }
    }
}

/// Dilated `ResNet` feature extractor.
#[derive(Module, Debug)]
pub struct DilatedResNet<B: Backend> {
    /// Stage 1.
    pub stem: ResNetStem<B>,

    /// Stages 2 and up.
    pub stages: Vec<Stage<B>>,
}

impl<B: Backend> DilatedResNet<B> {
    /// The number of input channels.
    pub fn in_channels(&self) -> usize {
        self.stem.in_channels()
    }

    /// The number of output feature planes.
    pub fn out_planes(&self) -> usize {
        self.stages[self.stages.len() - 1].out_planes()
    }

    /// The ratio of input to output resolution.
    pub fn output_stride(&self) -> usize {
        self.stages
            .iter()
            .fold(self.stem.stride(), |acc, s| acc * s.stride())
    }

    /// The dilation of each stage.
    pub fn stage_dilations(&self) -> Vec<usize> {
        self.stages.iter().map(|s| s.dilation()).collect()
    }

    /// Get the output resolution for a given input resolution.
    pub fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        self.stages.iter().fold(
            self.stem.output_resolution(input_resolution),
            |res, s| s.output_resolution(res),
        )
    }

    /// Every named ``(keras name, module path)`` layer pair, in forward order.
    pub fn layer_names(&self) -> Vec<LayerName> {
        let mut names = stem_layer_names();
        for (stage_index, stage) in self.stages.iter().enumerate() {
            for (block_index, block) in stage.blocks.iter().enumerate() {
                names.extend(block_layer_names(
                    stage_index,
                    block_index,
                    block.has_projection(),
                ));
            }
        }
        names
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, height, width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_planes, out_height, out_width]``; see [`Self::output_resolution`].
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let x = self.stem.forward(input);
        self.stages.iter().fold(x, |x, stage| stage.forward(x))
    }

    /// Forward pass, keeping every intermediate feature map.
    ///
    /// # Returns
    ///
    /// The stem output followed by each stage output.
    pub fn forward_features(
        &self,
        input: Tensor<B, 4>,
    ) -> Vec<Tensor<B, 4>> {
        let mut features = Vec::with_capacity(self.stages.len() + 1);
        let mut x = self.stem.forward(input);
        for stage in &self.stages {
            features.push(x.clone());
            x = stage.forward(x);
        }
        features.push(x);
        features
    }
}
