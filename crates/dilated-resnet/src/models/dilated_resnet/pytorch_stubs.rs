//! # PyTorch Weight Stubs
//!
//! Stub modules mirroring the torchvision `ResNet` parameter tree. Weight files
//! are loaded onto the stubs through ``burn-import`` (which cannot rebuild
//! stateless modules such as `Relu` or the pooling layers), and then copied
//! onto a [`DilatedResNet`].
//!
//! Two key layouts are understood:
//!
//! - [`WeightLayout::TorchVision`]: ``conv1``, ``bn1``, ``layer{n}.{i}.conv{1,2,3}``,
//!   ``layer{n}.{i}.downsample.{0,1}``.
//! - [`WeightLayout::Keras`]: ``conv1``, ``bn_conv1``, ``res{stage}{block}_branch*``,
//!   ``bn{stage}{block}_branch*``, with Keras 1 (``_W``, ``_b``, ``_running_std``) or
//!   Keras 2 (``kernel``, ``moving_variance``) weight names; kernels already in
//!   ``[out, in, kh, kw]`` cross-correlation order.
//!
//! Keras ``.h5`` archives are read by [`super::keras_weights`] instead.
#![allow(missing_docs)]

use crate::layers::blocks::conv_norm::ConvNorm2d;
use crate::models::dilated_resnet::bottleneck::BottleneckBlock;
use crate::models::dilated_resnet::model::DilatedResNet;
use crate::models::dilated_resnet::keras_weights::is_hdf5_path;
use crate::models::dilated_resnet::naming::{
    BlockNames, Branch, FIRST_RESIDUAL_STAGE, MAX_STAGE_DEPTH, STEM_NORM_NAME,
};
use crate::models::dilated_resnet::shortcut::ProjectionShortcut;
use crate::models::dilated_resnet::stage::Stage;
use crate::models::dilated_resnet::util::{KerasKernelOrder, WeightLayout};
use anyhow::{Context, bail};
use burn::module::Module;
use burn::nn::BatchNorm;
use burn::nn::BatchNormRecord;
use burn::nn::conv::{Conv2d, Conv2dRecord};
use burn::prelude::Backend;
use burn::record::{FullPrecisionSettings, Recorder};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};
use std::path::PathBuf;

/// Key remaps for the torchvision layout.
pub fn torchvision_key_remaps(num_stages: usize) -> Vec<(String, String)> {
    let mut remaps: Vec<(String, String)> = (0..num_stages)
        .map(|idx| {
            (
                format!(r"^layer{}\.", idx + 1),
                format!("layers.{idx}.blocks."),
            )
        })
        .collect();
    remaps.push((r"downsample\.0\.".to_string(), "downsample.conv.".to_string()));
    remaps.push((r"downsample\.1\.".to_string(), "downsample.bn.".to_string()));
    remaps
}

/// Keras weight name suffixes, as torch parameter names.
///
/// Norm ``weight``/``bias`` become ``gamma``/``beta`` in ``burn-import``.
pub const KERAS_SUFFIX_REMAPS: [(&str, &str); 7] = [
    (r":\d+$", ""),
    (r"\.(\w+_)?(W|kernel)$", ".weight"),
    (r"\.(\w+_)?(b|bias)$", ".bias"),
    (r"\.(\w+_)?gamma$", ".weight"),
    (r"\.(\w+_)?beta$", ".bias"),
    (r"\.(\w+_)?(moving|running)_mean$", ".running_mean"),
    (r"\.(\w+_)?(moving_variance|running_var|running_std)$", ".running_var"),
];

/// Key remaps for the Keras layout.
///
/// # Arguments
///
/// - `stage_depths`: the number of blocks in each stage.
///
/// # Errors
///
/// If a stage is deeper than the nameable blocks.
pub fn keras_key_remaps(stage_depths: &[usize]) -> anyhow::Result<Vec<(String, String)>> {
    if let Some(depth) = stage_depths.iter().find(|&&d| d > MAX_STAGE_DEPTH) {
        bail!("stage depth {depth} exceeds the {MAX_STAGE_DEPTH} nameable blocks");
    }

    let mut remaps = vec![(format!(r"^{STEM_NORM_NAME}\."), "bn1.".to_string())];
    remaps.extend(
        KERAS_SUFFIX_REMAPS
            .iter()
            .map(|(pattern, replacement)| (pattern.to_string(), replacement.to_string())),
    );

    let branches = [
        (Branch::B2a, "conv1.", "bn1."),
        (Branch::B2b, "conv2.", "bn2."),
        (Branch::B2c, "conv3.", "bn3."),
        (Branch::B1, "downsample.conv.", "downsample.bn."),
    ];

    for (stage_index, &depth) in stage_depths.iter().enumerate() {
        for block_index in 0..depth {
            let names = BlockNames::new(stage_index + FIRST_RESIDUAL_STAGE, block_index);
            let base = format!("layers.{stage_index}.blocks.{block_index}.");
            for (branch, conv, bn) in branches {
                remaps.push((format!(r"^{}\.", names.conv(branch)), format!("{base}{conv}")));
                remaps.push((format!(r"^{}\.", names.norm(branch)), format!("{base}{bn}")));
            }
        }
    }
    Ok(remaps)
}

/// Load a [`DilatedResNetStubRecord`] from a ``torch`` weights path.
///
/// # Arguments
///
/// - `path`: the weights file.
/// - `layout`: the key layout of the file.
/// - `stage_depths`: the number of blocks in each stage.
/// - `device`: the device to load onto.
#[tracing::instrument(skip(device))]
pub fn load_stub_record<B: Backend>(
    path: PathBuf,
    layout: WeightLayout,
    stage_depths: &[usize],
    device: &B::Device,
) -> anyhow::Result<DilatedResNetStubRecord<B>> {
    let remaps = match layout {
        WeightLayout::TorchVision => torchvision_key_remaps(stage_depths.len()),
        WeightLayout::Keras => keras_key_remaps(stage_depths)?,
    };
    tracing::debug!(count = remaps.len(), "applying weight key remaps");

    let load_args = remaps
        .iter()
        .fold(LoadArgs::new(path.clone()), |args, (pattern, replacement)| {
            args.with_key_remap(pattern, replacement)
        });

    let record = PyTorchFileRecorder::<FullPrecisionSettings>::default()
        .load(load_args, device)
        .with_context(|| format!("loading weights from {}", path.display()))?;

    Ok(record)
}

impl<B: Backend> DilatedResNet<B> {
    /// Load weights from a ``torch`` weights path onto this model.
    ///
    /// # Errors
    ///
    /// If the file cannot be read, or its structure does not match the model.
    pub fn load_pytorch_weights<P: Into<PathBuf>>(
        self,
        path: P,
        layout: WeightLayout,
    ) -> anyhow::Result<Self> {
        let device = self
            .devices()
            .first()
            .cloned()
            .context("model has no device")?;
        let stage_depths: Vec<usize> = self.stages.iter().map(|s| s.blocks.len()).collect();

        let record = load_stub_record::<B>(path.into(), layout, &stage_depths, &device)?;
        record.copy_weights(self)
    }

    /// Load a weights file onto this model, choosing the reader by extension.
    ///
    /// ``.h5`` / ``.hdf5`` files are read as Keras archives with `kernel_order`;
    /// anything else is read as a ``torch`` file with `layout`.
    pub fn load_weights_file<P: Into<PathBuf>>(
        self,
        path: P,
        layout: WeightLayout,
        kernel_order: KerasKernelOrder,
    ) -> anyhow::Result<Self> {
        let path = path.into();
        if is_hdf5_path(&path) {
            self.load_keras_hdf5(path, kernel_order)
        } else {
            self.load_pytorch_weights(path, layout)
        }
    }
}

#[derive(Module, Debug)]
pub struct DilatedResNetStub<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B, 2>,
    pub layers: Vec<StageStub<B>>,
}

impl<B: Backend> DilatedResNetStubRecord<B> {
    pub fn copy_weights(
        self,
        target: DilatedResNet<B>,
    ) -> anyhow::Result<DilatedResNet<B>> {
        if self.layers.len() != target.stages.len() {
            bail!(
                "weights have {} stages; model has {}",
                self.layers.len(),
                target.stages.len()
            );
        }

        let mut stem = target.stem;
        stem.conv_norm = copy_conv_norm_weights(self.conv1, self.bn1, stem.conv_norm)
            .context("stem")?;

        let stages = self
            .layers
            .into_iter()
            .zip(target.stages)
            .enumerate()
            .map(|(idx, (s, t))| {
                s.copy_weights(t)
                    .with_context(|| format!("stage {}", idx + FIRST_RESIDUAL_STAGE))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(DilatedResNet { stem, stages })
    }
}

#[derive(Module, Debug)]
pub struct StageStub<B: Backend> {
    pub blocks: Vec<BottleneckStub<B>>,
}

impl<B: Backend> StageStubRecord<B> {
    pub fn copy_weights(
        self,
        target: Stage<B>,
    ) -> anyhow::Result<Stage<B>> {
        if self.blocks.len() != target.blocks.len() {
            bail!(
                "weights have {} blocks; model has {}",
                self.blocks.len(),
                target.blocks.len()
            );
        }

        let blocks = self
            .blocks
            .into_iter()
            .zip(target.blocks)
            .enumerate()
            .map(|(idx, (s, t))| {
                s.copy_weights(t)
                    .with_context(|| format!("block {}", idx))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(Stage { blocks })
    }
}

#[derive(Module, Debug)]
pub struct BottleneckStub<B: Backend> {
    pub conv1: Conv2d<B>,
    pub bn1: BatchNorm<B, 2>,
    pub conv2: Conv2d<B>,
    pub bn2: BatchNorm<B, 2>,
    pub conv3: Conv2d<B>,
    pub bn3: BatchNorm<B, 2>,
    pub downsample: Option<DownsampleStub<B>>,
}

impl<B: Backend> BottleneckStubRecord<B> {
    pub fn copy_weights(
        self,
        target: BottleneckBlock<B>,
    ) -> anyhow::Result<BottleneckBlock<B>> {
        Ok(BottleneckBlock {
            branch2a: copy_conv_norm_weights(self.conv1, self.bn1, target.branch2a)
                .context(Branch::B2a)?,
            branch2b: copy_conv_norm_weights(self.conv2, self.bn2, target.branch2b)
                .context(Branch::B2b)?,
            branch2c: copy_conv_norm_weights(self.conv3, self.bn3, target.branch2c)
                .context(Branch::B2c)?,
            shortcut: copy_shortcut_weights(self.downsample, target.shortcut)
                .context(Branch::B1)?,
            ..target
        })
    }
}

#[derive(Module, Debug)]
pub struct DownsampleStub<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
}

pub fn copy_shortcut_weights<B: Backend>(
    downsample: Option<DownsampleStubRecord<B>>,
    target: Option<ProjectionShortcut<B>>,
) -> anyhow::Result<Option<ProjectionShortcut<B>>> {
    match (downsample, target) {
        (Some(stub), Some(target)) => Ok(Some(ProjectionShortcut {
            conv_norm: copy_conv_norm_weights(stub.conv, stub.bn, target.conv_norm)?,
        })),
        (None, None) => Ok(None),
        (None, Some(_)) => bail!("weights have no shortcut; model projects its shortcut"),
        (Some(_), None) => bail!("weights project the shortcut; model has an identity shortcut"),
    }
}

pub fn copy_conv_norm_weights<B: Backend>(
    conv: Conv2dRecord<B>,
    bn: BatchNormRecord<B, 2>,
    target: ConvNorm2d<B>,
) -> anyhow::Result<ConvNorm2d<B>> {
    let expected = target.conv.weight.dims();
    let found = conv.weight.dims();
    if expected != found {
        bail!("conv weight shape {found:?} != model shape {expected:?}");
    }
    match (conv.bias.is_some(), target.conv.bias.is_some()) {
        (true, false) => bail!("weights carry a conv bias; model is configured without one"),
        (false, true) => bail!("weights carry no conv bias; model is configured with one"),
        _ => (),
    }

    Ok(ConvNorm2d {
        conv: target.conv.load_record(conv),
        norm: target.norm.load_record(bn),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::dilated_resnet::model::DilatedResNetContractConfig;
    use burn::backend::NdArray;
    use burn::record::Record;
    use regex::Regex;

    type B = NdArray<f32>;

    fn tiny() -> DilatedResNetContractConfig {
        DilatedResNetContractConfig::torchvision()
            .with_stage_depths([1, 2, 1, 1])
            .with_stem_width(4)
            .with_base_planes(2)
    }

    fn stub_record_from(model: &DilatedResNet<B>) -> DilatedResNetStubRecord<B> {
        let conv_norm = |cn: &ConvNorm2d<B>| (cn.conv.clone().into_record(), cn.norm.clone().into_record());

        let (conv1, bn1) = conv_norm(&model.stem.conv_norm);
        DilatedResNetStubRecord {
            conv1,
            bn1,
            layers: model
                .stages
                .iter()
                .map(|stage| StageStubRecord {
                    blocks: stage
                        .blocks
                        .iter()
                        .map(|block| {
                            let (conv1, bn1) = conv_norm(&block.branch2a);
                            let (conv2, bn2) = conv_norm(&block.branch2b);
                            let (conv3, bn3) = conv_norm(&block.branch2c);
                            BottleneckStubRecord {
                                conv1,
                                bn1,
                                conv2,
                                bn2,
                                conv3,
                                bn3,
                                downsample: block.shortcut.as_ref().map(|s| {
                                    let (conv, bn) = conv_norm(&s.conv_norm);
                                    DownsampleStubRecord { conv, bn }
                                }),
                            }
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_torchvision_key_remaps() {
        let remaps = torchvision_key_remaps(4);
        assert_eq!(remaps.len(), 6);
        assert_eq!(
            remaps[0],
            (r"^layer1\.".to_string(), "layers.0.blocks.".to_string())
        );
        assert_eq!(
            remaps[3],
            (r"^layer4\.".to_string(), "layers.3.blocks.".to_string())
        );
    }

    #[test]
    fn test_keras_key_remaps() {
        let remaps = keras_key_remaps(&[3, 4, 6, 3]).unwrap();
        // stem norm + suffixes + 8 per block.
        assert_eq!(remaps.len(), 1 + KERAS_SUFFIX_REMAPS.len() + 16 * 8);
        assert!(remaps.contains(&(
            r"^res4c_branch2b\.".to_string(),
            "layers.2.blocks.2.conv2.".to_string()
        )));
        assert!(remaps.contains(&(
            r"^bn5a_branch1\.".to_string(),
            "layers.3.blocks.0.downsample.bn.".to_string()
        )));
        assert_eq!(remaps[0], (r"^bn_conv1\.".to_string(), "bn1.".to_string()));
    }

    /// Rewrite a key the way ``burn-import`` applies a remap list: in order.
    fn remap_key(
        remaps: &[(String, String)],
        key: &str,
    ) -> String {
        remaps.iter().fold(key.to_string(), |key, (pattern, replacement)| {
            Regex::new(pattern)
                .unwrap()
                .replace_all(&key, replacement.as_str())
                .to_string()
        })
    }

    #[test]
    fn test_torchvision_keys_land_on_stub_paths() {
        let remaps = torchvision_key_remaps(4);
        let cases = [
            ("conv1.weight", "conv1.weight"),
            ("bn1.running_mean", "bn1.running_mean"),
            (
                "layer1.0.downsample.1.running_var",
                "layers.0.blocks.0.downsample.bn.running_var",
            ),
            (
                "layer3.0.downsample.0.weight",
                "layers.2.blocks.0.downsample.conv.weight",
            ),
            ("layer4.2.conv3.weight", "layers.3.blocks.2.conv3.weight"),
            ("layer2.3.bn2.bias", "layers.1.blocks.3.bn2.bias"),
        ];
        for (key, expected) in cases {
            assert_eq!(remap_key(&remaps, key), expected, "{key}");
        }
    }

    #[test]
    fn test_keras_keys_land_on_stub_paths() {
        let remaps = keras_key_remaps(&[3, 4, 6, 3]).unwrap();
        let cases = [
            ("conv1.conv1_W", "conv1.weight"),
            ("conv1.conv1_b", "conv1.bias"),
            ("bn_conv1.bn_conv1_gamma", "bn1.weight"),
            ("bn_conv1.bn_conv1_running_std", "bn1.running_var"),
            ("res4c_branch2b.kernel", "layers.2.blocks.2.conv2.weight"),
            ("res3d_branch2c.res3d_branch2c_b", "layers.1.blocks.3.conv3.bias"),
            ("bn2a_branch2a.gamma", "layers.0.blocks.0.bn1.weight"),
            ("bn2c_branch2b.beta:0", "layers.0.blocks.2.bn2.bias"),
            (
                "bn5a_branch1.moving_variance",
                "layers.3.blocks.0.downsample.bn.running_var",
            ),
            (
                "bn5a_branch1.bn5a_branch1_running_mean",
                "layers.3.blocks.0.downsample.bn.running_mean",
            ),
            ("res5a_branch1.kernel:0", "layers.3.blocks.0.downsample.conv.weight"),
        ];
        for (key, expected) in cases {
            assert_eq!(remap_key(&remaps, key), expected, "{key}");
        }
    }

    #[test]
    fn test_keras_key_remaps_depth_limit() {
        let err = keras_key_remaps(&[1, 1, 27, 1]).unwrap_err();
        assert_eq!(err.to_string(), "stage depth 27 exceeds the 26 nameable blocks");
        assert!(keras_key_remaps(&[1, 1, 26, 1]).is_ok());
    }

    #[test]
    fn test_load_weights_file_dispatch() {
        let device = Default::default();

        let model: DilatedResNet<B> = tiny().to_structure().init(&device);
        let err = model
            .load_weights_file(
                "/nonexistent/weights.pth",
                WeightLayout::TorchVision,
                KerasKernelOrder::Theano,
            )
            .unwrap_err();
        assert!(format!("{err}").starts_with("loading weights from /nonexistent/weights.pth"));

        let model: DilatedResNet<B> = tiny().to_structure().init(&device);
        let err = model
            .load_weights_file(
                "/nonexistent/weights.h5",
                WeightLayout::TorchVision,
                KerasKernelOrder::Theano,
            )
            .unwrap_err();
        assert!(format!("{err}").contains("/nonexistent/weights.h5"));
        assert!(!format!("{err}").starts_with("loading weights from"));
    }

    #[test]
    fn test_copy_weights() {
        let device = Default::default();
        let source: DilatedResNet<B> = tiny().to_structure().init(&device);
        let target: DilatedResNet<B> = tiny().to_structure().init(&device);

        let record = stub_record_from(&source);
        let loaded = record.copy_weights(target).unwrap();

        let expected = source.stages[1].blocks[0].branch2b.conv.weight.val().into_data();
        loaded.stages[1].blocks[0]
            .branch2b
            .conv
            .weight
            .val()
            .into_data()
            .assert_eq(&expected, true);

        let expected = source.stem.conv_norm.norm.gamma.val().into_data();
        loaded
            .stem
            .conv_norm
            .norm
            .gamma
            .val()
            .into_data()
            .assert_eq(&expected, true);
    }

    #[test]
    fn test_copy_weights_stage_mismatch() {
        let device = Default::default();
        let source: DilatedResNet<B> = tiny().to_structure().init(&device);
        let target: DilatedResNet<B> = tiny()
            .with_stage_depths([1, 1, 1, 1])
            .to_structure()
            .init(&device);

        let err = stub_record_from(&source).copy_weights(target).unwrap_err();
        assert_eq!(format!("{err:#}"), "stage 3: weights have 2 blocks; model has 1");
    }

    #[test]
    fn test_copy_weights_bias_mismatch() {
        let device = Default::default();
        let source: DilatedResNet<B> = tiny().to_structure().init(&device);
        let target: DilatedResNet<B> = tiny()
            .with_conv_bias(true)
            .to_structure()
            .init(&device);

        let err = stub_record_from(&source).copy_weights(target).unwrap_err();
        assert!(format!("{err:#}").contains("weights carry no conv bias"));
    }

    #[test]
    fn test_copy_shortcut_mismatch() {
        let device = Default::default();
        let source: DilatedResNet<B> = tiny().to_structure().init(&device);
        let mut record = stub_record_from(&source);
        record.layers[0].blocks[0].downsample = None;

        let target: DilatedResNet<B> = tiny().to_structure().init(&device);
        let err = record.copy_weights(target).unwrap_err();
        assert_eq!(
            format!("{err:#}"),
            "stage 2: block 0: branch1: weights have no shortcut; model projects its shortcut"
        );
    }

    #[test]
    fn test_load_missing_file() {
        let device = Default::default();
        let model: DilatedResNet<B> = tiny().to_structure().init(&device);
        let err = model
            .load_pytorch_weights("/nonexistent/weights.pth", WeightLayout::TorchVision)
            .unwrap_err();
        assert!(format!("{err}").starts_with("loading weights from /nonexistent/weights.pth"));
    }

    #[test]
    fn test_stub_record_is_serializable() {
        let device = Default::default();
        let source: DilatedResNet<B> = tiny().to_structure().init(&device);
        let item = stub_record_from(&source).into_item::<FullPrecisionSettings>();
        let value = serde_json::to_value(&item).unwrap();
        assert!(value.get("conv1").is_some());
        assert!(value.get("layers").unwrap().is_array());
    }
}
