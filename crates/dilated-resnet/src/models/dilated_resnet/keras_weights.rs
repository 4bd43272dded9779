//! # Keras HDF5 Weights
//!
//! The published Keras `ResNet50` archives hold one HDF5 group per layer,
//! named as in [`super::naming`]. Each group holds that layer's weights:
//!
//! ```text
//! res4b_branch2b/res4b_branch2b_W     Keras 1: kernel
//! res4b_branch2b/res4b_branch2b_b     Keras 1: bias
//! bn4b_branch2b/bn4b_branch2b_running_std   Keras 1: variance
//! res4b_branch2b/res4b_branch2b/kernel:0    Keras 2
//! bn4b_branch2b/bn4b_branch2b/moving_variance:0
//! ```
//!
//! [`KerasWeights`] is the decoded archive: per layer, each weight is classified
//! as a [`KerasParam`]. Decoding the HDF5 container needs the ``hdf5`` feature;
//! [`DilatedResNet::load_keras_weights`] copies the decoded weights onto a model.

use crate::layers::blocks::conv_norm::ConvNorm2d;
use crate::models::dilated_resnet::bottleneck::BottleneckBlock;
use crate::models::dilated_resnet::model::DilatedResNet;
use crate::models::dilated_resnet::naming::{
    BlockNames, Branch, FIRST_RESIDUAL_STAGE, STEM_CONV_NAME, STEM_NORM_NAME,
};
use crate::models::dilated_resnet::stage::Stage;
use crate::models::dilated_resnet::util::KerasKernelOrder;
use anyhow::{Context, bail};
use burn::module::RunningState;
use burn::prelude::{Backend, Tensor};
use burn::tensor::TensorData;
use std::collections::BTreeMap;
use std::path::Path;

/// The role of a weight within a Keras layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KerasParam {
    /// Conv kernel; ``kernel`` or ``*_W``.
    Kernel,

    /// Conv bias; ``bias`` or ``*_b``.
    Bias,

    /// Norm scale.
    Gamma,

    /// Norm shift.
    Beta,

    /// Norm running mean.
    MovingMean,

    /// Norm running variance; Keras 1 stores it as ``running_std``.
    MovingVariance,
}

impl KerasParam {
    /// Classify a stored weight name.
    ///
    /// Group prefixes (``a/b/``) and tensor indices (``:0``) are ignored.
    pub fn classify(weight_name: &str) -> Option<Self> {
        let name = weight_name
            .rsplit_once('/')
            .map_or(weight_name, |(_, name)| name);
        let name = name.split_once(':').map_or(name, |(name, _)| name);

        let is = |suffix: &str| name == suffix || name.ends_with(&format!("_{suffix}"));

        if is("W") || is("kernel") {
            Some(Self::Kernel)
        } else if is("b") || is("bias") {
            Some(Self::Bias)
        } else if is("gamma") {
            Some(Self::Gamma)
        } else if is("beta") {
            Some(Self::Beta)
        } else if is("moving_mean") || is("running_mean") {
            Some(Self::MovingMean)
        } else if is("moving_variance") || is("running_var") || is("running_std") {
            Some(Self::MovingVariance)
        } else {
            None
        }
    }
}

/// A dense ``f32`` tensor read from an archive.
#[derive(Debug, Clone, PartialEq)]
pub struct KerasTensor {
    /// The stored shape.
    pub shape: Vec<usize>,

    /// Row-major values.
    pub values: Vec<f32>,
}

impl KerasTensor {
    /// Build a tensor, checking that `values` fills `shape`.
    pub fn new(
        shape: Vec<usize>,
        values: Vec<f32>,
    ) -> anyhow::Result<Self> {
        let size: usize = shape.iter().product();
        if size != values.len() {
            bail!("shape {shape:?} holds {size} values; found {}", values.len());
        }
        Ok(Self { shape, values })
    }

    /// Convert a stored kernel to ``[out, in, kh, kw]`` cross-correlation order.
    pub fn to_oihw(
        &self,
        order: KerasKernelOrder,
    ) -> anyhow::Result<([usize; 4], Vec<f32>)> {
        let shape: [usize; 4] = self
            .shape
            .as_slice()
            .try_into()
            .with_context(|| format!("kernel is not 4d: {:?}", self.shape))?;

        Ok(match order {
            KerasKernelOrder::Theano => {
                let [o, i, kh, kw] = shape;
                let mut values = Vec::with_capacity(self.values.len());
                for oi in 0..o * i {
                    for y in 0..kh {
                        for x in 0..kw {
                            let src = (oi * kh + (kh - 1 - y)) * kw + (kw - 1 - x);
                            values.push(self.values[src]);
                        }
                    }
                }
                (shape, values)
            }
            KerasKernelOrder::TensorFlow => {
                let [kh, kw, i, o] = shape;
                let mut values = Vec::with_capacity(self.values.len());
                for out in 0..o {
                    for inp in 0..i {
                        for y in 0..kh {
                            for x in 0..kw {
                                values.push(self.values[((y * kw + x) * i + inp) * o + out]);
                            }
                        }
                    }
                }
                ([o, i, kh, kw], values)
            }
        })
    }
}

/// The weights of one Keras layer.
pub type KerasLayerWeights = BTreeMap<KerasParam, KerasTensor>;

/// Decoded Keras weights, by layer name.
#[derive(Debug, Clone, Default)]
pub struct KerasWeights {
    /// Layer weights by layer name.
    pub layers: BTreeMap<String, KerasLayerWeights>,
}

impl KerasWeights {
    /// Add a stored weight to `layer`.
    ///
    /// # Errors
    ///
    /// If the weight name is not a known [`KerasParam`], or is a duplicate.
    pub fn insert(
        &mut self,
        layer: &str,
        weight_name: &str,
        tensor: KerasTensor,
    ) -> anyhow::Result<()> {
        let param = KerasParam::classify(weight_name)
            .with_context(|| format!("unknown weight {weight_name:?} in layer {layer:?}"))?;

        let weights = self.layers.entry(layer.to_string()).or_default();
        if weights.insert(param, tensor).is_some() {
            bail!("duplicate {param:?} weight {weight_name:?} in layer {layer:?}");
        }
        Ok(())
    }

    /// Lookup the weights of a layer.
    pub fn layer(
        &self,
        name: &str,
    ) -> anyhow::Result<&KerasLayerWeights> {
        self.layers
            .get(name)
            .with_context(|| format!("weights have no layer {name:?}"))
    }

    /// Read a Keras ``.h5`` weights archive.
    ///
    /// Both whole-model saves (layers under ``model_weights``) and
    /// weight-only saves (layers at the root) are read.
    #[cfg(feature = "hdf5")]
    #[tracing::instrument]
    pub fn read_hdf5(path: &Path) -> anyhow::Result<Self> {
        let file = hdf5::File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let root = if file.link_exists("model_weights") {
            file.group("model_weights")?
        } else {
            file.group("/")?
        };

        let mut weights = Self::default();
        for layer in root.member_names()? {
            let Ok(group) = root.group(&layer) else {
                continue;
            };
            let mut datasets = Vec::new();
            collect_datasets(&group, &mut datasets)?;
            for (name, tensor) in datasets {
                weights.insert(&layer, &name, tensor)?;
            }
        }
        tracing::debug!(layers = weights.layers.len(), "read keras weights");
        Ok(weights)
    }

    /// Read a Keras ``.h5`` weights archive.
    ///
    /// Always fails; reading HDF5 needs the ``hdf5`` feature.
    #[cfg(not(feature = "hdf5"))]
    pub fn read_hdf5(path: &Path) -> anyhow::Result<Self> {
        bail!(
            "reading {} needs the `hdf5` feature of dilated-resnet",
            path.display()
        )
    }
}

#[cfg(feature = "hdf5")]
fn collect_datasets(
    group: &hdf5::Group,
    out: &mut Vec<(String, KerasTensor)>,
) -> anyhow::Result<()> {
    for name in group.member_names()? {
        if let Ok(dataset) = group.dataset(&name) {
            let tensor = KerasTensor::new(dataset.shape(), dataset.read_raw::<f32>()?)
                .with_context(|| format!("reading {name:?}"))?;
            out.push((name, tensor));
        } else if let Ok(sub) = group.group(&name) {
            collect_datasets(&sub, out)?;
        }
    }
    Ok(())
}

/// Is `path` a Keras HDF5 archive, by extension?
pub fn is_hdf5_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("h5" | "hdf5")
    )
}

fn param_tensor<'a>(
    layer: &'a KerasLayerWeights,
    param: KerasParam,
    layer_name: &str,
) -> anyhow::Result<&'a KerasTensor> {
    layer
        .get(&param)
        .with_context(|| format!("layer {layer_name:?} has no {param:?}"))
}

fn vector<B: Backend>(
    tensor: &KerasTensor,
    expected: usize,
    what: &str,
    device: &B::Device,
) -> anyhow::Result<Tensor<B, 1>> {
    if tensor.shape != [expected] {
        bail!("{what} shape {:?} != model shape [{expected}]", tensor.shape);
    }
    Ok(Tensor::from_data(
        TensorData::new(tensor.values.clone(), [expected]),
        device,
    ))
}

/// Copy a named conv/norm layer pair onto a [`ConvNorm2d`].
///
/// # Arguments
///
/// - `weights`: the decoded archive.
/// - `conv_name`: the Keras conv layer name.
/// - `norm_name`: the Keras norm layer name.
/// - `order`: the stored kernel order.
/// - `target`: the module to load.
pub fn copy_keras_conv_norm<B: Backend>(
    weights: &KerasWeights,
    conv_name: &str,
    norm_name: &str,
    order: KerasKernelOrder,
    target: ConvNorm2d<B>,
) -> anyhow::Result<ConvNorm2d<B>> {
    let conv = weights.layer(conv_name)?;
    let norm = weights.layer(norm_name)?;
    let mut target = target;
    let device = target.conv.weight.val().device();

    let expected = target.conv.weight.dims();
    let (found, values) = param_tensor(conv, KerasParam::Kernel, conv_name)?.to_oihw(order)?;
    if found != expected {
        bail!("conv weight shape {found:?} != model shape {expected:?}");
    }
    let kernel: Tensor<B, 4> = Tensor::from_data(TensorData::new(values, found), &device);
    target.conv.weight = target.conv.weight.map(|_| kernel);

    let out_channels = expected[0];
    target.conv.bias = match (conv.get(&KerasParam::Bias), target.conv.bias) {
        (Some(bias), Some(param)) => {
            let bias = vector::<B>(bias, out_channels, "conv bias", &device)?;
            Some(param.map(|_| bias))
        }
        (None, None) => None,
        (Some(_), None) => bail!("weights carry a conv bias; model is configured without one"),
        (None, Some(_)) => bail!("weights carry no conv bias; model is configured with one"),
    };

    let features = target.norm.gamma.dims()[0];
    let gamma = vector::<B>(
        param_tensor(norm, KerasParam::Gamma, norm_name)?,
        features,
        "norm gamma",
        &device,
    )?;
    let beta = vector::<B>(
        param_tensor(norm, KerasParam::Beta, norm_name)?,
        features,
        "norm beta",
        &device,
    )?;
    let mean = vector::<B>(
        param_tensor(norm, KerasParam::MovingMean, norm_name)?,
        features,
        "norm moving mean",
        &device,
    )?;
    let var = vector::<B>(
        param_tensor(norm, KerasParam::MovingVariance, norm_name)?,
        features,
        "norm moving variance",
        &device,
    )?;

    target.norm.gamma = target.norm.gamma.map(|_| gamma);
    target.norm.beta = target.norm.beta.map(|_| beta);
    target.norm.running_mean = RunningState::new(mean);
    target.norm.running_var = RunningState::new(var);

    Ok(target)
}

fn copy_keras_block<B: Backend>(
    weights: &KerasWeights,
    names: &BlockNames,
    order: KerasKernelOrder,
    target: BottleneckBlock<B>,
) -> anyhow::Result<BottleneckBlock<B>> {
    let copy = |branch: Branch, target: ConvNorm2d<B>| {
        copy_keras_conv_norm(
            weights,
            &names.conv(branch),
            &names.norm(branch),
            order,
            target,
        )
        .context(branch)
    };

    let shortcut = match target.shortcut {
        Some(mut shortcut) => {
            shortcut.conv_norm = copy(Branch::B1, shortcut.conv_norm)?;
            Some(shortcut)
        }
        None => None,
    };

    Ok(BottleneckBlock {
        branch2a: copy(Branch::B2a, target.branch2a)?,
        branch2b: copy(Branch::B2b, target.branch2b)?,
        branch2c: copy(Branch::B2c, target.branch2c)?,
        shortcut,
        act: target.act,
    })
}

impl<B: Backend> DilatedResNet<B> {
    /// Copy decoded Keras weights onto this model.
    ///
    /// Every conv/norm pair is looked up by its Keras layer name.
    /// Extra layers in `weights` (e.g. a classifier head) are ignored.
    ///
    /// # Errors
    ///
    /// If a layer is missing, or its shape does not match the model.
    pub fn load_keras_weights(
        self,
        weights: &KerasWeights,
        order: KerasKernelOrder,
    ) -> anyhow::Result<Self> {
        let mut stem = self.stem;
        stem.conv_norm =
            copy_keras_conv_norm(weights, STEM_CONV_NAME, STEM_NORM_NAME, order, stem.conv_norm)
                .context("stem")?;

        let stages = self
            .stages
            .into_iter()
            .enumerate()
            .map(|(stage_index, mut stage)| -> anyhow::Result<Stage<B>> {
                let stage_number = stage_index + FIRST_RESIDUAL_STAGE;
                stage.blocks = stage
                    .blocks
                    .into_iter()
                    .enumerate()
                    .map(|(block_index, block)| {
                        copy_keras_block(
                            weights,
                            &BlockNames::new(stage_number, block_index),
                            order,
                            block,
                        )
                        .with_context(|| format!("block {block_index}"))
                    })
                    .collect::<anyhow::Result<Vec<_>>>()
                    .with_context(|| format!("stage {stage_number}"))?;
                Ok(stage)
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(DilatedResNet { stem, stages })
    }

    /// Read a Keras ``.h5`` archive and copy it onto this model.
    pub fn load_keras_hdf5<P: AsRef<Path>>(
        self,
        path: P,
        order: KerasKernelOrder,
    ) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let weights = KerasWeights::read_hdf5(path)?;
        self.load_keras_weights(&weights, order)
            .with_context(|| format!("loading weights from {}", path.display()))
    }
}
