//! # Dilated `ResNet` Utilities
use burn::nn::Initializer;
use serde::{Deserialize, Serialize};

/// Kaiming normal init for convolutions feeding a `ReLU`.
pub const CONV_INTO_RELU_INITIALIZER: Initializer = Initializer::KaimingNormal {
    gain: std::f64::consts::SQRT_2,
    fan_out_only: true,
};

/// Which convolution of a strided bottleneck block carries the stride.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StridePlacement {
    /// On the first 1x1 reduction conv (Keras / Caffe `ResNet` v1).
    #[default]
    Reduce,

    /// On the spatial kxk conv (torchvision `ResNet` v1.5).
    Spatial,
}

/// Parameter naming scheme of a weights file.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WeightLayout {
    /// Keras ``ResNet50`` layer names; see [`super::naming`].
    #[default]
    Keras,

    /// torchvision ``ResNet`` state dict keys.
    TorchVision,
}

/// Kernel storage order of a Keras ``.h5`` weights archive.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KerasKernelOrder {
    /// ``[out, in, kh, kw]``, spatially flipped for Theano's true convolution
    /// (``th_kernels`` archives).
    #[default]
    Theano,

    /// ``[kh, kw, in, out]``, unflipped (``tf_kernels`` archives).
    TensorFlow,
}

/// Per-stage ``(stride, dilation)`` for a target output stride.
///
/// Each stage nominally strides by 2; once the running stride would
/// pass `output_stride`, the stage keeps stride 1 and doubles the dilation instead.
///
/// # Arguments
///
/// - `input_stride`: the stride of the stage input (4 after the stem).
/// - `output_stride`: the target output stride.
/// - `nominal_strides`: the undilated stride of each stage.
pub fn stage_stride_schedule(
    input_stride: usize,
    output_stride: usize,
    nominal_strides: &[usize],
) -> Vec<(usize, usize)> {
    let mut current_stride = input_stride;
    let mut dilation = 1;

    nominal_strides
        .iter()
        .map(|&stride| {
            if current_stride * stride > output_stride {
                dilation *= stride;
                (1, dilation)
            } else {
                current_stride *= stride;
                (stride, dilation)
            }
        })
        .collect()
}
