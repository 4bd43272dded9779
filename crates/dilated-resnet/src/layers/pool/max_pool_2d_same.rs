//! # Max Pooling with ``'same'`` Padding
//!
//! [`MaxPool2dSame`] pads its input to the Keras ``'same'`` window layout
//! with `-inf`, then applies an unpadded [`MaxPool2d`].

use crate::compat::conv_shape::{get_same_padding, same_output_size};
use burn::config::Config;
use burn::module::Module;
use burn::nn::PaddingConfig2d;
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::prelude::{Backend, Tensor};

/// [`MaxPool2dSame`] Config.
#[derive(Config, Debug)]
pub struct MaxPool2dSameConfig {
    /// The size of the pooling window.
    pub kernel_size: [usize; 2],

    /// The stride of the pooling window.
    #[config(default = "[1, 1]")]
    pub strides: [usize; 2],
}

impl MaxPool2dSameConfig {
    /// Initialize a [`MaxPool2dSame`].
    pub fn init(&self) -> MaxPool2dSame {
        MaxPool2dSame {
            kernel_size: self.kernel_size,
            strides: self.strides,
            pool: MaxPool2dConfig::new(self.kernel_size)
                .with_strides(self.strides)
                .with_padding(PaddingConfig2d::Explicit(0, 0))
                .init(),
        }
    }
}

/// `MaxPool2dSame`
///
/// TensorFlow / Keras like ``padding='same'`` wrapper for 2D max pooling.
///
/// Odd padding totals place the extra row / column at the bottom / right,
/// so windows line up with the Keras layer; pad cells never win the max.
#[derive(Module, Clone, Debug)]
pub struct MaxPool2dSame {
    kernel_size: [usize; 2],
    strides: [usize; 2],
    pool: MaxPool2d,
}

impl MaxPool2dSame {
    /// The pooling window.
    pub fn kernel_size(&self) -> [usize; 2] {
        self.kernel_size
    }

    /// The pooling stride.
    pub fn strides(&self) -> [usize; 2] {
        self.strides
    }

    /// Get the output resolution for a given input resolution.
    ///
    /// ``ceil(input / stride)`` on each axis.
    pub fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        [
            same_output_size(input_resolution[0], self.strides[0]),
            same_output_size(input_resolution[1], self.strides[1]),
        ]
    }

    /// Forward Pass.
    pub fn forward<B: Backend>(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let x = pad_same(
            input,
            self.kernel_size,
            self.strides,
            [1, 1],
            f32::NEG_INFINITY,
        );
        self.pool.forward(x)
    }
}

/// Dynamically pad input x with 'SAME' padding for a window with the specified args.
pub fn pad_same<B: Backend>(
    input: Tensor<B, 4>,
    kernel_size: [usize; 2],
    stride: [usize; 2],
    dilation: [usize; 2],
    value: f32,
) -> Tensor<B, 4> {
    let [_, _, ih, iw] = input.dims();
    let pad_h = get_same_padding(ih, kernel_size[0], stride[0], dilation[0]);
    let pad_w = get_same_padding(iw, kernel_size[1], stride[1], dilation[1]);
    if pad_h == 0 && pad_w == 0 {
        return input;
    }
    input.pad(
        (pad_w / 2, pad_w - pad_w / 2, pad_h / 2, pad_h - pad_h / 2),
        value,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::TensorData;

    type B = NdArray<f32>;

    #[test]
    fn test_output_resolution() {
        let pool = MaxPool2dSameConfig::new([3, 3]).with_strides([2, 2]).init();
        assert_eq!(pool.kernel_size(), [3, 3]);
        assert_eq!(pool.strides(), [2, 2]);
        assert_eq!(pool.output_resolution([112, 112]), [56, 56]);
        assert_eq!(pool.output_resolution([113, 57]), [57, 29]);
    }

    #[test]
    fn test_forward_shapes() {
        let device = Default::default();
        let pool = MaxPool2dSameConfig::new([3, 3]).with_strides([2, 2]).init();

        for (h, w) in [(8, 8), (9, 7), (1, 1)] {
            let input: Tensor<B, 4> = Tensor::ones([2, 3, h, w], &device);
            let output = pool.forward(input);
            assert_eq!(output.dims(), [2, 3, h.div_ceil(2), w.div_ceil(2)]);
        }
    }

    #[test]
    fn test_forward_aligns_windows_like_keras() {
        let device = Default::default();
        let pool = MaxPool2dSameConfig::new([3, 3]).with_strides([2, 2]).init();

        // 4x4 input; 'same' pads one row / col at the bottom / right only,
        // so the first window covers rows/cols [0, 3).
        let input: Tensor<B, 4> = Tensor::from_data(
            TensorData::new(
                vec![
                    1.0f32, 2.0, 3.0, 4.0, //
                    5.0, 6.0, 7.0, 8.0, //
                    9.0, 10.0, 11.0, 12.0, //
                    13.0, 14.0, 15.0, 16.0,
                ],
                [1, 1, 4, 4],
            ),
            &device,
        );

        let output = pool.forward(input);
        output
            .into_data()
            .assert_eq(&TensorData::new(vec![11.0f32, 12.0, 15.0, 16.0], [1, 1, 2, 2]), true);
    }

    #[test]
    fn test_forward_odd_input_pads_both_sides() {
        let device = Default::default();
        let pool = MaxPool2dSameConfig::new([3, 3]).with_strides([2, 2]).init();

        // 5x5 input; 'same' pads one row / col on each side,
        // so windows cover rows/cols {0, 1}, {1, 2, 3}, {3, 4}.
        let input: Tensor<B, 4> = Tensor::from_data(
            TensorData::new((1..=25).map(|v| v as f32).collect::<Vec<_>>(), [1, 1, 5, 5]),
            &device,
        );

        let output = pool.forward(input);
        output.into_data().assert_eq(
            &TensorData::new(
                vec![
                    7.0f32, 9.0, 10.0, //
                    17.0, 19.0, 20.0, //
                    22.0, 24.0, 25.0,
                ],
                [1, 1, 3, 3],
            ),
            true,
        );
    }

    #[test]
    fn test_forward_negative_values_ignore_padding() {
        let device = Default::default();
        let pool = MaxPool2dSameConfig::new([3, 3]).with_strides([2, 2]).init();

        let input: Tensor<B, 4> = Tensor::full([1, 1, 2, 2], -3.0, &device);
        let output = pool.forward(input);
        output
            .into_data()
            .assert_eq(&TensorData::new(vec![-3.0f32], [1, 1, 1, 1]), true);
    }
}
