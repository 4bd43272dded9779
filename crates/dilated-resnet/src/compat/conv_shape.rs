//! # Convolution Shape Utilities
//!
//! Output-size arithmetic for convolution and pooling windows,
//! both for explicit (symmetric) padding and for TF/Keras style ``'same'`` padding.

/// Predict the output size of a 1D convolution operation.
///
/// ```text
/// out_size = floor( ((in_size + 2*padding - dilation*(kernel_size-1) - 1) / stride) + 1 )
/// ```
///
/// # Arguments
///
/// - `input_size`: The input dimension size, must be > 0.
/// - `kernel_size`: The kernel size, must be > 0.
/// - `stride`: The stride of the convolution, must be > 0.
/// - `padding`: The padding of the convolution, added evenly to both sides of the input.
/// - `dilation`: The dilation of the convolution, must be > 0.
///
/// # Returns
///
/// An `Option<usize>` representing the output size; or `None` for <= 0.
pub fn maybe_conv1d_output_size(
    input_size: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
) -> Option<usize> {
    assert!(input_size > 0);
    assert!(kernel_size > 0);
    assert!(stride > 0);
    assert!(dilation > 0);

    let effective_size = input_size + 2 * padding;
    let pos = effective_size + stride;
    let kernel_width = 1 + dilation * (kernel_size - 1);

    if pos < kernel_width {
        return None;
    }
    let x = (pos - kernel_width) / stride;
    if x < 1 { None } else { Some(x) }
}

/// Predict the output shape of a D convolution operation.
///
/// This is the ``panic``-ing generalization of [`maybe_conv1d_output_size`] to D dimensions.
///
/// # Panics
///
/// If any output dimension would be <= 0.
pub fn expect_conv_output_shape<const D: usize>(
    input_shape: [usize; D],
    kernel_shape: [usize; D],
    stride: [usize; D],
    padding: [usize; D],
    dilation: [usize; D],
) -> [usize; D] {
    let mut output_shape = input_shape;
    for i in 0..D {
        output_shape[i] = match maybe_conv1d_output_size(
            input_shape[i],
            kernel_shape[i],
            stride[i],
            padding[i],
            dilation[i],
        ) {
            Some(size) => size,
            None => panic!(
                "No legal output size for conv with:\n input_shape:{input_shape:?}\n kernel_shape:{kernel_shape:?}\n stride:{stride:?}\n dilation:{dilation:?}\n padding:{padding:?}",
            ),
        };
    }
    output_shape
}

/// The output size of a ``'same'`` padded window: ``ceil(size / stride)``.
pub fn same_output_size(
    size: usize,
    stride: usize,
) -> usize {
    assert!(stride > 0);
    size.div_ceil(stride)
}

/// Calculate the total asymmetric TF-like ``'same'`` padding for a window.
///
/// ```text
/// pad = max((ceil(size / stride) - 1) * stride + (kernel_size - 1) * dilation + 1 - size, 0)
/// ```
pub fn get_same_padding(
    size: usize,
    kernel_size: usize,
    stride: usize,
    dilation: usize,
) -> usize {
    let span = (same_output_size(size, stride) - 1) * stride + (kernel_size - 1) * dilation + 1;
    span.saturating_sub(size)
}

/// The symmetric padding which gives a stride-1, odd-kernel convolution ``'same'`` output.
///
/// # Panics
///
/// If the kernel size is even.
pub fn symmetric_same_padding(
    kernel_size: usize,
    dilation: usize,
) -> usize {
    assert!(
        kernel_size % 2 == 1,
        "symmetric 'same' padding requires an odd kernel_size: {kernel_size}"
    );
    dilation * (kernel_size - 1) / 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conv1d_output_size() {
        // 7x7/2 stem conv with padding 3.
        assert_eq!(maybe_conv1d_output_size(224, 7, 2, 3, 1), Some(112));
        assert_eq!(maybe_conv1d_output_size(225, 7, 2, 3, 1), Some(113));

        // 1x1/2 projection.
        assert_eq!(maybe_conv1d_output_size(56, 1, 2, 0, 1), Some(28));
        assert_eq!(maybe_conv1d_output_size(57, 1, 2, 0, 1), Some(29));

        // Dilated 3x3 with matching padding keeps the size.
        assert_eq!(maybe_conv1d_output_size(28, 3, 1, 4, 4), Some(28));

        assert_eq!(maybe_conv1d_output_size(2, 5, 1, 0, 1), None);
    }

    #[test]
    fn test_expect_conv_output_shape() {
        assert_eq!(
            expect_conv_output_shape([224, 160], [7, 7], [2, 2], [3, 3], [1, 1]),
            [112, 80]
        );
    }

    #[test]
    #[should_panic(expected = "No legal output size")]
    fn test_expect_conv_output_shape_panic() {
        expect_conv_output_shape([2], [5], [1], [0], [1]);
    }

    #[test]
    fn test_get_same_padding() {
        assert_eq!(get_same_padding(10, 1, 1, 1), 0);
        assert_eq!(get_same_padding(10, 3, 1, 1), 2);
        assert_eq!(get_same_padding(10, 3, 2, 1), 1);
        assert_eq!(get_same_padding(11, 3, 2, 1), 2);
        assert_eq!(get_same_padding(10, 3, 1, 2), 4);
    }

    #[test]
    fn test_same_output_size() {
        assert_eq!(same_output_size(112, 2), 56);
        assert_eq!(same_output_size(113, 2), 57);
        assert_eq!(same_output_size(7, 1), 7);
    }

    #[test]
    fn test_symmetric_same_padding() {
        assert_eq!(symmetric_same_padding(3, 1), 1);
        assert_eq!(symmetric_same_padding(3, 2), 2);
        assert_eq!(symmetric_same_padding(3, 4), 4);
        assert_eq!(symmetric_same_padding(7, 1), 3);
    }

    #[test]
    #[should_panic(expected = "odd kernel_size")]
    fn test_symmetric_same_padding_even_kernel() {
        symmetric_same_padding(2, 1);
    }
}
