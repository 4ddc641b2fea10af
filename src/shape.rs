//! Shape descriptors and sliding-window arithmetic.
//!
//! A [`Shape`] is an ordered list of dimension sizes where [`UNKNOWN_SIZE`]
//! stands for a dimension that is only fixed at execution time, usually the
//! batch. The free functions convert shapes into the integer arrays the graph
//! runtime consumes and compute output lengths for convolution and pooling
//! windows.

use core::fmt;

use crate::error::{LayerError, LayerResult};

/// Marker for a dimension whose size is not known while building the graph.
pub const UNKNOWN_SIZE: i64 = -1;

/// Ordered dimension sizes of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<i64>,
}

impl Shape {
    /// Builds a shape from its first dimension and the remaining ones.
    pub fn make(head: i64, tail: &[i64]) -> Self {
        let mut dims = Vec::with_capacity(tail.len() + 1);
        dims.push(head);
        dims.extend_from_slice(tail);
        Self { dims }
    }

    /// A shape with an unknown leading batch dimension.
    pub fn unknown_batch(tail: &[i64]) -> Self {
        Self::make(UNKNOWN_SIZE, tail)
    }

    /// Wraps raw dimensions as they are.
    pub fn from_dims(dims: impl Into<Vec<i64>>) -> Self {
        Self { dims: dims.into() }
    }

    /// Rank of the shape.
    pub fn num_dimensions(&self) -> usize {
        self.dims.len()
    }

    /// Size of dimension `i`.
    ///
    /// # Panics
    /// Panics if `i` is out of range.
    pub fn size(&self, i: usize) -> i64 {
        self.dims[i]
    }

    /// All dimensions in order.
    pub fn dims(&self) -> &[i64] {
        &self.dims
    }

    /// True when dimension `i` has a concrete size.
    pub fn is_known(&self, i: usize) -> bool {
        self.dims.get(i).is_some_and(|&d| d >= 0)
    }

    /// True when every dimension has a concrete size.
    pub fn is_fully_known(&self) -> bool {
        self.dims.iter().all(|&d| d >= 0)
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{d}")?;
        }
        f.write_str("]")
    }
}

/// Boundary policy for sliding-window operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Padding {
    /// No padding; the output shrinks by the window extent.
    #[default]
    Valid,
    /// Implicit padding so that `output = ceil(input / stride)`.
    Same,
}

impl Padding {
    /// The spelling the graph runtime expects.
    pub const fn padding_name(self) -> &'static str {
        match self {
            Self::Valid => "VALID",
            Self::Same => "SAME",
        }
    }
}

impl fmt::Display for Padding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.padding_name())
    }
}

/// Converts a shape into the 32-bit array form used for constant operands.
pub fn shape_to_int_array(shape: &Shape) -> Vec<i32> {
    shape.dims.iter().map(|&d| d as i32).collect()
}

/// Converts a shape into its 64-bit array form.
pub fn shape_to_long_array(shape: &Shape) -> Vec<i64> {
    shape.dims.clone()
}

/// Renders a shape as `[d0, d1, ...]`.
pub fn shape_array_to_string(shape: &Shape) -> String {
    shape.to_string()
}

/// First dimension of `dims`, if any.
pub fn head(dims: &[i64]) -> Option<i64> {
    dims.first().copied()
}

/// Every dimension after the first; empty when `dims` has fewer than two.
pub fn tail(dims: &[i64]) -> &[i64] {
    dims.get(1..).unwrap_or(&[])
}

/// Every dimension of `shape` after the first.
pub fn tail_of_shape(shape: &Shape) -> Vec<i64> {
    tail(&shape.dims).to_vec()
}

/// Rebuilds a shape from a flat dimension list.
///
/// # Errors
/// Returns [`LayerError::Shape`] if `dims` is empty.
pub fn shape_from_dims(dims: &[i64]) -> LayerResult<Shape> {
    let first =
        head(dims).ok_or_else(|| LayerError::shape("cannot build a shape from zero dimensions"))?;
    Ok(Shape::make(first, tail(dims)))
}

/// Number of elements described by `dims`.
///
/// Dimensions are counted by magnitude, so the unknown marker contributes a
/// factor of one and the result is never negative. Any zero dimension yields
/// zero.
pub fn num_elements_in_shape(dims: &[i64]) -> u64 {
    dims.iter().map(|d| d.unsigned_abs()).product()
}

/// Output length of a sliding window along one axis.
///
/// `VALID` gives `floor((L - k_d) / s) + 1` and `SAME` gives `ceil(L / s)`,
/// where `k_d` is the filter extent after dilation. A negative `input_length`
/// is treated as unknown and propagates as [`UNKNOWN_SIZE`].
///
/// # Errors
/// Returns [`LayerError::InvalidConfiguration`] if the filter size, stride or
/// dilation is not positive, or if a `VALID` window does not fit in the input.
pub fn conv_output_length(
    input_length: i64,
    filter_size: i64,
    padding: Padding,
    stride: i64,
    dilation: i64,
) -> LayerResult<i64> {
    if filter_size <= 0 || stride <= 0 || dilation <= 0 {
        return Err(LayerError::config(format!(
            "window size {filter_size}, stride {stride} and dilation {dilation} must all be positive"
        )));
    }
    if input_length < 0 {
        return Ok(UNKNOWN_SIZE);
    }

    let dilated = filter_size + (filter_size - 1) * (dilation - 1);
    let length = match padding {
        Padding::Valid => input_length - dilated + 1,
        Padding::Same => input_length,
    };
    if padding == Padding::Valid && length <= 0 {
        return Err(LayerError::config(format!(
            "window of size {dilated} does not fit in input of length {input_length} with VALID padding"
        )));
    }

    Ok((length + stride - 1) / stride)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_and_same_lengths() {
        assert_eq!(conv_output_length(10, 2, Padding::Valid, 2, 1).unwrap(), 5);
        assert_eq!(conv_output_length(10, 2, Padding::Same, 2, 1).unwrap(), 5);
        assert_eq!(conv_output_length(5, 3, Padding::Valid, 1, 1).unwrap(), 3);
        assert_eq!(conv_output_length(7, 3, Padding::Same, 2, 1).unwrap(), 4);
        assert_eq!(conv_output_length(11, 3, Padding::Valid, 2, 1).unwrap(), 5);
    }

    #[test]
    fn dilation_widens_the_window() {
        // k=3, d=2 covers 5 cells
        assert_eq!(conv_output_length(9, 3, Padding::Valid, 1, 2).unwrap(), 5);
    }

    #[test]
    fn unknown_length_propagates() {
        assert_eq!(
            conv_output_length(UNKNOWN_SIZE, 2, Padding::Valid, 2, 1).unwrap(),
            UNKNOWN_SIZE
        );
    }

    #[test]
    fn oversized_valid_window_fails() {
        let err = conv_output_length(2, 3, Padding::Valid, 1, 1).unwrap_err();
        assert!(matches!(err, LayerError::InvalidConfiguration(_)));
        assert_eq!(conv_output_length(2, 3, Padding::Same, 1, 1).unwrap(), 2);
    }

    #[test]
    fn zero_stride_fails() {
        assert!(conv_output_length(4, 2, Padding::Valid, 0, 1).is_err());
    }

    #[test]
    fn head_and_tail_split() {
        let dims = [-1, 28, 28, 1];
        assert_eq!(head(&dims), Some(-1));
        assert_eq!(tail(&dims), &[28, 28, 1]);
        assert_eq!(tail(&[5]), &[] as &[i64]);
        assert_eq!(head(&[]), None);
        assert_eq!(shape_from_dims(&dims).unwrap(), Shape::unknown_batch(&[28, 28, 1]));
        assert!(shape_from_dims(&[]).is_err());
    }

    #[test]
    fn conversions() {
        let shape = Shape::unknown_batch(&[10, 3]);
        assert_eq!(shape_to_int_array(&shape), vec![-1, 10, 3]);
        assert_eq!(shape_to_long_array(&shape), vec![-1, 10, 3]);
        assert_eq!(shape_array_to_string(&shape), "[-1, 10, 3]");
        assert_eq!(tail_of_shape(&shape), vec![10, 3]);
        assert!(!shape.is_known(0));
        assert!(shape.is_known(1));
        assert!(!shape.is_known(7));
    }
}
