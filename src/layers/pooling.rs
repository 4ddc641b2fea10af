//! Max pooling for 1D temporal data (audio, time series).
//!
//! The graph runtime only offers a 2D windowed maximum, so the forward pass
//! lifts `[batch, steps, channels]` to `[batch, steps, 1, channels]`, pools
//! with a `k × 1` window and squeezes the inserted axis away again.

use core::fmt;

use log::debug;

use super::{require_array_size, require_rank, Layer, Weights};
use crate::error::{LayerError, LayerResult};
use crate::graph::{const_array, GraphBuilder, Operand};
use crate::shape::{conv_output_length, Padding, Shape};

/// Axis at which the singleton dimension is inserted.
const EXPAND_AXIS: usize = 2;

/// Downsamples `[batch, steps, channels]` input by taking the maximum over a
/// temporal window.
///
/// `pool_size` and `strides` follow the `(batch, steps, channels)` layout;
/// only the middle component is used for the window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaxPool1D {
    name: String,
    pool_size: [i64; 3],
    strides: [i64; 3],
    padding: Padding,
}

impl MaxPool1D {
    /// Creates the layer after validating its configuration.
    ///
    /// # Errors
    /// [`LayerError::InvalidConfiguration`] if `pool_size` or `strides` does not
    /// have exactly three components, or if the temporal window or stride is
    /// not a positive `i32` (the width of the runtime's window attributes).
    pub fn new(
        name: impl Into<String>,
        pool_size: &[i64],
        strides: &[i64],
        padding: Padding,
    ) -> LayerResult<Self> {
        require_array_size(pool_size, 3, "poolSize")?;
        require_array_size(strides, 3, "strides")?;
        let pool_size = [pool_size[0], pool_size[1], pool_size[2]];
        let strides = [strides[0], strides[1], strides[2]];
        if pool_size[1] <= 0 || strides[1] <= 0 {
            return Err(LayerError::config(format!(
                "temporal pool size {} and stride {} must be positive",
                pool_size[1], strides[1]
            )));
        }
        if i32::try_from(pool_size[1]).is_err() || i32::try_from(strides[1]).is_err() {
            return Err(LayerError::config(format!(
                "temporal pool size {} and stride {} must fit in 32 bits",
                pool_size[1], strides[1]
            )));
        }

        Ok(Self {
            name: name.into(),
            pool_size,
            strides,
            padding,
        })
    }

    /// Window along each input axis.
    pub fn pool_size(&self) -> [i64; 3] {
        self.pool_size
    }

    /// Step along each input axis.
    pub fn strides(&self) -> [i64; 3] {
        self.strides
    }

    /// Boundary policy.
    pub fn padding(&self) -> Padding {
        self.padding
    }
}

impl Default for MaxPool1D {
    fn default() -> Self {
        Self {
            name: "max_pool1d".to_owned(),
            pool_size: [1, 2, 1],
            strides: [1, 2, 1],
            padding: Padding::Valid,
        }
    }
}

impl Layer for MaxPool1D {
    fn name(&self) -> &str {
        &self.name
    }

    fn param_count(&self) -> usize {
        0
    }

    fn has_activation(&self) -> bool {
        false
    }

    fn compute_output_shape(&self, input_shape: &Shape) -> LayerResult<Shape> {
        require_rank(&self.name, input_shape, 3)?;
        let steps = conv_output_length(
            input_shape.size(1),
            self.pool_size[1],
            self.padding,
            self.strides[1],
            1,
        )?;
        Ok(Shape::make(input_shape.size(0), &[steps, input_shape.size(2)]))
    }

    fn build(&mut self, _graph: &mut dyn GraphBuilder, _input_shape: &Shape) -> LayerResult<()> {
        Ok(())
    }

    fn forward(
        &self,
        graph: &mut dyn GraphBuilder,
        input: Operand,
        _is_training: Operand,
        _number_of_losses: Option<Operand>,
    ) -> LayerResult<Operand> {
        debug!("{}: emitting 1D max pool as 2D over axis {EXPAND_AXIS}", self.name);

        let axis = const_array(graph, &[EXPAND_AXIS as i32]);
        let expanded = graph.expand_dims(input, axis)?;

        // range checked in `new`
        let mut window = [1i32; 4];
        let mut steps = [1i32; 4];
        window[EXPAND_AXIS - 1] = i32::try_from(self.pool_size[1])
            .map_err(|_| LayerError::config("pool size does not fit in 32 bits"))?;
        steps[EXPAND_AXIS - 1] = i32::try_from(self.strides[1])
            .map_err(|_| LayerError::config("stride does not fit in 32 bits"))?;
        let window = const_array(graph, &window);
        let steps = const_array(graph, &steps);

        let pooled = graph.max_pool(expanded, window, steps, self.padding)?;
        graph.squeeze(pooled, &[EXPAND_AXIS as i64])
    }

    fn weight_shapes(&self) -> Vec<(String, Vec<usize>)> {
        Vec::new()
    }

    fn weights(&self) -> Weights {
        Weights::new()
    }

    fn set_weights(&mut self, weights: Weights) -> LayerResult<()> {
        if weights.is_empty() {
            return Ok(());
        }
        Err(LayerError::mismatched(
            &self.name,
            format!("layer has no parameters but {} weight arrays were given", weights.len()),
        ))
    }
}

impl fmt::Display for MaxPool1D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MaxPool1D(poolSize={:?}, strides={:?}, padding={})",
            self.pool_size, self.strides, self.padding
        )
    }
}
