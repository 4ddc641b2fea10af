//! The layer contract and the bundled layer variants.
//!
//! A layer is a configured, shape-transforming unit. It is asked, in this
//! order, to
//!
//! 1. compute its output shape from an input shape (pure),
//! 2. build any persistent state into a [`GraphBuilder`] (once per model),
//! 3. emit the nodes of its forward computation (for both training and
//!    inference passes).
//!
//! Learned parameters are exposed through [`Layer::weights`] and replaced
//! through [`Layer::set_weights`], which is the only hook trainers and
//! loaders use.

mod dense;
mod flatten;
mod pooling;

pub use self::dense::{Activation, Dense};
pub use self::flatten::Flatten;
pub use self::pooling::MaxPool1D;

use std::collections::BTreeMap;

use crate::error::{LayerError, LayerResult};
use crate::graph::{GraphBuilder, Operand};
use crate::shape::Shape;
use crate::tensors::Tensor;

/// Learned parameters of one layer, keyed by parameter name.
pub type Weights = BTreeMap<String, Tensor<f32>>;

/// Capability set every layer variant implements.
pub trait Layer: Send + Sync {
    /// Identity of the layer inside a model.
    fn name(&self) -> &str;

    /// Number of scalar trainable parameters.
    fn param_count(&self) -> usize;

    /// Whether the layer applies an activation after its main operation.
    fn has_activation(&self) -> bool;

    /// Output shape for `input_shape`. Deterministic and side-effect free.
    ///
    /// # Errors
    /// [`LayerError::Shape`] if the input rank or extents are unusable,
    /// [`LayerError::InvalidConfiguration`] if the configuration cannot be
    /// applied to them.
    fn compute_output_shape(&self, input_shape: &Shape) -> LayerResult<Shape>;

    /// Registers persistent state (variables) in the graph.
    ///
    /// # Errors
    /// Fails if the input shape is unusable or the graph rejects a variable.
    fn build(&mut self, graph: &mut dyn GraphBuilder, input_shape: &Shape) -> LayerResult<()>;

    /// Emits the forward computation for `input` and returns its handle.
    ///
    /// Nothing is computed here; `is_training` and `number_of_losses` are
    /// operands the emitted subgraph may consume.
    ///
    /// # Errors
    /// Fails if the graph rejects one of the emitted operations.
    fn forward(
        &self,
        graph: &mut dyn GraphBuilder,
        input: Operand,
        is_training: Operand,
        number_of_losses: Option<Operand>,
    ) -> LayerResult<Operand>;

    /// Names and shapes of the parameters this layer currently declares.
    fn weight_shapes(&self) -> Vec<(String, Vec<usize>)>;

    /// Snapshot of the current parameters; empty for parameterless layers.
    fn weights(&self) -> Weights;

    /// Replaces the parameters.
    ///
    /// # Errors
    /// [`LayerError::MismatchedWeights`] if the names, count or shapes differ
    /// from [`Layer::weight_shapes`].
    fn set_weights(&mut self, weights: Weights) -> LayerResult<()>;
}

/// Checks `provided` against the parameters a layer declares.
///
/// # Errors
/// [`LayerError::MismatchedWeights`] naming the first difference found.
pub fn check_weights(
    layer: &str,
    declared: &[(String, Vec<usize>)],
    provided: &Weights,
) -> LayerResult<()> {
    if declared.len() != provided.len() {
        return Err(LayerError::mismatched(
            layer,
            format!("expected {} weight arrays, got {}", declared.len(), provided.len()),
        ));
    }
    for (name, shape) in declared {
        let tensor = provided
            .get(name)
            .ok_or_else(|| LayerError::mismatched(layer, format!("missing weight `{name}`")))?;
        if &tensor.shape != shape {
            return Err(LayerError::mismatched(
                layer,
                format!("weight `{name}` has shape {:?}, expected {shape:?}", tensor.shape),
            ));
        }
    }
    Ok(())
}

/// Requires a configuration array to have exactly `size` components.
///
/// # Errors
/// [`LayerError::InvalidConfiguration`] otherwise.
pub fn require_array_size(values: &[i64], size: usize, name: &str) -> LayerResult<()> {
    if values.len() == size {
        Ok(())
    } else {
        Err(LayerError::config(format!(
            "{name} should have {size} elements, but got {}",
            values.len()
        )))
    }
}

/// Fails with [`LayerError::Shape`] unless `shape` has `rank` dimensions.
pub(crate) fn require_rank(layer: &str, shape: &Shape, rank: usize) -> LayerResult<()> {
    if shape.num_dimensions() == rank {
        Ok(())
    } else {
        Err(LayerError::shape(format!(
            "layer `{layer}` expects rank-{rank} input, got {shape}"
        )))
    }
}
