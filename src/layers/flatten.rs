//! Collapses every non-batch axis into one.

use log::debug;

use super::{Layer, Weights};
use crate::error::{LayerError, LayerResult};
use crate::graph::{shape_operand, GraphBuilder, Operand};
use crate::shape::{head, num_elements_in_shape, tail, Shape, UNKNOWN_SIZE};

/// `[batch, d1, .., dn] -> [batch, d1 * .. * dn]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flatten {
    name: String,
}

impl Flatten {
    /// A flatten layer called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn flat_size(&self, input_shape: &Shape) -> LayerResult<i64> {
        let rest = tail(input_shape.dims());
        if rest.is_empty() {
            return Err(LayerError::shape(format!(
                "layer `{}` needs at least one non-batch axis, got {input_shape}",
                self.name
            )));
        }
        if rest.iter().any(|&d| d < 0) {
            return Err(LayerError::shape(format!(
                "layer `{}` cannot flatten unknown dimensions of {input_shape}",
                self.name
            )));
        }
        Ok(num_elements_in_shape(rest) as i64)
    }
}

impl Default for Flatten {
    fn default() -> Self {
        Self::new("flatten")
    }
}

impl Layer for Flatten {
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
        let size = self.flat_size(input_shape)?;
        let batch = head(input_shape.dims()).unwrap_or(UNKNOWN_SIZE);
        Ok(Shape::make(batch, &[size]))
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
        let size = self.flat_size(&graph.static_shape(input)?)?;
        debug!("{}: reshaping to [-1, {size}]", self.name);
        let target = shape_operand(graph, &Shape::unknown_batch(&[size]));
        graph.reshape(input, target)
    }

    fn weight_shapes(&self) -> Vec<(String, Vec<usize>)> {
        Vec::new()
    }

    fn weights(&self) -> Weights {
        Weights::new()
    }

    fn set_weights(&mut self, weights: Weights) -> LayerResult<()> {
        if weights.is_empty() {
            Ok(())
        } else {
            Err(LayerError::mismatched(&self.name, "flatten has no parameters"))
        }
    }
}
