//! Fully connected layer.
//!
//! Parameters are declared at [`Layer::build`] time, once the number of
//! input features is known. They start as zeros; values come from a trainer
//! or a weights file through [`Layer::set_weights`].

use log::debug;

use super::{check_weights, require_rank, Layer, Weights};
use crate::error::{LayerError, LayerResult};
use crate::graph::{GraphBuilder, Operand};
use crate::shape::Shape;
use crate::tensors::Tensor;

const KERNEL: &str = "kernel";
const BIAS: &str = "bias";

/// Activation applied after the affine transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activation {
    /// Identity.
    #[default]
    Linear,
    /// `max(0, x)`.
    Relu,
}

/// `y = activation(x · kernel + bias)` on `[batch, features]` input.
#[derive(Debug, Clone, PartialEq)]
pub struct Dense {
    name: String,
    units: usize,
    activation: Activation,
    kernel: Option<Tensor<f32>>,
    bias: Option<Tensor<f32>>,
    variables: Option<(Operand, Operand)>,
}

impl Dense {
    /// Creates the layer.
    ///
    /// # Errors
    /// [`LayerError::InvalidConfiguration`] if `units` is zero.
    pub fn new(name: impl Into<String>, units: usize, activation: Activation) -> LayerResult<Self> {
        if units == 0 {
            return Err(LayerError::config("dense layer needs at least one unit"));
        }
        Ok(Self {
            name: name.into(),
            units,
            activation,
            kernel: None,
            bias: None,
            variables: None,
        })
    }

    /// Output width.
    pub fn units(&self) -> usize {
        self.units
    }

    /// True once [`Layer::build`] has declared the parameters.
    pub fn is_built(&self) -> bool {
        self.kernel.is_some()
    }

    fn input_features(&self, input_shape: &Shape) -> LayerResult<usize> {
        require_rank(&self.name, input_shape, 2)?;
        let features = input_shape.size(1);
        if features <= 0 {
            return Err(LayerError::shape(format!(
                "layer `{}` needs a known, positive feature count, got {input_shape}",
                self.name
            )));
        }
        Ok(features as usize)
    }

    fn variable_name(&self, param: &str) -> String {
        format!("{}/{param}", self.name)
    }
}

impl Layer for Dense {
    fn name(&self) -> &str {
        &self.name
    }

    fn param_count(&self) -> usize {
        self.weight_shapes()
            .iter()
            .map(|(_, shape)| shape.iter().product::<usize>())
            .sum()
    }

    fn has_activation(&self) -> bool {
        true
    }

    fn compute_output_shape(&self, input_shape: &Shape) -> LayerResult<Shape> {
        self.input_features(input_shape)?;
        Ok(Shape::make(input_shape.size(0), &[self.units as i64]))
    }

    fn build(&mut self, graph: &mut dyn GraphBuilder, input_shape: &Shape) -> LayerResult<()> {
        let features = self.input_features(input_shape)?;
        debug!("{}: declaring kernel [{features}, {}] and bias", self.name, self.units);

        let kernel = graph.variable(
            &self.variable_name(KERNEL),
            &Shape::from_dims(vec![features as i64, self.units as i64]),
        )?;
        let bias = graph.variable(
            &self.variable_name(BIAS),
            &Shape::from_dims(vec![self.units as i64]),
        )?;

        self.variables = Some((kernel, bias));
        self.kernel = Some(Tensor::zeros(vec![features, self.units]));
        self.bias = Some(Tensor::zeros(vec![self.units]));
        Ok(())
    }

    fn forward(
        &self,
        graph: &mut dyn GraphBuilder,
        input: Operand,
        _is_training: Operand,
        _number_of_losses: Option<Operand>,
    ) -> LayerResult<Operand> {
        let (kernel, bias) = self
            .variables
            .ok_or_else(|| LayerError::graph(format!("layer `{}` was not built", self.name)))?;

        let z = graph.mat_mul(input, kernel)?;
        let z = graph.bias_add(z, bias)?;
        match self.activation {
            Activation::Linear => Ok(z),
            Activation::Relu => graph.relu(z),
        }
    }

    fn weight_shapes(&self) -> Vec<(String, Vec<usize>)> {
        match (&self.kernel, &self.bias) {
            (Some(k), Some(b)) => vec![
                (KERNEL.to_owned(), k.shape.clone()),
                (BIAS.to_owned(), b.shape.clone()),
            ],
            _ => Vec::new(),
        }
    }

    fn weights(&self) -> Weights {
        let mut w = Weights::new();
        if let Some(k) = &self.kernel {
            w.insert(KERNEL.to_owned(), k.clone());
        }
        if let Some(b) = &self.bias {
            w.insert(BIAS.to_owned(), b.clone());
        }
        w
    }

    fn set_weights(&mut self, mut weights: Weights) -> LayerResult<()> {
        check_weights(&self.name, &self.weight_shapes(), &weights)?;
        if weights.is_empty() {
            return Ok(());
        }
        self.kernel = weights.remove(KERNEL);
        self.bias = weights.remove(BIAS);
        Ok(())
    }
}
