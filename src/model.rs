//! `Sequential`: an ordered stack of layers.
//!
//! ```text
//! input → layer[0] → layer[1] → ... → layer[N-1] → output
//! ```
//!
//! The stack is shape-checked when it is assembled, before any graph
//! exists. [`Sequential::build`] then asks each layer to register its state
//! and emit its forward nodes into a fresh [`Graph`].

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::Path;

use log::{debug, info, warn};

use crate::error::{LayerError, LayerResult};
use crate::graph::session::Session;
use crate::graph::{Graph, GraphBuilder, Operand};
use crate::layers::{check_weights, Layer, Weights};
use crate::modelio::{load_weights, save_weights};
use crate::shape::Shape;
use crate::tensors::Tensor;

/// Name of the input placeholder.
pub const INPUT_NAME: &str = "input";
/// Name of the training-flag placeholder.
pub const TRAINING_NAME: &str = "training";

/// Joins a layer name and a parameter name in model-level weight keys.
const KEY_SEPARATOR: char = '/';

struct Built {
    graph: Graph,
    output: Operand,
}

/// Layers executed in order, each output feeding the next input.
pub struct Sequential {
    input_shape: Shape,
    layers: Vec<Box<dyn Layer>>,
    built: Option<Built>,
}

impl Sequential {
    /// Assembles a model and validates the shape chain.
    ///
    /// # Errors
    /// [`LayerError::InvalidConfiguration`] for empty or duplicate layer names,
    /// names containing the `/` key separator, or any error a layer reports
    /// from [`Layer::compute_output_shape`].
    pub fn new(input_shape: Shape, layers: Vec<Box<dyn Layer>>) -> LayerResult<Self> {
        let mut seen = HashSet::new();
        for layer in &layers {
            let name = layer.name();
            if name.is_empty() {
                return Err(LayerError::config("every layer in a model needs a name"));
            }
            if name.contains(KEY_SEPARATOR) {
                return Err(LayerError::config(format!(
                    "layer name `{name}` must not contain `{KEY_SEPARATOR}`"
                )));
            }
            if !seen.insert(name.to_owned()) {
                return Err(LayerError::config(format!("duplicate layer name `{name}`")));
            }
        }

        let mut shape = input_shape.clone();
        for layer in &layers {
            shape = layer.compute_output_shape(&shape)?;
            debug!("{} -> {shape}", layer.name());
        }

        Ok(Self {
            input_shape,
            layers,
            built: None,
        })
    }

    /// Shape the model accepts.
    pub fn input_shape(&self) -> &Shape {
        &self.input_shape
    }

    /// Shape the model produces.
    ///
    /// # Errors
    /// Propagates layer shape errors; cannot fail for a model built by [`Sequential::new`].
    pub fn output_shape(&self) -> LayerResult<Shape> {
        self.layers
            .iter()
            .try_fold(self.input_shape.clone(), |shape, layer| layer.compute_output_shape(&shape))
    }

    /// Layers in execution order.
    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    /// Looks a layer up by name.
    pub fn layer(&self, name: &str) -> Option<&dyn Layer> {
        self.layers.iter().find(|l| l.name() == name).map(|l| &**l)
    }

    /// Looks a layer up by name for weight assignment.
    pub fn layer_mut(&mut self, name: &str) -> Option<&mut (dyn Layer + 'static)> {
        self.layers.iter_mut().find(|l| l.name() == name).map(|l| &mut **l)
    }

    /// True once [`Sequential::build`] has succeeded.
    pub fn is_built(&self) -> bool {
        self.built.is_some()
    }

    /// The recorded graph, once built.
    pub fn graph(&self) -> Option<&Graph> {
        self.built.as_ref().map(|b| &b.graph)
    }

    /// Builds every layer once and records the forward graph.
    ///
    /// # Errors
    /// Fails if the model is already built or any layer rejects its input.
    pub fn build(&mut self) -> LayerResult<()> {
        if self.built.is_some() {
            return Err(LayerError::config("model is already built"));
        }

        let mut graph = Graph::new();
        let mut current = graph.placeholder(INPUT_NAME, &self.input_shape)?;
        let training = graph.placeholder_flag(TRAINING_NAME)?;
        let mut shape = self.input_shape.clone();

        for layer in &mut self.layers {
            layer.build(&mut graph, &shape)?;
            current = layer.forward(&mut graph, current, training, None)?;
            shape = layer.compute_output_shape(&shape)?;
            debug!("built `{}`: {shape}", layer.name());
        }

        info!("model built: {} layers, {} graph nodes", self.layers.len(), graph.len());
        self.built = Some(Built { graph, output: current });
        Ok(())
    }

    /// Runs the model in inference mode.
    ///
    /// # Errors
    /// Fails if the model is not built or `input` does not match the input shape.
    pub fn predict(&self, input: &Tensor<f32>) -> LayerResult<Tensor<f32>> {
        self.run(input, false)
    }

    /// Runs the model with the training flag set.
    ///
    /// # Errors
    /// Same as [`Sequential::predict`].
    pub fn forward_training(&self, input: &Tensor<f32>) -> LayerResult<Tensor<f32>> {
        self.run(input, true)
    }

    fn run(&self, input: &Tensor<f32>, training: bool) -> LayerResult<Tensor<f32>> {
        let built = self
            .built
            .as_ref()
            .ok_or_else(|| LayerError::config("model must be built before it can run"))?;

        let mut session = Session::new(&built.graph);
        session.feed(INPUT_NAME, input.clone()).feed_flag(TRAINING_NAME, training);
        for layer in &self.layers {
            for (param, value) in layer.weights() {
                session.assign(&weight_key(layer.name(), &param), value);
            }
        }
        session.run(built.output)
    }

    /// Every layer's weights under `"layer/param"` keys.
    pub fn weights(&self) -> Weights {
        let mut all = Weights::new();
        for layer in &self.layers {
            for (param, value) in layer.weights() {
                all.insert(weight_key(layer.name(), &param), value);
            }
        }
        all
    }

    /// Distributes `"layer/param"` keyed weights to their layers.
    ///
    /// Layers not mentioned keep their current weights. Every share is
    /// checked against its layer before any layer is touched, so a failed
    /// call leaves the model as it was.
    ///
    /// # Errors
    /// [`LayerError::MismatchedWeights`] if a key names no layer or a layer
    /// rejects its share.
    pub fn set_weights(&mut self, weights: Weights) -> LayerResult<()> {
        let mut grouped: BTreeMap<String, Weights> = BTreeMap::new();
        for (key, value) in weights {
            let (layer, param) = key.split_once(KEY_SEPARATOR).ok_or_else(|| {
                LayerError::mismatched("model", format!("key `{key}` is not `layer/param`"))
            })?;
            grouped.entry(layer.to_owned()).or_default().insert(param.to_owned(), value);
        }

        for (name, share) in &grouped {
            let layer = self.layer(name).ok_or_else(|| {
                warn!("weights given for unknown layer `{name}`");
                LayerError::mismatched(name, "no layer with this name in the model")
            })?;
            check_weights(name, &layer.weight_shapes(), share)?;
        }

        for (name, share) in grouped {
            if let Some(layer) = self.layer_mut(&name) {
                layer.set_weights(share)?;
            }
        }
        Ok(())
    }

    /// Writes all weights to `path`.
    ///
    /// # Errors
    /// Propagates I/O failures.
    pub fn save_weights(&self, path: impl AsRef<Path>) -> LayerResult<()> {
        save_weights(path, &self.weights())
    }

    /// Reads weights from `path` and assigns them.
    ///
    /// # Errors
    /// I/O and corruption errors from the file, or mismatches from the layers.
    pub fn load_weights(&mut self, path: impl AsRef<Path>) -> LayerResult<()> {
        let weights = load_weights(path)?;
        self.set_weights(weights)
    }

    /// Human-readable table of layers, output shapes and parameter counts.
    ///
    /// # Errors
    /// Propagates layer shape errors.
    pub fn summary(&self) -> LayerResult<String> {
        let mut out = String::new();
        let mut shape = self.input_shape.clone();
        let mut total = 0;
        let _ = writeln!(out, "{:<24}{:<20}{:>10}", "Layer", "Output shape", "Params");
        let _ = writeln!(out, "{:<24}{:<20}{:>10}", INPUT_NAME, shape.to_string(), 0);
        for layer in &self.layers {
            shape = layer.compute_output_shape(&shape)?;
            total += layer.param_count();
            let _ = writeln!(
                out,
                "{:<24}{:<20}{:>10}",
                layer.name(),
                shape.to_string(),
                layer.param_count()
            );
        }
        let _ = write!(out, "Total params: {total}");
        info!("model summary\n{out}");
        Ok(out)
    }
}

fn weight_key(layer: &str, param: &str) -> String {
    format!("{layer}{KEY_SEPARATOR}{param}")
}
