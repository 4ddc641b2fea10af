//! Symbolic graph construction.
//!
//! Layers never compute anything themselves. They receive a [`GraphBuilder`]
//! and emit nodes into it, getting back opaque [`Operand`] handles that feed
//! the next layer. Execution happens later and belongs to whatever runtime
//! sits behind the builder.
//!
//! [`Graph`] is the in-crate builder: it records nodes with statically
//! inferred shapes, and [`session::Session`] evaluates them on the CPU.
//!
//! # Example
//! ```rust
//! use briny_layers::graph::{const_array, Graph, GraphBuilder};
//! use briny_layers::shape::{Padding, Shape};
//!
//! let mut g = Graph::new();
//! let x = g.placeholder("x", &Shape::unknown_batch(&[8, 8, 3])).unwrap();
//! let k = const_array(&mut g, &[1, 2, 2, 1]);
//! let s = const_array(&mut g, &[1, 2, 2, 1]);
//! let y = g.max_pool(x, k, s, Padding::Valid).unwrap();
//! assert_eq!(g.static_shape(y).unwrap(), Shape::unknown_batch(&[4, 4, 3]));
//! ```

pub mod session;

use log::trace;

use crate::error::{LayerError, LayerResult};
use crate::shape::{
    conv_output_length, num_elements_in_shape, shape_to_int_array, Padding, Shape, UNKNOWN_SIZE,
};

/// Opaque handle to a node of a graph.
///
/// Handles are only meaningful for the builder that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operand(usize);

impl Operand {
    /// Position of the node inside its graph.
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Element type carried by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// 32-bit floats: activations and weights.
    Float,
    /// 32-bit integers: axes, window sizes, target shapes.
    Int,
    /// A boolean flag such as the training switch.
    Bool,
}

/// The graph-construction capability layers are written against.
///
/// Integer arguments that a real runtime takes as tensors (axes, window
/// sizes, target shapes) are passed as constant operands, typically made
/// with [`const_array`] or [`shape_operand`].
pub trait GraphBuilder {
    /// Declares a float input fed at execution time.
    ///
    /// # Errors
    /// Fails if the name is already taken.
    fn placeholder(&mut self, name: &str, shape: &Shape) -> LayerResult<Operand>;

    /// Declares a boolean input fed at execution time.
    ///
    /// # Errors
    /// Fails if the name is already taken.
    fn placeholder_flag(&mut self, name: &str) -> LayerResult<Operand>;

    /// A constant vector of integers.
    fn constant_ints(&mut self, values: &[i32]) -> Operand;

    /// A constant boolean.
    fn constant_flag(&mut self, value: bool) -> Operand;

    /// Registers persistent float state of a fully known shape.
    ///
    /// # Errors
    /// Fails if the name is already taken or the shape has unknown dimensions.
    fn variable(&mut self, name: &str, shape: &Shape) -> LayerResult<Operand>;

    /// Inserts a singleton dimension at the position held by the constant `axis`.
    ///
    /// # Errors
    /// Fails if `axis` is not a one-element constant or is out of range.
    fn expand_dims(&mut self, input: Operand, axis: Operand) -> LayerResult<Operand>;

    /// Removes the listed singleton dimensions.
    ///
    /// # Errors
    /// Fails if an axis is out of range or refers to a dimension that is not 1.
    fn squeeze(&mut self, input: Operand, axes: &[i64]) -> LayerResult<Operand>;

    /// Reshapes to the constant target shape; at most one entry may be `-1`.
    ///
    /// # Errors
    /// Fails if the target cannot hold the input elements.
    fn reshape(&mut self, input: Operand, shape: Operand) -> LayerResult<Operand>;

    /// Windowed maximum over the two spatial axes of an NHWC tensor.
    ///
    /// # Errors
    /// Fails unless the input has rank 4 and `ksize`/`strides` are four-element
    /// constants with ones on the batch and channel positions.
    fn max_pool(
        &mut self,
        input: Operand,
        ksize: Operand,
        strides: Operand,
        padding: Padding,
    ) -> LayerResult<Operand>;

    /// Product of two rank-2 tensors.
    ///
    /// # Errors
    /// Fails on rank or inner-dimension mismatch.
    fn mat_mul(&mut self, a: Operand, b: Operand) -> LayerResult<Operand>;

    /// Adds a rank-1 bias along the last axis.
    ///
    /// # Errors
    /// Fails if the bias length differs from the last dimension.
    fn bias_add(&mut self, value: Operand, bias: Operand) -> LayerResult<Operand>;

    /// Elementwise `max(0, x)`.
    ///
    /// # Errors
    /// Fails if `input` is not a float node.
    fn relu(&mut self, input: Operand) -> LayerResult<Operand>;

    /// Shape known for `operand` at construction time.
    ///
    /// # Errors
    /// Fails if the handle does not belong to this builder.
    fn static_shape(&self, operand: Operand) -> LayerResult<Shape>;
}

/// Emits a constant integer vector.
pub fn const_array<G: GraphBuilder + ?Sized>(graph: &mut G, values: &[i32]) -> Operand {
    graph.constant_ints(values)
}

/// Emits `shape` as a constant integer vector.
pub fn shape_operand<G: GraphBuilder + ?Sized>(graph: &mut G, shape: &Shape) -> Operand {
    graph.constant_ints(&shape_to_int_array(shape))
}

/// A recorded operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// Float input.
    Placeholder(String),
    /// Boolean input.
    FlagPlaceholder(String),
    /// Named persistent state.
    Variable(String),
    /// Integer constant.
    ConstInts(Vec<i32>),
    /// Boolean constant.
    ConstFlag(bool),
    /// Singleton insertion at a normalised axis.
    ExpandDims {
        /// Source node.
        input: Operand,
        /// Insert position.
        axis: usize,
    },
    /// Singleton removal at normalised, ascending axes.
    Squeeze {
        /// Source node.
        input: Operand,
        /// Removed positions.
        axes: Vec<usize>,
    },
    /// Reshape to a target that may hold one `-1`.
    Reshape {
        /// Source node.
        input: Operand,
        /// Target dimensions.
        target: Vec<i64>,
    },
    /// NHWC spatial max pooling.
    MaxPool {
        /// Source node.
        input: Operand,
        /// Window extent along height and width.
        window: [usize; 2],
        /// Step along height and width.
        strides: [usize; 2],
        /// Boundary policy.
        padding: Padding,
    },
    /// Rank-2 matrix product.
    MatMul(Operand, Operand),
    /// Bias broadcast over the last axis.
    BiasAdd(Operand, Operand),
    /// Rectifier.
    Relu(Operand),
}

impl Op {
    /// Nodes this operation reads.
    pub fn inputs(&self) -> Vec<Operand> {
        match self {
            Self::Placeholder(_)
            | Self::FlagPlaceholder(_)
            | Self::Variable(_)
            | Self::ConstInts(_)
            | Self::ConstFlag(_) => Vec::new(),
            Self::ExpandDims { input, .. }
            | Self::Squeeze { input, .. }
            | Self::Reshape { input, .. }
            | Self::MaxPool { input, .. }
            | Self::Relu(input) => vec![*input],
            Self::MatMul(a, b) | Self::BiasAdd(a, b) => vec![*a, *b],
        }
    }
}

/// A recorded node together with what is statically known about its output.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// The operation.
    pub op: Op,
    /// Element type of the output.
    pub dtype: DataType,
    /// Output shape; may contain [`UNKNOWN_SIZE`].
    pub shape: Shape,
}

/// An append-only computation graph.
///
/// Nodes only refer to earlier nodes, so index order is a valid
/// evaluation order.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
}

impl Graph {
    /// An empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Looks up a node by handle.
    ///
    /// # Errors
    /// Fails if the handle was not produced by this graph.
    pub fn node(&self, operand: Operand) -> LayerResult<&Node> {
        self.nodes
            .get(operand.0)
            .ok_or_else(|| {
                LayerError::graph(format!("operand #{} is not part of this graph", operand.0))
            })
    }

    /// Names of all registered variables, in registration order.
    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().filter_map(|n| match &n.op {
            Op::Variable(name) => Some(name.as_str()),
            _ => None,
        })
    }

    fn push(&mut self, op: Op, dtype: DataType, shape: Shape) -> Operand {
        let id = self.nodes.len();
        trace!("graph node #{id}: {op:?} -> {shape}");
        self.nodes.push(Node { op, dtype, shape });
        Operand(id)
    }

    fn name_taken(&self, name: &str) -> bool {
        self.nodes.iter().any(|node| match &node.op {
            Op::Placeholder(existing) | Op::FlagPlaceholder(existing) | Op::Variable(existing) => {
                existing == name
            }
            _ => false,
        })
    }

    fn ensure_free(&self, name: &str) -> LayerResult<()> {
        if self.name_taken(name) {
            return Err(LayerError::graph(format!("name `{name}` is already used in this graph")));
        }
        Ok(())
    }

    fn float_node(&self, operand: Operand) -> LayerResult<&Node> {
        let node = self.node(operand)?;
        if node.dtype != DataType::Float {
            return Err(LayerError::graph(format!("operand #{} is not a float tensor", operand.0)));
        }
        Ok(node)
    }

    fn const_ints(&self, operand: Operand) -> LayerResult<&[i32]> {
        match &self.node(operand)?.op {
            Op::ConstInts(values) => Ok(values),
            other => Err(LayerError::graph(format!(
                "operand #{} must be an integer constant, found {other:?}",
                operand.0
            ))),
        }
    }

    fn window_spec(&self, operand: Operand, what: &str) -> LayerResult<[usize; 2]> {
        let values = self.const_ints(operand)?;
        if values.len() != 4 {
            return Err(LayerError::graph(format!(
                "{what} must have 4 entries, got {}",
                values.len()
            )));
        }
        if values[0] != 1 || values[3] != 1 {
            return Err(LayerError::graph(format!(
                "{what} {values:?} must be 1 on the batch and channel axes"
            )));
        }
        if values[1] <= 0 || values[2] <= 0 {
            return Err(LayerError::graph(format!("{what} {values:?} must be positive")));
        }
        Ok([values[1] as usize, values[2] as usize])
    }
}

fn normalize_axis(axis: i64, rank: usize) -> Option<usize> {
    let rank = rank as i64;
    let axis = if axis < 0 { axis + rank } else { axis };
    (0..rank).contains(&axis).then_some(axis as usize)
}

impl GraphBuilder for Graph {
    fn placeholder(&mut self, name: &str, shape: &Shape) -> LayerResult<Operand> {
        self.ensure_free(name)?;
        Ok(self.push(Op::Placeholder(name.to_owned()), DataType::Float, shape.clone()))
    }

    fn placeholder_flag(&mut self, name: &str) -> LayerResult<Operand> {
        self.ensure_free(name)?;
        let scalar = Shape::from_dims(Vec::new());
        Ok(self.push(Op::FlagPlaceholder(name.to_owned()), DataType::Bool, scalar))
    }

    fn constant_ints(&mut self, values: &[i32]) -> Operand {
        let shape = Shape::from_dims(vec![values.len() as i64]);
        self.push(Op::ConstInts(values.to_vec()), DataType::Int, shape)
    }

    fn constant_flag(&mut self, value: bool) -> Operand {
        self.push(Op::ConstFlag(value), DataType::Bool, Shape::from_dims(Vec::new()))
    }

    fn variable(&mut self, name: &str, shape: &Shape) -> LayerResult<Operand> {
        self.ensure_free(name)?;
        if !shape.is_fully_known() {
            return Err(LayerError::graph(format!(
                "variable `{name}` needs a fully known shape, got {shape}"
            )));
        }
        Ok(self.push(Op::Variable(name.to_owned()), DataType::Float, shape.clone()))
    }

    fn expand_dims(&mut self, input: Operand, axis: Operand) -> LayerResult<Operand> {
        let in_shape = self.float_node(input)?.shape.clone();
        let axis_value = match self.const_ints(axis)? {
            [a] => i64::from(*a),
            other => {
                return Err(LayerError::graph(format!(
                    "expand_dims axis must be a single value, got {other:?}"
                )));
            }
        };
        let axis = normalize_axis(axis_value, in_shape.num_dimensions() + 1).ok_or_else(|| {
            LayerError::graph(format!(
                "expand_dims axis {axis_value} is out of range for {in_shape}"
            ))
        })?;

        let mut dims = in_shape.dims().to_vec();
        dims.insert(axis, 1);
        Ok(self.push(Op::ExpandDims { input, axis }, DataType::Float, Shape::from_dims(dims)))
    }

    fn squeeze(&mut self, input: Operand, axes: &[i64]) -> LayerResult<Operand> {
        let in_shape = self.float_node(input)?.shape.clone();
        let rank = in_shape.num_dimensions();

        let mut normalized = Vec::with_capacity(axes.len());
        for &axis in axes {
            let a = normalize_axis(axis, rank).ok_or_else(|| {
                LayerError::graph(format!("squeeze axis {axis} is out of range for {in_shape}"))
            })?;
            let size = in_shape.size(a);
            if size != 1 && size != UNKNOWN_SIZE {
                return Err(LayerError::graph(format!("cannot squeeze axis {axis} of size {size}")));
            }
            normalized.push(a);
        }
        normalized.sort_unstable();
        normalized.dedup();

        let dims: Vec<i64> = in_shape
            .dims()
            .iter()
            .enumerate()
            .filter(|(i, _)| !normalized.contains(i))
            .map(|(_, &d)| d)
            .collect();
        Ok(self.push(
            Op::Squeeze { input, axes: normalized },
            DataType::Float,
            Shape::from_dims(dims),
        ))
    }

    fn reshape(&mut self, input: Operand, shape: Operand) -> LayerResult<Operand> {
        let in_shape = self.float_node(input)?.shape.clone();
        let target: Vec<i64> = self.const_ints(shape)?.iter().map(|&d| i64::from(d)).collect();

        let wildcards = target.iter().filter(|&&d| d == UNKNOWN_SIZE).count();
        if wildcards > 1 || target.iter().any(|&d| d < UNKNOWN_SIZE) {
            return Err(LayerError::graph(format!("invalid reshape target {target:?}")));
        }

        let known_target = num_elements_in_shape(&target);
        let mut out = target.clone();
        if in_shape.is_fully_known() {
            let total = num_elements_in_shape(in_shape.dims());
            if wildcards == 1 {
                if known_target == 0 || total % known_target != 0 {
                    return Err(LayerError::graph(format!(
                        "cannot reshape {in_shape} into {target:?}"
                    )));
                }
                for d in &mut out {
                    if *d == UNKNOWN_SIZE {
                        *d = (total / known_target) as i64;
                    }
                }
            } else if total != known_target {
                return Err(LayerError::graph(format!("cannot reshape {in_shape} into {target:?}")));
            }
        }

        Ok(self.push(Op::Reshape { input, target }, DataType::Float, Shape::from_dims(out)))
    }

    fn max_pool(
        &mut self,
        input: Operand,
        ksize: Operand,
        strides: Operand,
        padding: Padding,
    ) -> LayerResult<Operand> {
        let in_shape = self.float_node(input)?.shape.clone();
        if in_shape.num_dimensions() != 4 {
            return Err(LayerError::graph(format!(
                "max_pool expects an NHWC tensor, got {in_shape}"
            )));
        }
        let window = self.window_spec(ksize, "ksize")?;
        let steps = self.window_spec(strides, "strides")?;

        let [kh, kw] = window.map(|k| k as i64);
        let [sh, sw] = steps.map(|s| s as i64);
        let h = conv_output_length(in_shape.size(1), kh, padding, sh, 1)?;
        let w = conv_output_length(in_shape.size(2), kw, padding, sw, 1)?;
        let out = Shape::from_dims(vec![in_shape.size(0), h, w, in_shape.size(3)]);

        Ok(self.push(
            Op::MaxPool {
                input,
                window,
                strides: steps,
                padding,
            },
            DataType::Float,
            out,
        ))
    }

    fn mat_mul(&mut self, a: Operand, b: Operand) -> LayerResult<Operand> {
        let a_shape = self.float_node(a)?.shape.clone();
        let b_shape = self.float_node(b)?.shape.clone();
        if a_shape.num_dimensions() != 2 || b_shape.num_dimensions() != 2 {
            return Err(LayerError::graph(format!(
                "mat_mul expects rank-2 operands, got {a_shape} and {b_shape}"
            )));
        }
        let (k_a, k_b) = (a_shape.size(1), b_shape.size(0));
        if k_a >= 0 && k_b >= 0 && k_a != k_b {
            return Err(LayerError::graph(format!(
                "mat_mul inner dimensions differ: {a_shape} x {b_shape}"
            )));
        }
        let out = Shape::from_dims(vec![a_shape.size(0), b_shape.size(1)]);
        Ok(self.push(Op::MatMul(a, b), DataType::Float, out))
    }

    fn bias_add(&mut self, value: Operand, bias: Operand) -> LayerResult<Operand> {
        let v_shape = self.float_node(value)?.shape.clone();
        let b_shape = self.float_node(bias)?.shape.clone();
        let last = v_shape.dims().last().copied();
        if b_shape.num_dimensions() != 1 || last.is_none() {
            return Err(LayerError::graph(format!(
                "bias_add cannot broadcast {b_shape} over {v_shape}"
            )));
        }
        if let Some(last) = last.filter(|&d| d >= 0) {
            if b_shape.size(0) != last {
                return Err(LayerError::graph(format!(
                    "bias_add cannot broadcast {b_shape} over {v_shape}"
                )));
            }
        }
        Ok(self.push(Op::BiasAdd(value, bias), DataType::Float, v_shape))
    }

    fn relu(&mut self, input: Operand) -> LayerResult<Operand> {
        let shape = self.float_node(input)?.shape.clone();
        Ok(self.push(Op::Relu(input), DataType::Float, shape))
    }

    fn static_shape(&self, operand: Operand) -> LayerResult<Shape> {
        Ok(self.node(operand)?.shape.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_then_squeeze_restores_shape() {
        let mut g = Graph::new();
        let x = g.placeholder("x", &Shape::unknown_batch(&[10, 3])).unwrap();
        let axis = const_array(&mut g, &[2]);
        let e = g.expand_dims(x, axis).unwrap();
        assert_eq!(g.static_shape(e).unwrap().dims(), &[-1, 10, 1, 3]);
        let s = g.squeeze(e, &[2]).unwrap();
        assert_eq!(g.static_shape(s).unwrap(), Shape::unknown_batch(&[10, 3]));
    }

    #[test]
    fn squeeze_rejects_non_singleton() {
        let mut g = Graph::new();
        let x = g.placeholder("x", &Shape::unknown_batch(&[10, 3])).unwrap();
        assert!(matches!(g.squeeze(x, &[1]), Err(LayerError::Graph(_))));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut g = Graph::new();
        g.placeholder("x", &Shape::unknown_batch(&[2])).unwrap();
        assert!(g.placeholder_flag("x").is_err());
        assert!(g.variable("x", &Shape::from_dims(vec![2])).is_err());
    }

    #[test]
    fn reshape_fills_wildcard() {
        let mut g = Graph::new();
        let x = g.placeholder("x", &Shape::from_dims(vec![2, 3, 4])).unwrap();
        let target = shape_operand(&mut g, &Shape::unknown_batch(&[12]));
        let r = g.reshape(x, target).unwrap();
        assert_eq!(g.static_shape(r).unwrap().dims(), &[2, 12]);
    }

    #[test]
    fn max_pool_needs_constant_window() {
        let mut g = Graph::new();
        let x = g.placeholder("x", &Shape::unknown_batch(&[8, 1, 2])).unwrap();
        let k = const_array(&mut g, &[1, 2, 1, 1]);
        let bad = const_array(&mut g, &[2, 2, 1, 1]);
        assert!(g.max_pool(x, k, bad, Padding::Valid).is_err());
        assert!(g.max_pool(x, x, k, Padding::Valid).is_err());
        let y = g.max_pool(x, k, k, Padding::Same).unwrap();
        assert_eq!(g.static_shape(y).unwrap().dims(), &[-1, 4, 1, 2]);
    }

    #[test]
    fn foreign_operand_is_rejected() {
        let g = Graph::new();
        assert!(g.static_shape(Operand(3)).is_err());
    }
}
