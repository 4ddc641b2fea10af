//! Reference CPU execution of a recorded [`Graph`].
//!
//! # CPU Session
//!
//! Evaluates only the nodes a requested operand depends on, in index order.
//! Kernels cover exactly the operations the bundled layers emit.
//!
//! ## Features
//!
//! - Parallel execution using [`rayon`](https://docs.rs/rayon)
//! - `VALID`/`SAME` pooling with the usual split of padding: the smaller half
//!   goes before the data, padded cells never win the maximum
//!
//! ## Design Goals
//!
//! - Deterministic results
//! - No state carried between runs beyond fed values and assigned variables

use std::collections::HashMap;

use log::trace;
use rayon::prelude::*;

use super::{Graph, Op, Operand};
use crate::error::{LayerError, LayerResult};
use crate::shape::{Padding, Shape};
use crate::tensors::Tensor;

// Integer constants are folded into op attributes when the graph is recorded,
// and no bundled kernel branches on a flag, so only floats carry a payload.
#[derive(Debug, Clone)]
enum Value {
    Float(Tensor<f32>),
    Ints,
    Flag,
}

/// Holds the inputs for one or more runs of a graph.
#[derive(Debug)]
pub struct Session<'g> {
    graph: &'g Graph,
    feeds: HashMap<String, Tensor<f32>>,
    flags: HashMap<String, bool>,
    variables: HashMap<String, Tensor<f32>>,
}

impl<'g> Session<'g> {
    /// A session with nothing fed yet.
    pub fn new(graph: &'g Graph) -> Self {
        Self {
            graph,
            feeds: HashMap::new(),
            flags: HashMap::new(),
            variables: HashMap::new(),
        }
    }

    /// Supplies the value of a float placeholder.
    pub fn feed(&mut self, name: &str, value: Tensor<f32>) -> &mut Self {
        self.feeds.insert(name.to_owned(), value);
        self
    }

    /// Supplies the value of a boolean placeholder.
    pub fn feed_flag(&mut self, name: &str, value: bool) -> &mut Self {
        self.flags.insert(name.to_owned(), value);
        self
    }

    /// Sets the current value of a variable.
    pub fn assign(&mut self, name: &str, value: Tensor<f32>) -> &mut Self {
        self.variables.insert(name.to_owned(), value);
        self
    }

    /// Evaluates `target` and returns its float value.
    ///
    /// # Errors
    /// Fails if a required placeholder or variable has no value, if a fed value
    /// does not match its declared shape, or if `target` is not a float node.
    pub fn run(&self, target: Operand) -> LayerResult<Tensor<f32>> {
        let graph = self.graph;
        graph.node(target)?;

        let mut needed = vec![false; target.index() + 1];
        needed[target.index()] = true;
        for i in (0..=target.index()).rev() {
            if needed[i] {
                for input in graph.nodes[i].op.inputs() {
                    needed[input.index()] = true;
                }
            }
        }

        let mut values: Vec<Option<Value>> = vec![None; target.index() + 1];
        for i in 0..=target.index() {
            if needed[i] {
                trace!("session evaluating node #{i}");
                let value = self.eval(i, &values)?;
                values[i] = Some(value);
            }
        }

        match values[target.index()].take() {
            Some(Value::Float(t)) => Ok(t),
            _ => Err(LayerError::graph(format!(
                "operand #{} is not a float tensor",
                target.index()
            ))),
        }
    }

    fn eval(&self, index: usize, values: &[Option<Value>]) -> LayerResult<Value> {
        let node = &self.graph.nodes[index];
        let value = match &node.op {
            Op::Placeholder(name) => {
                let fed = self.feeds.get(name).ok_or_else(|| {
                    LayerError::graph(format!("no value fed for placeholder `{name}`"))
                })?;
                check_compatible(name, &node.shape, fed)?;
                Value::Float(fed.clone())
            }
            Op::FlagPlaceholder(name) => {
                if !self.flags.contains_key(name) {
                    return Err(LayerError::graph(format!("no value fed for flag `{name}`")));
                }
                Value::Flag
            }
            Op::Variable(name) => {
                let v = self.variables.get(name).ok_or_else(|| {
                    LayerError::graph(format!("variable `{name}` was never assigned"))
                })?;
                check_compatible(name, &node.shape, v)?;
                Value::Float(v.clone())
            }
            Op::ConstInts(_) => Value::Ints,
            Op::ConstFlag(_) => Value::Flag,
            Op::ExpandDims { input, axis } => {
                let x = float(values, *input)?;
                let mut shape = x.shape.clone();
                shape.insert(*axis, 1);
                Value::Float(Tensor::new(shape, x.data.clone()))
            }
            Op::Squeeze { input, axes } => {
                let x = float(values, *input)?;
                if let Some(&bad) = axes.iter().find(|&&a| x.shape[a] != 1) {
                    return Err(LayerError::graph(format!(
                        "cannot squeeze axis {bad} of runtime shape {:?}",
                        x.shape
                    )));
                }
                let shape: Vec<usize> = x
                    .shape
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !axes.contains(i))
                    .map(|(_, &d)| d)
                    .collect();
                Value::Float(Tensor::new(shape, x.data.clone()))
            }
            Op::Reshape { input, target } => {
                let x = float(values, *input)?;
                Value::Float(reshape(x, target)?)
            }
            Op::MaxPool {
                input,
                window,
                strides,
                padding,
            } => {
                let x = float(values, *input)?;
                Value::Float(max_pool_nhwc(x, *window, *strides, *padding)?)
            }
            Op::MatMul(a, b) => {
                Value::Float(matmul(float(values, *a)?, float(values, *b)?)?)
            }
            Op::BiasAdd(v, b) => {
                Value::Float(bias_add(float(values, *v)?, float(values, *b)?)?)
            }
            Op::Relu(input) => {
                let x = float(values, *input)?;
                Value::Float(Tensor::new(
                    x.shape.clone(),
                    x.data.par_iter().map(|&v| v.max(0.0)).collect(),
                ))
            }
        };
        Ok(value)
    }
}

fn float(values: &[Option<Value>], operand: Operand) -> LayerResult<&Tensor<f32>> {
    match values.get(operand.index()) {
        Some(Some(Value::Float(t))) => Ok(t),
        Some(Some(Value::Ints | Value::Flag)) => Err(LayerError::graph(format!(
            "operand #{} is not a float tensor",
            operand.index()
        ))),
        _ => Err(LayerError::graph(format!(
            "operand #{} was not evaluated",
            operand.index()
        ))),
    }
}

fn check_compatible(name: &str, declared: &Shape, actual: &Tensor<f32>) -> LayerResult<()> {
    let fits = declared.num_dimensions() == actual.rank()
        && declared
            .dims()
            .iter()
            .zip(&actual.shape)
            .all(|(&d, &a)| d < 0 || d as usize == a);
    if fits {
        Ok(())
    } else {
        Err(LayerError::shape(format!(
            "value for `{name}` has shape {:?}, declared {declared}",
            actual.shape
        )))
    }
}

fn reshape(x: &Tensor<f32>, target: &[i64]) -> LayerResult<Tensor<f32>> {
    let known: usize = target.iter().filter(|&&d| d >= 0).map(|&d| d as usize).product();
    let shape: Vec<usize> = if target.iter().any(|&d| d < 0) {
        if known == 0 || x.len() % known != 0 {
            return Err(LayerError::graph(format!(
                "cannot reshape {:?} into {target:?}",
                x.shape
            )));
        }
        target
            .iter()
            .map(|&d| if d < 0 { x.len() / known } else { d as usize })
            .collect()
    } else {
        target.iter().map(|&d| d as usize).collect()
    };
    Tensor::try_new(shape, x.data.clone())
}

/// Start and end (exclusive) of each window along one axis.
///
/// # Errors
/// [`LayerError::InvalidConfiguration`] if a `VALID` window does not fit in
/// the input, which the static shape check cannot catch for unknown lengths.
fn window_bounds(
    input: usize,
    window: usize,
    stride: usize,
    padding: Padding,
) -> LayerResult<Vec<(usize, usize)>> {
    let (out, pad_before) = match padding {
        Padding::Valid => {
            if input < window {
                return Err(LayerError::config(format!(
                    "VALID pooling window {window} exceeds input length {input}"
                )));
            }
            ((input - window) / stride + 1, 0)
        }
        Padding::Same => {
            let out = input.div_ceil(stride);
            let total = ((out.saturating_sub(1)) * stride + window).saturating_sub(input);
            (out, total / 2)
        }
    };
    Ok((0..out)
        .map(|o| {
            let start = (o * stride) as isize - pad_before as isize;
            let end = (start + window as isize).min(input as isize);
            (start.max(0) as usize, end.max(0) as usize)
        })
        .collect())
}

/// Max pooling over the H and W axes of an NHWC tensor.
///
/// Parallel over batch items.
fn max_pool_nhwc(
    x: &Tensor<f32>,
    window: [usize; 2],
    strides: [usize; 2],
    padding: Padding,
) -> LayerResult<Tensor<f32>> {
    let (n, h, w, c) = (x.shape[0], x.shape[1], x.shape[2], x.shape[3]);
    let rows = window_bounds(h, window[0], strides[0], padding)?;
    let cols = window_bounds(w, window[1], strides[1], padding)?;
    let (out_h, out_w) = (rows.len(), cols.len());

    let mut out = vec![f32::NEG_INFINITY; n * out_h * out_w * c];
    if !out.is_empty() {
        out.par_chunks_mut(out_h * out_w * c)
            .enumerate()
            .for_each(|(b, chunk)| {
                let base = b * h * w * c;
                for (oh, &(r0, r1)) in rows.iter().enumerate() {
                    for (ow, &(c0, c1)) in cols.iter().enumerate() {
                        let dst = &mut chunk[(oh * out_w + ow) * c..(oh * out_w + ow + 1) * c];
                        for ih in r0..r1 {
                            for iw in c0..c1 {
                                let at = base + (ih * w + iw) * c;
                                let src = &x.data[at..at + c];
                                for (d, &s) in dst.iter_mut().zip(src) {
                                    *d = d.max(s);
                                }
                            }
                        }
                    }
                }
            });
    }

    Ok(Tensor::new(vec![n, out_h, out_w, c], out))
}

/// `C = A × B` for `A: m×k`, `B: k×n`, parallel over rows of `C`.
fn matmul(a: &Tensor<f32>, b: &Tensor<f32>) -> LayerResult<Tensor<f32>> {
    let (m, k) = (a.shape[0], a.shape[1]);
    let n = b.shape[1];
    if k != b.shape[0] {
        return Err(LayerError::graph(format!(
            "matmul shape mismatch: {:?} x {:?}",
            a.shape, b.shape
        )));
    }

    let mut out = vec![0.0; m * n];
    if n > 0 {
        out.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
            for (j, cell) in row.iter_mut().enumerate() {
                let mut sum = 0.0;
                for l in 0..k {
                    sum += a.data[i * k + l] * b.data[l * n + j];
                }
                *cell = sum;
            }
        });
    }
    Ok(Tensor::new(vec![m, n], out))
}

fn bias_add(x: &Tensor<f32>, bias: &Tensor<f32>) -> LayerResult<Tensor<f32>> {
    let last = x.shape.last().copied().unwrap_or(0);
    if bias.len() != last {
        return Err(LayerError::graph(format!(
            "bias of length {} does not match last axis of {:?}",
            bias.len(),
            x.shape
        )));
    }

    let mut out = x.data.clone();
    if last > 0 {
        out.par_chunks_mut(last).for_each(|row| {
            for (v, b) in row.iter_mut().zip(&bias.data) {
                *v += b;
            }
        });
    }
    Ok(Tensor::new(x.shape.clone(), out))
}
