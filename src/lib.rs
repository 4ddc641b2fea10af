//! briny_layers: Keras-style layers over a symbolic tensor-graph runtime.
//!
//! Layers here do not compute. Each one knows how its output shape follows
//! from its input shape, what parameters it owns, and which graph nodes
//! implement it; a runtime behind the [`graph::GraphBuilder`] capability
//! does the numerics afterwards.
//!
//! # Modules
//!
//! - [`shape`] — Shape descriptors, array conversions and sliding-window arithmetic.
//! - [`graph`] — Operand handles, the builder capability, a recording graph and a CPU session.
//! - [`layers`] — The [`layers::Layer`] contract plus `MaxPool1D`, `Dense` and `Flatten`.
//! - [`model`] — `Sequential` assembly, execution and weight management.
//! - [`modelio`] — Saving and loading named weights.
//! - [`tensors`] — Dense arrays for weights and runtime values.
//! - [`error`] — The shared error type.
//!
//! # Example
//!
//! ```rust
//! use briny_layers::layers::{Layer, MaxPool1D};
//! use briny_layers::shape::{Padding, Shape};
//!
//! let pool = MaxPool1D::new("pool", &[1, 2, 1], &[1, 2, 1], Padding::Valid).unwrap();
//! let out = pool.compute_output_shape(&Shape::unknown_batch(&[10, 3])).unwrap();
//! assert_eq!(out, Shape::unknown_batch(&[5, 3]));
//! ```

#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss,
    clippy::similar_names,
    clippy::module_name_repetitions
)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod graph;
pub mod layers;
pub mod model;
pub mod modelio;
pub mod shape;
pub mod tensors;

pub use error::{LayerError, LayerResult};
pub use graph::{Graph, GraphBuilder, Operand};
pub use layers::{Layer, Weights};
pub use model::Sequential;
pub use shape::{Padding, Shape};
pub use tensors::Tensor;
