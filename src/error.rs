//! Error taxonomy shared by every layer, the graph builder and model IO.
//!
//! All failures here are configuration or programming errors. They are
//! detected eagerly and handed back to the immediate caller; nothing is
//! retried.

use thiserror::Error;

/// Every failure the crate can report.
#[derive(Debug, Error)]
pub enum LayerError {
    /// A constructor argument is malformed (wrong array length, non-positive window, ...).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// An input shape does not have the rank or extents a layer expects.
    #[error("shape error: {0}")]
    Shape(String),

    /// Externally supplied weights do not match what the layer declares.
    #[error("mismatched weights for layer `{layer}`: {reason}")]
    MismatchedWeights {
        /// Name of the rejecting layer.
        layer: String,
        /// What did not match.
        reason: String,
    },

    /// The graph builder or the reference session rejected an operation.
    #[error("graph error: {0}")]
    Graph(String),

    /// A weights file failed validation while loading.
    #[error("corrupt weights file: {0}")]
    CorruptWeights(String),

    /// Underlying file I/O failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LayerError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub(crate) fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }

    pub(crate) fn graph(msg: impl Into<String>) -> Self {
        Self::Graph(msg.into())
    }

    pub(crate) fn mismatched(layer: &str, reason: impl Into<String>) -> Self {
        Self::MismatchedWeights {
            layer: layer.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Result alias used throughout the crate.
pub type LayerResult<T> = Result<T, LayerError>;
