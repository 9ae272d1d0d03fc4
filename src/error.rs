//! Error taxonomy shared by every evaluation component.

use thiserror::Error;

/// Errors that can occur while normalizing, scoring, or reporting
#[derive(Error, Debug)]
pub enum EvalError {
    /// Input cardinality or atom type is not supported
    #[error("Shape error: {0}")]
    Shape(String),

    /// A metric or evaluator was constructed with invalid settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An external scoring, embedding, or judge backend failed
    #[error("Backend error: {0}")]
    Backend(String),

    /// An object could not be registered as a metric
    #[error("Invalid metric registration: {0}")]
    Registration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EvalError {
    pub(crate) fn shape(msg: impl Into<String>) -> Self {
        Self::Shape(msg.into())
    }

    pub(crate) fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub(crate) fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// True for errors caused by malformed input shapes
    #[must_use]
    pub const fn is_shape(&self) -> bool {
        matches!(self, Self::Shape(_))
    }
}

/// Result alias used across the crate
pub type Result<T, E = EvalError> = std::result::Result<T, E>;
