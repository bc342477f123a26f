//! Error types for the engine layer.

use thiserror::Error;

use crate::ElementType;

/// Errors raised by the wrapped inference engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The model package could not be found or read.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// `config.json` is missing required fields or is malformed.
    #[error("invalid model config: {0}")]
    Config(String),

    /// No backend is registered for the model's platform.
    #[error("no backend registered for platform {0:?}")]
    UnsupportedPlatform(String),

    /// `load` was called on a model whose backend is already running.
    #[error("model {0:?} is already loaded")]
    AlreadyLoaded(String),

    /// `infer` was called before `load`.
    #[error("model {0:?} was not loaded before inference")]
    NotLoaded(String),

    /// An input name is not part of the model's input spec.
    #[error("unknown input {0:?}")]
    UnknownInput(String),

    /// A requested output name is not part of the model's output spec.
    #[error("unknown output {0:?}")]
    UnknownOutput(String),

    /// The same input name was supplied twice.
    #[error("duplicate input {0:?}")]
    DuplicateInput(String),

    /// The same output name was requested twice.
    #[error("duplicate output {0:?}")]
    DuplicateOutput(String),

    /// Declared and supplied element types differ.
    #[error("tensor {name:?} has type {actual}, expected {expected}")]
    TypeMismatch {
        name: String,
        expected: ElementType,
        actual: ElementType,
    },

    /// Declared and supplied shapes are incompatible.
    #[error("tensor {name:?} has incompatible shape: {reason}")]
    ShapeMismatch { name: String, reason: String },

    /// Tensor data could not be allocated or does not fit the requested shape.
    #[error("allocation failed: {0}")]
    Allocation(String),

    /// Invalid input tensor.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Inference execution failed.
    #[error("inference failed: {0}")]
    InferenceFailed(String),

    /// Output tensor extraction failed.
    #[error("failed to extract output: {0}")]
    OutputExtraction(String),

    /// I/O error when loading package files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error when parsing `config.json`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Create a shape mismatch error.
    pub fn shape(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
