//! Inference engine API wrapped by podbridge.
//!
//! This crate is the native side of the bridge. It provides:
//! - typed tensor storage and element types
//! - model packages (`config.json` + backend artifacts, on disk or in memory)
//! - tensor specs with wildcard and symbolic dimensions, and input validation
//! - tensor allocators
//! - a pluggable backend registry, with ONNX backends:
//!   - `ort` with XNNPACK execution provider for native platforms
//!   - `tract` for WASM/browser environments

mod allocator;
pub mod backend;
mod element;
mod error;
mod model;
mod options;
pub mod package;
pub mod spec;
mod tensor;

pub use allocator::{AllocatorKind, TensorAllocator};
pub use backend::{register_backend, registered_platforms, BackendContext, BackendFactory, InferenceBackend};
pub use element::ElementType;
pub use error::EngineError;
pub use model::Model;
pub use options::EngineOptions;
pub use package::{register_package, unregister_package, ModelConfig, ModelPackage};
pub use spec::{Dim, TensorSpec};
pub use tensor::{element_count, Tensor, TensorElement};

#[cfg(feature = "native")]
pub use backend::ort::OrtBackend;

#[cfg(feature = "wasm")]
pub use backend::tract::TractBackend;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
