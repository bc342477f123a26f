//! Handle-based bridge between a native inference engine and a managed host.
//!
//! The host never sees native objects directly. It holds opaque 64-bit
//! [`Handle`]s and calls the [`Bridge`] facade with them:
//! - `codec`: host text to native bytes and back, failing on invalid UTF-8
//! - `types`: engine element types to host `TensorType` constants
//! - `handles`: generation-checked handle tables
//! - `buffer`: zero-copy views of tensor storage
//! - `exception`: per-thread pending failure and call translation
//! - `bridge`: the invocation facade

pub mod buffer;
mod bridge;
pub mod codec;
mod config;
mod error;
pub mod exception;
pub mod handles;
pub mod types;

pub use bridge::{Bridge, HandleCounts, PreparedInputs};
pub use buffer::DirectBufferView;
pub use config::{AllocatorConfig, BridgeConfig, RegistryConfig};
pub use error::{BridgeError, ErrorKind, Result};
pub use handles::{Handle, HandleKind};
pub use types::HostTensorType;

pub use podbridge_engine as engine;
