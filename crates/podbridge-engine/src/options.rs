//! Engine tuning options.

use serde::{Deserialize, Serialize};

/// Options passed to backends when a model is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Number of intra-op threads for backends that support it.
    pub intra_threads: usize,

    /// Graph optimization level, 0 (none) to 3 (all).
    pub optimization_level: u8,

    /// Register the XNNPACK execution provider when available.
    pub use_xnnpack: bool,

    /// Load weights when the model handle is created instead of on `load`.
    pub load_model_at_construction: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            intra_threads: 4,
            optimization_level: 3,
            use_xnnpack: true,
            load_model_at_construction: false,
        }
    }
}
