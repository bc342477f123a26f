//! Configuration structures for the bridge.

use serde::{Deserialize, Serialize};

use podbridge_engine::EngineOptions;

/// Main configuration for a [`Bridge`](crate::Bridge).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Options passed to the engine when models are opened and loaded.
    pub engine: EngineOptions,

    /// Tensor allocator configuration.
    pub allocator: AllocatorConfig,

    /// Handle registry configuration.
    pub registry: RegistryConfig,
}

/// Tensor allocator configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorConfig {
    /// Largest tensor, in bytes, the bridge will allocate through any
    /// allocator handle (0 = unlimited).
    pub max_tensor_bytes: usize,
}

/// Handle registry configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Maximum live handles per kind (0 = unlimited).
    pub max_live_handles: usize,
}

impl BridgeConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &std::path::Path) -> Result<(), std::io::Error> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        std::fs::write(path, content)
    }
}
