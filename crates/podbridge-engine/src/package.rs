//! Model packages: `config.json` metadata plus backend artifacts.
//!
//! A package is addressed by a path. Packages registered in memory take
//! precedence over the filesystem, which is how hosts without a filesystem
//! (wasm) supply models.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EngineError;
use crate::spec::{ensure_unique_names, TensorSpec};
use crate::Result;

/// Name of the metadata file at the package root.
pub const CONFIG_FILE: &str = "config.json";

/// Directory holding backend artifacts, relative to the package root.
pub const DATA_DIR: &str = "0/data";

lazy_static! {
    static ref MEMORY_PACKAGES: RwLock<HashMap<String, Arc<HashMap<String, Vec<u8>>>>> =
        RwLock::new(HashMap::new());
}

/// Register an in-memory package under `path`, replacing any previous one.
///
/// `files` maps package-relative paths (`config.json`, `0/data/model.onnx`)
/// to their contents.
pub fn register_package(path: &str, files: HashMap<String, Vec<u8>>) -> Result<()> {
    let mut packages = MEMORY_PACKAGES
        .write()
        .map_err(|e| EngineError::ModelLoad(format!("package registry poisoned: {e}")))?;
    debug!(path, files = files.len(), "registering in-memory package");
    packages.insert(path.to_string(), Arc::new(files));
    Ok(())
}

/// Remove an in-memory package. Returns whether one was registered.
pub fn unregister_package(path: &str) -> Result<bool> {
    let mut packages = MEMORY_PACKAGES
        .write()
        .map_err(|e| EngineError::ModelLoad(format!("package registry poisoned: {e}")))?;
    Ok(packages.remove(path).is_some())
}

/// Metadata stored in a package's `config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    pub platform: String,
    pub input_spec: Vec<TensorSpec>,
    pub output_spec: Vec<TensorSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform_version_semver: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_ops: Vec<String>,

    /// Preferred device per input name.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub input_tensor_device: HashMap<String, String>,
}

impl ModelConfig {
    /// Parse and check a `config.json` document.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let config: ModelConfig = serde_json::from_slice(bytes)?;
        if config.name.is_empty() {
            return Err(EngineError::Config("model name is empty".into()));
        }
        if config.platform.is_empty() {
            return Err(EngineError::Config("platform is empty".into()));
        }
        ensure_unique_names("input", &config.input_spec)?;
        ensure_unique_names("output", &config.output_spec)?;
        Ok(config)
    }
}

#[derive(Debug, Clone)]
enum Source {
    Directory(PathBuf),
    Memory(Arc<HashMap<String, Vec<u8>>>),
}

/// A resolved model package.
#[derive(Debug, Clone)]
pub struct ModelPackage {
    path: String,
    source: Source,
}

impl ModelPackage {
    /// Resolve a package path, preferring in-memory registrations.
    pub fn open(path: &str) -> Result<Self> {
        let registered = MEMORY_PACKAGES
            .read()
            .map_err(|e| EngineError::ModelLoad(format!("package registry poisoned: {e}")))?
            .get(path)
            .cloned();

        let source = match registered {
            Some(files) => Source::Memory(files),
            None => {
                let dir = Path::new(path);
                if !dir.is_dir() {
                    return Err(EngineError::ModelLoad(format!(
                        "no model package at {path:?}"
                    )));
                }
                Source::Directory(dir.to_path_buf())
            }
        };

        Ok(Self {
            path: path.to_string(),
            source,
        })
    }

    /// The path this package was opened from.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Read a file relative to the package root.
    pub fn read(&self, relative: &str) -> Result<Vec<u8>> {
        match &self.source {
            Source::Directory(dir) => std::fs::read(dir.join(relative)).map_err(|e| {
                EngineError::ModelLoad(format!("failed to read {relative:?} from {:?}: {e}", self.path))
            }),
            Source::Memory(files) => files.get(relative).cloned().ok_or_else(|| {
                EngineError::ModelLoad(format!("package {:?} has no file {relative:?}", self.path))
            }),
        }
    }

    /// Read a backend artifact from the package's data directory.
    pub fn read_data(&self, file: &str) -> Result<Vec<u8>> {
        self.read(&format!("{DATA_DIR}/{file}"))
    }

    /// Read and parse `config.json`.
    pub fn config(&self) -> Result<ModelConfig> {
        let bytes = self.read(CONFIG_FILE)?;
        ModelConfig::from_json(&bytes)
    }
}
