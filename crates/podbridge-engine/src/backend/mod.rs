//! Inference backend implementations and the platform registry.

#[cfg(feature = "native")]
pub mod ort;

#[cfg(feature = "wasm")]
pub mod tract;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use lazy_static::lazy_static;
use tracing::debug;

use crate::error::EngineError;
use crate::{EngineOptions, ModelConfig, ModelPackage, Result, Tensor};

/// Trait for inference backends.
///
/// A backend is created once per loaded model and may be called from
/// several threads at the same time.
pub trait InferenceBackend: Send + Sync {
    /// Run inference with the given inputs.
    ///
    /// # Arguments
    /// * `inputs` - Named input tensors, already validated against the input spec
    /// * `requested_outputs` - Output names to produce; never empty
    ///
    /// # Returns
    /// Named output tensors. Backends may return more than was requested.
    fn run(
        &self,
        inputs: &[(&str, &Tensor)],
        requested_outputs: &[String],
    ) -> Result<Vec<(String, Tensor)>>;
}

/// Everything a backend factory gets to build a backend.
pub struct BackendContext<'a> {
    pub package: &'a ModelPackage,
    pub config: &'a ModelConfig,
    pub options: &'a EngineOptions,
}

/// Builds a backend for one model.
pub type BackendFactory =
    Arc<dyn Fn(&BackendContext<'_>) -> Result<Box<dyn InferenceBackend>> + Send + Sync>;

lazy_static! {
    static ref FACTORIES: RwLock<HashMap<String, BackendFactory>> = RwLock::new(builtin_factories());
}

#[allow(unused_mut)]
fn builtin_factories() -> HashMap<String, BackendFactory> {
    let mut factories: HashMap<String, BackendFactory> = HashMap::new();

    #[cfg(feature = "native")]
    factories.insert(
        "onnx".to_string(),
        Arc::new(|ctx: &BackendContext<'_>| {
            let backend = ort::OrtBackend::from_package(ctx)?;
            Ok(Box::new(backend) as Box<dyn InferenceBackend>)
        }),
    );

    #[cfg(all(feature = "wasm", not(feature = "native")))]
    factories.insert(
        "onnx".to_string(),
        Arc::new(|ctx: &BackendContext<'_>| {
            let backend = tract::TractBackend::from_package(ctx)?;
            Ok(Box::new(backend) as Box<dyn InferenceBackend>)
        }),
    );

    factories
}

/// Register (or replace) the backend factory for a platform.
pub fn register_backend(platform: &str, factory: BackendFactory) -> Result<()> {
    let mut factories = FACTORIES
        .write()
        .map_err(|e| EngineError::ModelLoad(format!("backend registry poisoned: {e}")))?;
    debug!(platform, "registering backend");
    factories.insert(platform.to_string(), factory);
    Ok(())
}

/// Platforms with a registered backend, sorted.
pub fn registered_platforms() -> Vec<String> {
    let mut platforms: Vec<String> = FACTORIES
        .read()
        .map(|f| f.keys().cloned().collect())
        .unwrap_or_default();
    platforms.sort();
    platforms
}

/// Instantiate the backend for a model's platform.
pub(crate) fn create_backend(ctx: &BackendContext<'_>) -> Result<Box<dyn InferenceBackend>> {
    let factory = FACTORIES
        .read()
        .map_err(|e| EngineError::ModelLoad(format!("backend registry poisoned: {e}")))?
        .get(&ctx.config.platform)
        .cloned()
        .ok_or_else(|| EngineError::UnsupportedPlatform(ctx.config.platform.clone()))?;
    factory(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl InferenceBackend for Noop {
        fn run(&self, _: &[(&str, &Tensor)], _: &[String]) -> Result<Vec<(String, Tensor)>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_register_backend() {
        register_backend(
            "noop-registry-test",
            Arc::new(|_: &BackendContext<'_>| Ok(Box::new(Noop) as Box<dyn InferenceBackend>)),
        )
        .unwrap();
        assert!(registered_platforms().contains(&"noop-registry-test".to_string()));
    }

    #[cfg(feature = "native")]
    #[test]
    fn test_onnx_builtin() {
        assert!(registered_platforms().contains(&"onnx".to_string()));
    }
}
