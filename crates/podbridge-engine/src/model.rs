//! Loaded models.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::backend::{create_backend, BackendContext, InferenceBackend};
use crate::error::EngineError;
use crate::spec::{check_tensor, validate_inputs, TensorSpec};
use crate::{AllocatorKind, EngineOptions, ModelConfig, ModelPackage, Result, Tensor, TensorAllocator};

/// A model package opened from a path.
///
/// Opening reads metadata only; [`Model::load`] instantiates the backend.
/// `infer` may be called concurrently once the model is loaded: callers
/// share a read lock on the backend, while `load` takes the write lock.
pub struct Model {
    package: ModelPackage,
    config: ModelConfig,
    options: EngineOptions,
    allocator: Arc<TensorAllocator>,
    backend: RwLock<Option<Box<dyn InferenceBackend>>>,
}

impl Model {
    /// Open the package at `path`.
    ///
    /// Without an explicit allocator, the model gets its own allocator
    /// bound to its platform.
    pub fn open(
        path: &str,
        allocator: Option<Arc<TensorAllocator>>,
        options: &EngineOptions,
    ) -> Result<Self> {
        let package = ModelPackage::open(path)?;
        let config = package.config()?;
        info!(
            path,
            name = %config.name,
            platform = %config.platform,
            "opened model package"
        );

        let allocator = allocator.unwrap_or_else(|| {
            Arc::new(TensorAllocator::new(
                AllocatorKind::Model {
                    platform: config.platform.clone(),
                },
                0,
            ))
        });

        let model = Self {
            package,
            config,
            options: options.clone(),
            allocator,
            backend: RwLock::new(None),
        };

        if model.options.load_model_at_construction {
            model.load()?;
        }
        Ok(model)
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn platform(&self) -> &str {
        &self.config.platform
    }

    pub fn inputs(&self) -> &[TensorSpec] {
        &self.config.input_spec
    }

    pub fn outputs(&self) -> &[TensorSpec] {
        &self.config.output_spec
    }

    /// The allocator bound to this model.
    pub fn allocator(&self) -> Arc<TensorAllocator> {
        Arc::clone(&self.allocator)
    }

    pub fn is_loaded(&self) -> bool {
        self.backend.read().map(|b| b.is_some()).unwrap_or(false)
    }

    /// Instantiate the backend. Loading twice is an error.
    pub fn load(&self) -> Result<()> {
        let mut slot = self
            .backend
            .write()
            .map_err(|e| EngineError::ModelLoad(format!("backend lock poisoned: {e}")))?;
        if slot.is_some() {
            return Err(EngineError::AlreadyLoaded(self.config.name.clone()));
        }

        let ctx = BackendContext {
            package: &self.package,
            config: &self.config,
            options: &self.options,
        };
        *slot = Some(create_backend(&ctx)?);
        info!(name = %self.config.name, platform = %self.config.platform, "model loaded");
        Ok(())
    }

    /// Run inference.
    ///
    /// An empty `requested` list means every declared output. Only the
    /// requested outputs are returned, in request order.
    pub fn infer(&self, inputs: &[(&str, &Tensor)], requested: &[String]) -> Result<Vec<(String, Tensor)>> {
        validate_inputs(&self.config.input_spec, inputs)?;

        let requested: Vec<String> = if requested.is_empty() {
            self.config.output_spec.iter().map(|s| s.name.clone()).collect()
        } else {
            let mut seen = HashSet::new();
            for name in requested {
                if !self.config.output_spec.iter().any(|s| &s.name == name) {
                    return Err(EngineError::UnknownOutput(name.clone()));
                }
                if !seen.insert(name.as_str()) {
                    return Err(EngineError::DuplicateOutput(name.clone()));
                }
            }
            requested.to_vec()
        };

        let guard = self
            .backend
            .read()
            .map_err(|e| EngineError::InferenceFailed(format!("backend lock poisoned: {e}")))?;
        let backend = guard
            .as_ref()
            .ok_or_else(|| EngineError::NotLoaded(self.config.name.clone()))?;

        debug!(name = %self.config.name, inputs = inputs.len(), outputs = ?requested, "running inference");
        let mut produced: HashMap<String, Tensor> = backend.run(inputs, &requested)?.into_iter().collect();
        drop(guard);

        let mut symbols = HashMap::new();
        let mut results = Vec::with_capacity(requested.len());
        for name in requested {
            let tensor = produced.remove(&name).ok_or_else(|| {
                EngineError::InferenceFailed(format!("backend did not produce output {name:?}"))
            })?;
            if let Some(spec) = self.config.output_spec.iter().find(|s| s.name == name) {
                check_tensor(spec, &tensor, &mut symbols).map_err(|e| {
                    EngineError::InferenceFailed(format!("output does not match its spec: {e}"))
                })?;
            }
            results.push((name, tensor));
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::register_backend;
    use crate::package::{register_package, CONFIG_FILE};

    /// Copies each input to the output at the same position.
    struct Passthrough {
        pairs: Vec<(String, String)>,
    }

    impl InferenceBackend for Passthrough {
        fn run(&self, inputs: &[(&str, &Tensor)], _: &[String]) -> Result<Vec<(String, Tensor)>> {
            Ok(self
                .pairs
                .iter()
                .filter_map(|(input, output)| {
                    inputs
                        .iter()
                        .find(|(n, _)| *n == input.as_str())
                        .map(|(_, t)| (output.clone(), (*t).clone()))
                })
                .collect())
        }
    }

    fn setup(path: &str, output_dtype: &str) {
        register_backend(
            "model-tests-passthrough",
            Arc::new(|ctx: &BackendContext<'_>| {
                let pairs = ctx
                    .config
                    .input_spec
                    .iter()
                    .zip(&ctx.config.output_spec)
                    .map(|(i, o)| (i.name.clone(), o.name.clone()))
                    .collect();
                Ok(Box::new(Passthrough { pairs }) as Box<dyn InferenceBackend>)
            }),
        )
        .unwrap();

        let config = format!(
            r#"{{"name": "passthrough", "platform": "model-tests-passthrough",
                "input_spec": [{{"name": "x", "dtype": "float32", "shape": [3]}}],
                "output_spec": [{{"name": "y", "dtype": "{output_dtype}", "shape": [3]}}]}}"#
        );
        let mut files = HashMap::new();
        files.insert(CONFIG_FILE.to_string(), config.into_bytes());
        register_package(path, files).unwrap();
    }

    fn x() -> Tensor {
        Tensor::from_vec(&[3], vec![1.0f32, 2.0, 3.0]).unwrap()
    }

    #[test]
    fn test_infer_requires_load() {
        setup("mem://model-tests/requires-load", "float32");
        let model = Model::open("mem://model-tests/requires-load", None, &EngineOptions::default()).unwrap();
        assert!(!model.is_loaded());
        assert!(matches!(
            model.infer(&[("x", &x())], &[]),
            Err(EngineError::NotLoaded(_))
        ));

        model.load().unwrap();
        assert!(matches!(model.load(), Err(EngineError::AlreadyLoaded(_))));
        let out = model.infer(&[("x", &x())], &[]).unwrap();
        assert_eq!(out, vec![("y".to_string(), x())]);
    }

    #[test]
    fn test_infer_unknown_output() {
        setup("mem://model-tests/unknown-output", "float32");
        let model = Model::open("mem://model-tests/unknown-output", None, &EngineOptions::default()).unwrap();
        model.load().unwrap();
        assert!(matches!(
            model.infer(&[("x", &x())], &["z".to_string()]),
            Err(EngineError::UnknownOutput(n)) if n == "z"
        ));
    }

    #[test]
    fn test_infer_duplicate_output() {
        setup("mem://model-tests/duplicate-output", "float32");
        let model = Model::open("mem://model-tests/duplicate-output", None, &EngineOptions::default()).unwrap();
        model.load().unwrap();
        assert!(matches!(
            model.infer(&[("x", &x())], &["y".to_string(), "y".to_string()]),
            Err(EngineError::DuplicateOutput(n)) if n == "y"
        ));
    }

    #[test]
    fn test_infer_checks_output_dtype() {
        setup("mem://model-tests/bad-output", "int32");
        let options = EngineOptions {
            load_model_at_construction: true,
            ..EngineOptions::default()
        };
        let model = Model::open("mem://model-tests/bad-output", None, &options).unwrap();
        assert!(model.is_loaded());
        assert!(matches!(
            model.infer(&[("x", &x())], &[]),
            Err(EngineError::InferenceFailed(_))
        ));
    }

    #[test]
    fn test_model_allocator_is_bound_to_platform() {
        setup("mem://model-tests/allocator", "float32");
        let model = Model::open("mem://model-tests/allocator", None, &EngineOptions::default()).unwrap();
        assert_eq!(
            model.allocator().kind(),
            &AllocatorKind::Model {
                platform: "model-tests-passthrough".into()
            }
        );

        let shared = TensorAllocator::generic();
        let model = Model::open("mem://model-tests/allocator", Some(shared.clone()), &EngineOptions::default()).unwrap();
        assert!(Arc::ptr_eq(&model.allocator(), &shared));
    }
}
