//! Test backends and on-disk model packages.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use podbridge_core::engine::{
    register_backend, BackendContext, EngineError, InferenceBackend, Tensor,
};
use tempfile::TempDir;

pub const IDENTITY: &str = "test-identity";
pub const DOUBLING: &str = "test-doubling";
pub const FAILING: &str = "test-failing";

/// Maps the i-th declared input to the i-th declared output.
struct PairwiseBackend {
    pairs: Vec<(String, String)>,
    double: bool,
}

impl InferenceBackend for PairwiseBackend {
    fn run(
        &self,
        inputs: &[(&str, &Tensor)],
        _requested: &[String],
    ) -> podbridge_core::engine::Result<Vec<(String, Tensor)>> {
        let mut outputs = Vec::new();
        for (input, output) in &self.pairs {
            let Some((_, tensor)) = inputs.iter().find(|(n, _)| *n == input.as_str()) else {
                continue;
            };
            let tensor = match (self.double, tensor.as_slice::<f32>()) {
                (true, Some(values)) => {
                    Tensor::from_vec(tensor.shape(), values.iter().map(|v| v * 2.0).collect())?
                }
                _ => (*tensor).clone(),
            };
            outputs.push((output.clone(), tensor));
        }
        Ok(outputs)
    }
}

struct FailingBackend;

impl InferenceBackend for FailingBackend {
    fn run(
        &self,
        _: &[(&str, &Tensor)],
        _: &[String],
    ) -> podbridge_core::engine::Result<Vec<(String, Tensor)>> {
        Err(EngineError::InferenceFailed("backend refused to run".into()))
    }
}

fn pairs(ctx: &BackendContext<'_>) -> Vec<(String, String)> {
    ctx.config
        .input_spec
        .iter()
        .zip(&ctx.config.output_spec)
        .map(|(i, o)| (i.name.clone(), o.name.clone()))
        .collect()
}

/// Register the test backends. Safe to call from every test.
pub fn register_test_backends() {
    register_backend(
        IDENTITY,
        Arc::new(|ctx: &BackendContext<'_>| {
            Ok(Box::new(PairwiseBackend {
                pairs: pairs(ctx),
                double: false,
            }) as Box<dyn InferenceBackend>)
        }),
    )
    .unwrap();
    register_backend(
        DOUBLING,
        Arc::new(|ctx: &BackendContext<'_>| {
            Ok(Box::new(PairwiseBackend {
                pairs: pairs(ctx),
                double: true,
            }) as Box<dyn InferenceBackend>)
        }),
    )
    .unwrap();
    register_backend(
        FAILING,
        Arc::new(|_: &BackendContext<'_>| Ok(Box::new(FailingBackend) as Box<dyn InferenceBackend>)),
    )
    .unwrap();
}

/// A model package directory containing only `config.json`.
pub struct Package {
    dir: TempDir,
}

impl Package {
    pub fn new(name: &str, platform: &str, input_spec: &str, output_spec: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = format!(
            r#"{{"name": "{name}", "platform": "{platform}",
                "input_spec": {input_spec}, "output_spec": {output_spec}}}"#
        );
        std::fs::write(dir.path().join("config.json"), config).unwrap();
        Self { dir }
    }

    /// `x: float32[3] -> y: float32[3]`.
    pub fn xy(name: &str, platform: &str) -> Self {
        Self::new(
            name,
            platform,
            r#"[{"name": "x", "dtype": "float32", "shape": [3]}]"#,
            r#"[{"name": "y", "dtype": "float32", "shape": [3]}]"#,
        )
    }

    pub fn path(&self) -> &str {
        self.dir.path().to_str().unwrap()
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }
}

pub fn floats(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}
