//! ONNX Runtime (ort) backend for native platforms with XNNPACK.

use std::sync::Mutex;

use half::f16;
use ort::ep::XNNPACK;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor as OrtTensor;
use tracing::debug;

use crate::backend::{BackendContext, InferenceBackend};
use crate::error::EngineError;
use crate::{EngineOptions, Result, Tensor};

/// File name of the ONNX graph inside the package data directory.
pub const MODEL_FILE: &str = "model.onnx";

/// Backend using ONNX Runtime for native inference.
pub struct OrtBackend {
    session: Mutex<Session>,
}

macro_rules! ort_input {
    ($arr:expr) => {{
        let arr = $arr;
        let shape: Vec<i64> = arr.shape().iter().map(|&s| s as i64).collect();
        let data: Vec<_> = arr.iter().cloned().collect();
        OrtTensor::from_array((shape, data))
            .map(Into::into)
            .map_err(|e| EngineError::InvalidInput(e.to_string()))
    }};
}

macro_rules! try_ort_output {
    ($value:expr, $ty:ty) => {
        if let Ok((shape_ref, data)) = $value.try_extract_tensor::<$ty>() {
            let shape: Vec<usize> = shape_ref.iter().map(|&s| s as usize).collect();
            return Tensor::from_vec::<$ty>(&shape, data.to_vec())
                .map_err(|e| EngineError::OutputExtraction(e.to_string()));
        }
    };
}

impl OrtBackend {
    /// Load the package's `0/data/model.onnx`.
    pub fn from_package(ctx: &BackendContext<'_>) -> Result<Self> {
        let bytes = ctx.package.read_data(MODEL_FILE)?;
        Self::from_bytes(&bytes, ctx.options)
    }

    /// Load a model from bytes.
    pub fn from_bytes(bytes: &[u8], options: &EngineOptions) -> Result<Self> {
        debug!("Loading ONNX model from {} bytes", bytes.len());

        let mut builder =
            Session::builder().map_err(|e| EngineError::ModelLoad(e.to_string()))?;
        if options.use_xnnpack {
            builder = builder
                .with_execution_providers([XNNPACK::default().build()])
                .map_err(|e| EngineError::ModelLoad(e.to_string()))?;
        }
        let session = builder
            .with_optimization_level(optimization_level(options.optimization_level))
            .map_err(|e| EngineError::ModelLoad(e.to_string()))?
            .with_intra_threads(options.intra_threads)
            .map_err(|e| EngineError::ModelLoad(e.to_string()))?
            .commit_from_memory(bytes)
            .map_err(|e| EngineError::ModelLoad(e.to_string()))?;

        let input_names: Vec<String> = session
            .inputs()
            .iter()
            .map(|i| i.name().to_string())
            .collect();

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        debug!("Model inputs: {:?}", input_names);
        debug!("Model outputs: {:?}", output_names);

        Ok(Self {
            session: Mutex::new(session),
        })
    }

    fn convert_input(&self, tensor: &Tensor) -> Result<ort::session::SessionInputValue<'static>> {
        match tensor {
            Tensor::Float(arr) => ort_input!(arr),
            Tensor::Double(arr) => ort_input!(arr),
            Tensor::Int8(arr) => ort_input!(arr),
            Tensor::Int16(arr) => ort_input!(arr),
            Tensor::Int32(arr) => ort_input!(arr),
            Tensor::Int64(arr) => ort_input!(arr),
            Tensor::Uint8(arr) => ort_input!(arr),
            Tensor::Uint16(arr) => ort_input!(arr),
            Tensor::Uint32(arr) => ort_input!(arr),
            Tensor::Uint64(arr) => ort_input!(arr),
            Tensor::Half(bits) => ort_input!(bits.mapv(f16::from_bits)),
            Tensor::String(_) => Err(EngineError::InvalidInput(
                "string tensors are not supported by the onnx backend".into(),
            )),
        }
    }
}

fn optimization_level(level: u8) -> GraphOptimizationLevel {
    match level {
        0 => GraphOptimizationLevel::Disable,
        1 => GraphOptimizationLevel::Level1,
        2 => GraphOptimizationLevel::Level2,
        _ => GraphOptimizationLevel::Level3,
    }
}

fn extract_output(name: &str, value: &ort::value::DynValue) -> Result<Tensor> {
    try_ort_output!(value, f32);
    try_ort_output!(value, i64);
    try_ort_output!(value, i32);
    try_ort_output!(value, f64);
    try_ort_output!(value, u8);
    try_ort_output!(value, i8);
    try_ort_output!(value, i16);
    try_ort_output!(value, u16);
    try_ort_output!(value, u32);
    try_ort_output!(value, u64);
    if let Ok((shape_ref, data)) = value.try_extract_tensor::<f16>() {
        let shape: Vec<usize> = shape_ref.iter().map(|&s| s as usize).collect();
        let bits = data.iter().map(|v| v.to_bits()).collect();
        return Tensor::from_f16_bits(&shape, bits)
            .map_err(|e| EngineError::OutputExtraction(e.to_string()));
    }
    Err(EngineError::OutputExtraction(format!(
        "unsupported output type for '{}'",
        name
    )))
}

impl InferenceBackend for OrtBackend {
    fn run(
        &self,
        inputs: &[(&str, &Tensor)],
        requested_outputs: &[String],
    ) -> Result<Vec<(String, Tensor)>> {
        let ort_inputs: Vec<(&str, ort::session::SessionInputValue<'static>)> = inputs
            .iter()
            .map(|(name, tensor)| {
                let value = self.convert_input(tensor)?;
                Ok((*name, value))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut session = self.session.lock().map_err(|e| {
            EngineError::InferenceFailed(format!("Failed to lock session: {}", e))
        })?;

        let outputs = session
            .run(ort_inputs)
            .map_err(|e| EngineError::InferenceFailed(e.to_string()))?;

        let mut results = Vec::with_capacity(requested_outputs.len());
        for (name, value) in outputs.iter() {
            if !requested_outputs.iter().any(|r| r == name) {
                continue;
            }
            results.push((name.to_string(), extract_output(name, &value)?));
        }

        Ok(results)
    }
}
