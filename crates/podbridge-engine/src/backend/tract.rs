//! Tract backend for cross-platform ONNX inference.

use std::io::Cursor;

use half::f16;
use tract_onnx::prelude::*;
use tracing::debug;

use crate::backend::{BackendContext, InferenceBackend};
use crate::error::EngineError;
use crate::spec::{Dim, TensorSpec};
use crate::{ElementType, Result, Tensor};

/// File name of the ONNX graph inside the package data directory.
pub const MODEL_FILE: &str = "model.onnx";

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Backend using Tract for cross-platform ONNX inference.
pub struct TractBackend {
    model: Plan,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

macro_rules! tract_input {
    ($arr:expr) => {{
        let arr = $arr;
        let shape: TVec<usize> = arr.shape().iter().cloned().collect();
        let data: Vec<_> = arr.iter().cloned().collect();
        tract_ndarray::ArrayD::from_shape_vec(tract_ndarray::IxDyn(shape.as_slice()), data)
            .map(|a| a.into_tvalue())
            .map_err(|e| EngineError::InvalidInput(e.to_string()))
    }};
}

macro_rules! try_tract_output {
    ($output:expr, $ty:ty) => {
        if let Ok(arr) = $output.to_array_view::<$ty>() {
            let shape: Vec<usize> = arr.shape().to_vec();
            let data: Vec<$ty> = arr.iter().cloned().collect();
            return Tensor::from_vec::<$ty>(&shape, data)
                .map_err(|e| EngineError::OutputExtraction(e.to_string()));
        }
    };
}

fn datum_type(dtype: ElementType) -> Result<DatumType> {
    Ok(match dtype {
        ElementType::Double => DatumType::F64,
        ElementType::Float => DatumType::F32,
        ElementType::Half => DatumType::F16,
        ElementType::Int8 => DatumType::I8,
        ElementType::Int16 => DatumType::I16,
        ElementType::Int32 => DatumType::I32,
        ElementType::Int64 => DatumType::I64,
        ElementType::Uint8 => DatumType::U8,
        ElementType::Uint16 => DatumType::U16,
        ElementType::Uint32 => DatumType::U32,
        ElementType::Uint64 => DatumType::U64,
        ElementType::String => {
            return Err(EngineError::ModelLoad(
                "string inputs are not supported by the tract backend".into(),
            ));
        }
    })
}

/// Input fact from a declared spec. Fully fixed shapes are pinned so the
/// graph can be optimized; anything else keeps only the datum type.
fn input_fact(spec: &TensorSpec) -> Result<InferenceFact> {
    let dt = datum_type(spec.dtype)?;
    let fixed: Option<Vec<usize>> = spec
        .shape
        .iter()
        .map(|d| match d {
            Dim::Fixed(n) => usize::try_from(*n).ok(),
            Dim::Any | Dim::Symbol(_) => None,
        })
        .collect();
    Ok(match fixed {
        Some(shape) => InferenceFact::dt_shape(dt, shape.as_slice()),
        None => InferenceFact::dt(dt),
    })
}

impl TractBackend {
    /// Load the package's `0/data/model.onnx`, pinning input facts from the declared input shapes.
    pub fn from_package(ctx: &BackendContext<'_>) -> Result<Self> {
        let bytes = ctx.package.read_data(MODEL_FILE)?;
        Self::from_bytes(&bytes, &ctx.config.input_spec)
    }

    /// Load a model from bytes.
    pub fn from_bytes(bytes: &[u8], inputs: &[TensorSpec]) -> Result<Self> {
        debug!("Loading ONNX model with Tract from {} bytes", bytes.len());

        let mut model = tract_onnx::onnx()
            .model_for_read(&mut Cursor::new(bytes))
            .map_err(|e| EngineError::ModelLoad(format!("Failed to load model: {}", e)))?;

        let input_names: Vec<String> = model
            .input_outlets()
            .map_err(|e| EngineError::ModelLoad(e.to_string()))?
            .iter()
            .map(|o| model.node(o.node).name.clone())
            .collect();

        for (idx, name) in input_names.iter().enumerate() {
            if let Some(spec) = inputs.iter().find(|s| &s.name == name) {
                model
                    .set_input_fact(idx, input_fact(spec)?)
                    .map_err(|e| {
                        EngineError::ModelLoad(format!("Failed to set input fact: {}", e))
                    })?;
            }
        }

        let model = model
            .into_typed()
            .map_err(|e| EngineError::ModelLoad(format!("Failed to type model: {}", e)))?
            .into_optimized()
            .map_err(|e| EngineError::ModelLoad(format!("Failed to optimize: {}", e)))?;

        let output_names: Vec<String> = model
            .output_outlets()
            .map_err(|e| EngineError::ModelLoad(e.to_string()))?
            .iter()
            .map(|o| {
                model
                    .outlet_label(*o)
                    .map(str::to_string)
                    .unwrap_or_else(|| model.node(o.node).name.clone())
            })
            .collect();

        let model = model
            .into_runnable()
            .map_err(|e| EngineError::ModelLoad(e.to_string()))?;

        debug!("Model inputs: {:?}", input_names);
        debug!("Model outputs: {:?}", output_names);

        Ok(Self {
            model,
            input_names,
            output_names,
        })
    }
}

fn to_tvalue(tensor: &Tensor) -> Result<TValue> {
    match tensor {
        Tensor::Float(arr) => tract_input!(arr),
        Tensor::Double(arr) => tract_input!(arr),
        Tensor::Int8(arr) => tract_input!(arr),
        Tensor::Int16(arr) => tract_input!(arr),
        Tensor::Int32(arr) => tract_input!(arr),
        Tensor::Int64(arr) => tract_input!(arr),
        Tensor::Uint8(arr) => tract_input!(arr),
        Tensor::Uint16(arr) => tract_input!(arr),
        Tensor::Uint32(arr) => tract_input!(arr),
        Tensor::Uint64(arr) => tract_input!(arr),
        Tensor::Half(bits) => tract_input!(bits.mapv(f16::from_bits)),
        Tensor::String(_) => Err(EngineError::InvalidInput(
            "string tensors are not supported by the tract backend".into(),
        )),
    }
}

fn extract_output(name: &str, output: &TValue) -> Result<Tensor> {
    try_tract_output!(output, f32);
    try_tract_output!(output, i64);
    try_tract_output!(output, i32);
    try_tract_output!(output, f64);
    try_tract_output!(output, u8);
    try_tract_output!(output, i8);
    try_tract_output!(output, i16);
    try_tract_output!(output, u16);
    try_tract_output!(output, u32);
    try_tract_output!(output, u64);
    if let Ok(arr) = output.to_array_view::<f16>() {
        let bits = arr.iter().map(|v| v.to_bits()).collect();
        return Tensor::from_f16_bits(arr.shape(), bits)
            .map_err(|e| EngineError::OutputExtraction(e.to_string()));
    }
    Err(EngineError::OutputExtraction(format!(
        "unsupported output type for '{}'",
        name
    )))
}

impl InferenceBackend for TractBackend {
    fn run(
        &self,
        inputs: &[(&str, &Tensor)],
        requested_outputs: &[String],
    ) -> Result<Vec<(String, Tensor)>> {
        // Tract takes inputs positionally, in graph order.
        let tract_inputs: TVec<TValue> = self
            .input_names
            .iter()
            .map(|name| {
                let (_, tensor) = inputs.iter().find(|(n, _)| *n == name.as_str()).ok_or_else(|| {
                    EngineError::InvalidInput(format!("tract backend requires input {name:?}"))
                })?;
                to_tvalue(tensor)
            })
            .collect::<Result<TVec<_>>>()?;

        let outputs = self
            .model
            .run(tract_inputs)
            .map_err(|e| EngineError::InferenceFailed(e.to_string()))?;

        let mut results = Vec::with_capacity(requested_outputs.len());
        for (name, output) in self.output_names.iter().zip(outputs.iter()) {
            if requested_outputs.contains(name) {
                results.push((name.clone(), extract_output(name, output)?));
            }
        }

        Ok(results)
    }
}
