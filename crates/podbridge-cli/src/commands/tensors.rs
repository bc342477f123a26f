//! JSON representation of tensors for the command line.
//!
//! A tensor is `{"dtype": "float32", "shape": [2, 2], "data": [...]}` with
//! `data` flattened in row-major order. `float16` data is given as raw
//! IEEE 754 bit patterns.

use std::collections::BTreeMap;

use anyhow::{anyhow, bail, Context};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use podbridge_core::engine::ElementType;
use podbridge_core::{types, Bridge, Handle};

use super::bridge_error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonTensor {
    pub dtype: ElementType,
    pub shape: Vec<i64>,
    pub data: Vec<Value>,
}

macro_rules! encode_as {
    ($values:expr, $t:ty, $read:ident) => {{
        let mut bytes = Vec::with_capacity($values.len() * std::mem::size_of::<$t>());
        for (i, value) in $values.iter().enumerate() {
            let v = value
                .$read()
                .and_then(|v| <$t>::try_from(v).ok())
                .ok_or_else(|| anyhow!("element {i} ({value}) is not a valid {}", stringify!($t)))?;
            bytes.extend_from_slice(&v.to_ne_bytes());
        }
        bytes
    }};
}

/// Flatten JSON numbers into native-endian bytes of `dtype`.
fn encode_numbers(dtype: ElementType, values: &[Value]) -> anyhow::Result<Vec<u8>> {
    Ok(match dtype {
        ElementType::Double => encode_as!(values, f64, as_f64),
        ElementType::Float => {
            let mut bytes = Vec::with_capacity(values.len() * 4);
            for (i, value) in values.iter().enumerate() {
                let v = value
                    .as_f64()
                    .ok_or_else(|| anyhow!("element {i} ({value}) is not a number"))?;
                bytes.extend_from_slice(&(v as f32).to_ne_bytes());
            }
            bytes
        }
        ElementType::Half | ElementType::Uint16 => encode_as!(values, u16, as_u64),
        ElementType::Int8 => encode_as!(values, i8, as_i64),
        ElementType::Int16 => encode_as!(values, i16, as_i64),
        ElementType::Int32 => encode_as!(values, i32, as_i64),
        ElementType::Int64 => encode_as!(values, i64, as_i64),
        ElementType::Uint8 => encode_as!(values, u8, as_u64),
        ElementType::Uint32 => encode_as!(values, u32, as_u64),
        ElementType::Uint64 => encode_as!(values, u64, as_u64),
        other => bail!("{other} tensors cannot be built from numbers"),
    })
}

/// Allocate a tensor handle for a JSON tensor.
pub fn allocate(bridge: &Bridge, allocator: Handle, name: &str, tensor: &JsonTensor) -> anyhow::Result<Handle> {
    let handle = if tensor.dtype == ElementType::String {
        let strings = tensor
            .data
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| anyhow!("input {name:?}: string tensors take string data"))?;
        bridge.create_string_tensor(allocator, &strings, &tensor.shape)
    } else {
        let bytes = encode_numbers(tensor.dtype, &tensor.data).with_context(|| format!("input {name:?}"))?;
        let host = types::host_type_of(tensor.dtype).map_err(bridge_error)?;
        bridge.allocate_tensor(allocator, &tensor.shape, host, &bytes)
    };
    handle.map_err(bridge_error).with_context(|| format!("input {name:?}"))
}

fn to_values<T: Serialize>(values: Option<&[T]>) -> anyhow::Result<Vec<Value>> {
    let values = values.ok_or_else(|| anyhow!("tensor storage does not match its element type"))?;
    values
        .iter()
        .map(|v| serde_json::to_value(v).map_err(Into::into))
        .collect()
}

/// Read a tensor handle back into JSON.
pub fn read(bridge: &Bridge, tensor: Handle) -> anyhow::Result<JsonTensor> {
    let host = bridge.tensor_type(tensor).map_err(bridge_error)?;
    let dtype = types::element_type_of(host).map_err(bridge_error)?;
    let shape = bridge.tensor_shape(tensor).map_err(bridge_error)?;

    let data = if dtype == ElementType::String {
        bridge
            .tensor_strings(tensor)
            .map_err(bridge_error)?
            .into_iter()
            .map(Value::String)
            .collect()
    } else {
        bridge
            .with_tensor_buffer(tensor, |view| match dtype {
                ElementType::Double => to_values(view.as_slice::<f64>()),
                ElementType::Float => to_values(view.as_slice::<f32>()),
                ElementType::Half => to_values(view.as_f16_bits()),
                ElementType::Int8 => to_values(view.as_slice::<i8>()),
                ElementType::Int16 => to_values(view.as_slice::<i16>()),
                ElementType::Int32 => to_values(view.as_slice::<i32>()),
                ElementType::Int64 => to_values(view.as_slice::<i64>()),
                ElementType::Uint8 => to_values(view.as_slice::<u8>()),
                ElementType::Uint16 => to_values(view.as_slice::<u16>()),
                ElementType::Uint32 => to_values(view.as_slice::<u32>()),
                ElementType::Uint64 => to_values(view.as_slice::<u64>()),
                other => Err(anyhow!("{other} tensors have no numeric data")),
            })
            .map_err(bridge_error)??
    };

    Ok(JsonTensor { dtype, shape, data })
}

/// Parse an inputs file: a JSON object mapping input names to tensors.
pub fn parse_inputs(text: &str) -> anyhow::Result<BTreeMap<String, JsonTensor>> {
    serde_json::from_str(text).context("inputs must be a JSON object of {dtype, shape, data} tensors")
}

#[cfg(test)]
mod tests {
    use super::*;
    use podbridge_core::BridgeConfig;
    use serde_json::json;

    fn bridge() -> Bridge {
        Bridge::new(BridgeConfig::default()).unwrap()
    }

    #[test]
    fn test_numeric_round_trip() {
        let bridge = bridge();
        let allocator = bridge.get_generic_allocator().unwrap();
        for (dtype, data) in [
            (ElementType::Float, json!([1.5, -2.0, 0.25])),
            (ElementType::Int64, json!([1, -2, 3])),
            (ElementType::Uint8, json!([0, 128, 255])),
            (ElementType::Half, json!([15360, 0, 48128])),
        ] {
            let tensor = JsonTensor {
                dtype,
                shape: vec![3],
                data: serde_json::from_value(data).unwrap(),
            };
            let handle = allocate(&bridge, allocator, "x", &tensor).unwrap();
            assert_eq!(read(&bridge, handle).unwrap(), tensor);
        }
    }

    #[test]
    fn test_string_round_trip() {
        let bridge = bridge();
        let allocator = bridge.get_generic_allocator().unwrap();
        let tensor: JsonTensor =
            serde_json::from_value(json!({"dtype": "string", "shape": [2], "data": ["a", "żółw"]})).unwrap();
        let handle = allocate(&bridge, allocator, "s", &tensor).unwrap();
        assert_eq!(read(&bridge, handle).unwrap(), tensor);
    }

    #[test]
    fn test_out_of_range_value() {
        let bridge = bridge();
        let allocator = bridge.get_generic_allocator().unwrap();
        let tensor = JsonTensor {
            dtype: ElementType::Uint8,
            shape: vec![1],
            data: vec![json!(256)],
        };
        let err = allocate(&bridge, allocator, "x", &tensor).unwrap_err();
        assert!(format!("{err:#}").contains("not a valid u8"));
    }

    #[test]
    fn test_parse_inputs() {
        let inputs = parse_inputs(r#"{"x": {"dtype": "float32", "shape": [3], "data": [1, 2, 3]}}"#).unwrap();
        assert_eq!(inputs["x"].dtype, ElementType::Float);
        assert!(parse_inputs("[1, 2]").is_err());
    }
}
