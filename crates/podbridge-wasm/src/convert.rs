//! Conversions between bridge values and JS values.

use serde::{Deserialize, Serialize};
use wasm_bindgen::JsValue;

use podbridge_core::engine::TensorSpec;
use podbridge_core::{types, BridgeError, Handle};

/// Build the exception thrown to JS: an `Error` named after the error kind.
pub(crate) fn js_error(err: BridgeError) -> JsValue {
    let error = js_sys::Error::new(&err.to_string());
    error.set_name(err.kind().host_name());
    error.into()
}

fn argument_error(what: &str, err: impl std::fmt::Display) -> JsValue {
    js_error(BridgeError::native(format!("invalid {what}: {err}")))
}

pub(crate) fn handle(raw: i64) -> Handle {
    Handle::from(raw)
}

pub(crate) fn raw(handle: Handle) -> i64 {
    handle.into()
}

/// Parse `[[name, handle], ...]`. Handles may be `BigInt`s or integral numbers.
pub(crate) fn named_handles(value: JsValue) -> Result<Vec<(String, Handle)>, JsValue> {
    let pairs: Vec<(String, i64)> =
        serde_wasm_bindgen::from_value(value).map_err(|e| argument_error("inputs", e))?;
    Ok(pairs.into_iter().map(|(name, h)| (name, handle(h))).collect())
}

/// Parse an optional list of output names; `null` and `undefined` mean none.
pub(crate) fn output_names(value: JsValue) -> Result<Option<Vec<String>>, JsValue> {
    serde_wasm_bindgen::from_value(value).map_err(|e| argument_error("requested outputs", e))
}

pub(crate) fn dims(value: JsValue) -> Result<Vec<i64>, JsValue> {
    serde_wasm_bindgen::from_value(value).map_err(|e| argument_error("dims", e))
}

pub(crate) fn strings(value: JsValue) -> Result<Vec<String>, JsValue> {
    serde_wasm_bindgen::from_value(value).map_err(|e| argument_error("string data", e))
}

/// A tensor spec as a plain JS object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct HostSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub tensor_type: i32,
    pub type_name: String,
    pub dims: Vec<HostDim>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct HostDim {
    pub value: i64,
    pub symbol: Option<String>,
}

impl HostSpec {
    pub(crate) fn from_spec(spec: &TensorSpec) -> Result<Self, BridgeError> {
        let host = types::host_type_of(spec.dtype)?;
        Ok(Self {
            name: spec.name.clone(),
            tensor_type: host.value(),
            type_name: host.field_name().to_string(),
            dims: spec
                .shape
                .iter()
                .map(|d| HostDim {
                    value: d.value(),
                    symbol: d.symbol().map(str::to_string),
                })
                .collect(),
        })
    }
}

pub(crate) fn specs_to_js(specs: &[TensorSpec]) -> Result<JsValue, JsValue> {
    let specs = specs
        .iter()
        .map(HostSpec::from_spec)
        .collect::<Result<Vec<_>, _>>()
        .map_err(js_error)?;
    serde_wasm_bindgen::to_value(&specs).map_err(|e| js_error(BridgeError::native(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use podbridge_core::engine::{Dim, ElementType};
    use wasm_bindgen_test::*;

    #[wasm_bindgen_test]
    fn test_error_name_is_kind() {
        let value = js_error(BridgeError::name("no output z"));
        let error: js_sys::Error = value.into();
        assert_eq!(error.name(), "NameError");
        assert_eq!(error.message(), "name error: no output z");
    }

    #[wasm_bindgen_test]
    fn test_spec_conversion() {
        let spec = TensorSpec::new(
            "x",
            ElementType::Int64,
            vec![Dim::Symbol("batch".into()), Dim::Any, Dim::Fixed(3)],
        );
        let host = HostSpec::from_spec(&spec).unwrap();
        assert_eq!(host.tensor_type, 7);
        assert_eq!(host.type_name, "INT64_TENSOR");
        let values: Vec<i64> = host.dims.iter().map(|d| d.value).collect();
        assert_eq!(values, vec![-1, -1, 3]);
        assert_eq!(host.dims[0].symbol.as_deref(), Some("batch"));
    }

    #[wasm_bindgen_test]
    fn test_named_handles() {
        let pairs = js_sys::Array::new();
        let pair = js_sys::Array::new();
        pair.push(&JsValue::from_str("x"));
        pair.push(&JsValue::from(42i64));
        pairs.push(&pair);
        let parsed = named_handles(pairs.into()).unwrap();
        assert_eq!(parsed, vec![("x".to_string(), Handle::from_raw(42))]);
    }

    #[wasm_bindgen_test]
    fn test_missing_outputs_mean_all() {
        assert_eq!(output_names(JsValue::UNDEFINED).unwrap(), None);
        assert_eq!(output_names(JsValue::NULL).unwrap(), None);
    }
}
