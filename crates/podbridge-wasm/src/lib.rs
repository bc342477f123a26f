//! WASM host bindings for podbridge.
//!
//! This crate exposes the bridge to JavaScript in browsers and Node.js. The
//! host-side classes are `Neuropod`, `NeuropodTensorAllocator` and
//! `NeuropodTensor`; their static `native*` methods take and return 64-bit
//! handles as `BigInt`s. Failures are thrown as `Error`s whose `name` is the
//! error kind (`LoadError`, `NameError`, ...).

use std::collections::HashMap;

use js_sys::{Object, Uint8Array};
use wasm_bindgen::prelude::*;

use podbridge_core::{engine, types, BridgeError, HostTensorType};

mod convert;
mod neuropod;
mod tensor;

pub use neuropod::Neuropod;
pub use tensor::{NeuropodTensor, NeuropodTensorAllocator};

use convert::js_error;

/// Initialize the panic hook and check the host type table.
#[wasm_bindgen(start)]
pub fn init() -> Result<(), JsValue> {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();

    types::verify_type_table().map_err(js_error)
}

/// Version information.
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Tensor element types, matching the `TensorType` constants of the host API.
#[wasm_bindgen]
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorType {
    DOUBLE_TENSOR = 0,
    FLOAT_TENSOR = 1,
    HALF_TENSOR = 2,
    STRING_TENSOR = 3,
    INT8_TENSOR = 4,
    INT16_TENSOR = 5,
    INT32_TENSOR = 6,
    INT64_TENSOR = 7,
    UINT8_TENSOR = 8,
    UINT16_TENSOR = 9,
    UINT32_TENSOR = 10,
    UINT64_TENSOR = 11,
}

impl From<HostTensorType> for TensorType {
    fn from(t: HostTensorType) -> Self {
        match t {
            HostTensorType::DoubleTensor => TensorType::DOUBLE_TENSOR,
            HostTensorType::FloatTensor => TensorType::FLOAT_TENSOR,
            HostTensorType::HalfTensor => TensorType::HALF_TENSOR,
            HostTensorType::StringTensor => TensorType::STRING_TENSOR,
            HostTensorType::Int8Tensor => TensorType::INT8_TENSOR,
            HostTensorType::Int16Tensor => TensorType::INT16_TENSOR,
            HostTensorType::Int32Tensor => TensorType::INT32_TENSOR,
            HostTensorType::Int64Tensor => TensorType::INT64_TENSOR,
            HostTensorType::Uint8Tensor => TensorType::UINT8_TENSOR,
            HostTensorType::Uint16Tensor => TensorType::UINT16_TENSOR,
            HostTensorType::Uint32Tensor => TensorType::UINT32_TENSOR,
            HostTensorType::Uint64Tensor => TensorType::UINT64_TENSOR,
        }
    }
}

impl TryFrom<TensorType> for HostTensorType {
    type Error = BridgeError;

    fn try_from(t: TensorType) -> Result<Self, BridgeError> {
        HostTensorType::from_value(t as i32)
    }
}

/// Make a model package available at `path` without a filesystem.
///
/// `files` maps package-relative paths (`config.json`, `0/data/model.onnx`)
/// to `Uint8Array` contents.
#[wasm_bindgen(js_name = registerPackage)]
pub fn register_package(path: &str, files: &Object) -> Result<(), JsValue> {
    let mut contents = HashMap::new();
    for entry in Object::entries(files).iter() {
        let entry = js_sys::Array::from(&entry);
        let name = entry
            .get(0)
            .as_string()
            .ok_or_else(|| js_error(BridgeError::native("package file names must be strings")))?;
        let data = entry.get(1);
        if !data.is_instance_of::<Uint8Array>() {
            return Err(js_error(BridgeError::native(format!(
                "package file {name:?} must be a Uint8Array"
            ))));
        }
        contents.insert(name, Uint8Array::new(&data).to_vec());
    }
    tracing::debug!(path, files = contents.len(), "registering in-memory package");
    engine::register_package(path, contents).map_err(|e| js_error(e.into()))
}

/// Forget an in-memory package. Returns whether it was registered.
#[wasm_bindgen(js_name = unregisterPackage)]
pub fn unregister_package(path: &str) -> Result<bool, JsValue> {
    engine::unregister_package(path).map_err(|e| js_error(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasm_bindgen_test::*;

    wasm_bindgen_test_configure!(run_in_browser);

    #[wasm_bindgen_test]
    fn test_tensor_type_matches_host_table() {
        for host in HostTensorType::all() {
            let js = TensorType::from(host);
            assert_eq!(js as i32, host.value());
            assert_eq!(HostTensorType::try_from(js).unwrap(), host);
        }
    }

    #[wasm_bindgen_test]
    fn test_init_verifies_table() {
        assert!(init().is_ok());
    }
}
