//! `NeuropodTensorAllocator` and `NeuropodTensor` host classes.

use js_sys::{
    BigInt64Array, BigUint64Array, Float32Array, Float64Array, Int16Array, Int32Array, Int8Array,
    Uint16Array, Uint32Array, Uint8Array,
};
use wasm_bindgen::prelude::*;

use podbridge_core::engine::ElementType;
use podbridge_core::{Bridge, BridgeError, DirectBufferView, HostTensorType};

use crate::convert::{self, handle, js_error, raw};
use crate::TensorType;

fn bridge() -> Result<&'static Bridge, JsValue> {
    Bridge::global().map_err(js_error)
}

/// Static entry points for tensor allocators.
#[wasm_bindgen]
pub struct NeuropodTensorAllocator;

#[wasm_bindgen]
impl NeuropodTensorAllocator {
    /// Copy `buffer` into a new tensor. `dims` is an array of integers and
    /// `buffer` holds the elements in native byte order.
    #[wasm_bindgen(js_name = nativeAllocate)]
    pub fn native_allocate(
        dims: JsValue,
        tensor_type: TensorType,
        buffer: &[u8],
        allocator_handle: i64,
    ) -> Result<i64, JsValue> {
        let dims = convert::dims(dims)?;
        let tensor_type = HostTensorType::try_from(tensor_type).map_err(js_error)?;
        bridge()?
            .allocate_tensor(handle(allocator_handle), &dims, tensor_type, buffer)
            .map(raw)
            .map_err(js_error)
    }

    #[wasm_bindgen(js_name = nativeCreateStringTensor)]
    pub fn native_create_string_tensor(
        data: JsValue,
        dims: JsValue,
        allocator_handle: i64,
    ) -> Result<i64, JsValue> {
        let data = convert::strings(data)?;
        let dims = convert::dims(dims)?;
        bridge()?
            .create_string_tensor(handle(allocator_handle), &data, &dims)
            .map(raw)
            .map_err(js_error)
    }

    #[wasm_bindgen(js_name = nativeDelete)]
    pub fn native_delete(allocator_handle: i64) -> Result<(), JsValue> {
        bridge()?.delete_allocator(handle(allocator_handle)).map_err(js_error)
    }
}

/// Static entry points for tensors.
#[wasm_bindgen]
pub struct NeuropodTensor;

#[wasm_bindgen]
impl NeuropodTensor {
    /// A typed array aliasing the tensor's storage in wasm memory.
    ///
    /// The array is only valid while the tensor handle is live and until wasm
    /// memory grows. Copy it (`.slice()`) to keep the data longer.
    #[wasm_bindgen(js_name = nativeGetBuffer)]
    pub fn native_get_buffer(tensor_handle: i64) -> Result<JsValue, JsValue> {
        bridge()?
            .with_tensor_buffer(handle(tensor_handle), typed_array_view)
            .map_err(js_error)?
            .map_err(js_error)
    }

    #[wasm_bindgen(js_name = nativeGetDims)]
    pub fn native_get_dims(tensor_handle: i64) -> Result<Vec<i64>, JsValue> {
        bridge()?.tensor_shape(handle(tensor_handle)).map_err(js_error)
    }

    #[wasm_bindgen(js_name = nativeGetTensorType)]
    pub fn native_get_tensor_type(tensor_handle: i64) -> Result<TensorType, JsValue> {
        bridge()?
            .tensor_type(handle(tensor_handle))
            .map(TensorType::from)
            .map_err(js_error)
    }

    #[wasm_bindgen(js_name = nativeToStringList)]
    pub fn native_to_string_list(tensor_handle: i64) -> Result<Vec<String>, JsValue> {
        bridge()?.tensor_strings(handle(tensor_handle)).map_err(js_error)
    }

    #[wasm_bindgen(js_name = nativeDelete)]
    pub fn native_delete(tensor_handle: i64) -> Result<(), JsValue> {
        bridge()?.delete_tensor(handle(tensor_handle)).map_err(js_error)
    }
}

macro_rules! view_as {
    ($view:expr, $t:ty, $array:ty) => {
        $view
            .as_slice::<$t>()
            // SAFETY: the view aliases memory owned by a live tensor handle;
            // the caller must not use it past the handle's deletion.
            .map(|s| JsValue::from(unsafe { <$array>::view(s) }))
    };
}

fn typed_array_view(view: DirectBufferView<'_>) -> Result<JsValue, BridgeError> {
    let array = match view.element_type() {
        ElementType::Double => view_as!(view, f64, Float64Array),
        ElementType::Float => view_as!(view, f32, Float32Array),
        ElementType::Half => view
            .as_f16_bits()
            // SAFETY: as above.
            .map(|s| JsValue::from(unsafe { Uint16Array::view(s) })),
        ElementType::Int8 => view_as!(view, i8, Int8Array),
        ElementType::Int16 => view_as!(view, i16, Int16Array),
        ElementType::Int32 => view_as!(view, i32, Int32Array),
        ElementType::Int64 => view_as!(view, i64, BigInt64Array),
        ElementType::Uint8 => view_as!(view, u8, Uint8Array),
        ElementType::Uint16 => view_as!(view, u16, Uint16Array),
        ElementType::Uint32 => view_as!(view, u32, Uint32Array),
        ElementType::Uint64 => view_as!(view, u64, BigUint64Array),
        other => {
            return Err(BridgeError::Inference(format!("{other} tensors have no typed array view")));
        }
    };
    array.ok_or_else(|| BridgeError::native("tensor storage does not match its element type"))
}
