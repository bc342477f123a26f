//! `Neuropod` host class: model handles and inference.

use js_sys::Map;
use wasm_bindgen::prelude::*;

use podbridge_core::{Bridge, Handle};

use crate::convert::{self, handle, js_error, raw};

fn bridge() -> Result<&'static Bridge, JsValue> {
    Bridge::global().map_err(js_error)
}

fn outputs_to_map(outputs: std::collections::BTreeMap<String, Handle>) -> Map {
    let map = Map::new();
    for (name, h) in outputs {
        map.set(&JsValue::from_str(&name), &JsValue::from(raw(h)));
    }
    map
}

/// Static entry points for models.
#[wasm_bindgen]
pub struct Neuropod;

#[wasm_bindgen]
impl Neuropod {
    /// Open a model package. Pass `0n` as `allocatorHandle` for a model-owned allocator.
    #[wasm_bindgen(js_name = nativeNew)]
    pub fn native_new(path: &str, allocator_handle: i64) -> Result<i64, JsValue> {
        bridge()?
            .new_model(path, handle(allocator_handle))
            .map(raw)
            .map_err(js_error)
    }

    #[wasm_bindgen(js_name = nativeGetInputs)]
    pub fn native_get_inputs(model_handle: i64) -> Result<JsValue, JsValue> {
        let specs = bridge()?.get_inputs(handle(model_handle)).map_err(js_error)?;
        convert::specs_to_js(&specs)
    }

    #[wasm_bindgen(js_name = nativeGetOutputs)]
    pub fn native_get_outputs(model_handle: i64) -> Result<JsValue, JsValue> {
        let specs = bridge()?.get_outputs(handle(model_handle)).map_err(js_error)?;
        convert::specs_to_js(&specs)
    }

    #[wasm_bindgen(js_name = nativeLoadModel)]
    pub fn native_load_model(model_handle: i64) -> Result<(), JsValue> {
        bridge()?.load_model(handle(model_handle)).map_err(js_error)
    }

    #[wasm_bindgen(js_name = nativeGetName)]
    pub fn native_get_name(model_handle: i64) -> Result<String, JsValue> {
        bridge()?.get_name(handle(model_handle)).map_err(js_error)
    }

    #[wasm_bindgen(js_name = nativeGetPlatform)]
    pub fn native_get_platform(model_handle: i64) -> Result<String, JsValue> {
        bridge()?.get_platform(handle(model_handle)).map_err(js_error)
    }

    #[wasm_bindgen(js_name = nativeGetAllocator)]
    pub fn native_get_allocator(model_handle: i64) -> Result<i64, JsValue> {
        bridge()?
            .get_allocator(handle(model_handle))
            .map(raw)
            .map_err(js_error)
    }

    #[wasm_bindgen(js_name = nativeGetGenericAllocator)]
    pub fn native_get_generic_allocator() -> Result<i64, JsValue> {
        bridge()?.get_generic_allocator().map(raw).map_err(js_error)
    }

    /// Run inference.
    ///
    /// `inputs` is an array of `[name, tensorHandle]` pairs. `requestedOutputs`
    /// may be `null` for every declared output. Returns a `Map` from output
    /// name to tensor handle.
    #[wasm_bindgen(js_name = nativeInfer)]
    pub fn native_infer(
        inputs: JsValue,
        requested_outputs: JsValue,
        model_handle: i64,
    ) -> Result<Map, JsValue> {
        let inputs = convert::named_handles(inputs)?;
        let requested = convert::output_names(requested_outputs)?;
        let outputs = bridge()?
            .infer(&inputs, requested.as_deref(), handle(model_handle))
            .map_err(js_error)?;
        Ok(outputs_to_map(outputs))
    }

    /// Bundle `[name, tensorHandle]` pairs for repeated inference.
    #[wasm_bindgen(js_name = nativePrepare)]
    pub fn native_prepare(inputs: JsValue) -> Result<i64, JsValue> {
        let inputs = convert::named_handles(inputs)?;
        bridge()?.prepare(&inputs).map(raw).map_err(js_error)
    }

    #[wasm_bindgen(js_name = nativeInferPrepared)]
    pub fn native_infer_prepared(prepared_handle: i64, model_handle: i64) -> Result<Map, JsValue> {
        let outputs = bridge()?
            .infer_prepared(handle(prepared_handle), handle(model_handle))
            .map_err(js_error)?;
        Ok(outputs_to_map(outputs))
    }

    #[wasm_bindgen(js_name = nativeDeletePrepared)]
    pub fn native_delete_prepared(prepared_handle: i64) -> Result<(), JsValue> {
        bridge()?.delete_prepared(handle(prepared_handle)).map_err(js_error)
    }

    #[wasm_bindgen(js_name = nativeDelete)]
    pub fn native_delete(model_handle: i64) -> Result<(), JsValue> {
        bridge()?.delete_model(handle(model_handle)).map_err(js_error)
    }
}
