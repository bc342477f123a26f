//! The invocation facade.
//!
//! [`Bridge`] is what the host calls into. It owns one handle registry per
//! kind of native object and runs every operation through
//! [`exception::translate`], so each call either returns a value or a single
//! classified [`BridgeError`].

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use lazy_static::lazy_static;
use serde::Serialize;
use tracing::{debug, info};

use podbridge_engine::{element_count, Model, Tensor, TensorAllocator, TensorSpec};

use crate::buffer::{self, DirectBufferView};
use crate::codec;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::exception::translate;
use crate::handles::{Handle, HandleKind, HandleRegistry};
use crate::types::{self, HostTensorType};

lazy_static! {
    static ref GLOBAL: Result<Bridge> = Bridge::new(BridgeConfig::default());
}

/// Named input tensors captured once for repeated inference.
///
/// The bundle holds its own references to the tensors, so it stays valid
/// after the tensor handles it was built from are deleted. It is not tied to
/// any model.
#[derive(Debug)]
pub struct PreparedInputs {
    inputs: Vec<(String, Arc<Tensor>)>,
}

/// Number of live handles of each kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct HandleCounts {
    pub models: usize,
    pub allocators: usize,
    pub prepared: usize,
    pub tensors: usize,
}

impl HandleCounts {
    pub fn total(&self) -> usize {
        self.models + self.allocators + self.prepared + self.tensors
    }
}

/// Handle-based facade over the inference engine.
pub struct Bridge {
    config: BridgeConfig,
    generic: Arc<TensorAllocator>,
    models: HandleRegistry<Model>,
    allocators: HandleRegistry<TensorAllocator>,
    prepared: HandleRegistry<PreparedInputs>,
    tensors: HandleRegistry<Tensor>,
}

impl Bridge {
    /// Create a bridge. Fails if the host type table is incomplete.
    pub fn new(config: BridgeConfig) -> Result<Self> {
        types::verify_type_table()?;
        let max = config.registry.max_live_handles;
        Ok(Self {
            generic: TensorAllocator::generic(),
            models: HandleRegistry::new(HandleKind::Model, max),
            allocators: HandleRegistry::new(HandleKind::Allocator, max),
            prepared: HandleRegistry::new(HandleKind::Prepared, max),
            tensors: HandleRegistry::new(HandleKind::Tensor, max),
            config,
        })
    }

    /// The process-wide bridge used by host bindings.
    pub fn global() -> Result<&'static Bridge> {
        GLOBAL.as_ref().map_err(Clone::clone)
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    // ----- models -----

    /// Open a model package. Only metadata is read; see [`Bridge::load_model`].
    ///
    /// `allocator` may be [`Handle::NONE`], in which case the model gets its
    /// own allocator.
    pub fn new_model(&self, path: &str, allocator: Handle) -> Result<Handle> {
        translate("nativeNew", || {
            let allocator = if allocator.is_none() {
                None
            } else {
                Some(self.allocators.resolve(allocator)?)
            };
            let model = Model::open(path, allocator, &self.config.engine)?;
            let handle = self.models.allocate(Arc::new(model))?;
            info!(path, handle = %handle, "model handle created");
            Ok(handle)
        })
    }

    pub fn get_inputs(&self, model: Handle) -> Result<Vec<TensorSpec>> {
        translate("nativeGetInputs", || Ok(self.models.resolve(model)?.inputs().to_vec()))
    }

    pub fn get_outputs(&self, model: Handle) -> Result<Vec<TensorSpec>> {
        translate("nativeGetOutputs", || Ok(self.models.resolve(model)?.outputs().to_vec()))
    }

    /// Load the model's weights. Loading twice is a load error.
    pub fn load_model(&self, model: Handle) -> Result<()> {
        translate("nativeLoadModel", || {
            self.models.resolve(model)?.load()?;
            Ok(())
        })
    }

    pub fn get_name(&self, model: Handle) -> Result<String> {
        translate("nativeGetName", || Ok(self.models.resolve(model)?.name().to_string()))
    }

    pub fn get_platform(&self, model: Handle) -> Result<String> {
        translate("nativeGetPlatform", || Ok(self.models.resolve(model)?.platform().to_string()))
    }

    /// A new allocator handle for the model's allocator.
    pub fn get_allocator(&self, model: Handle) -> Result<Handle> {
        translate("nativeGetAllocator", || {
            let allocator = self.models.resolve(model)?.allocator();
            self.allocators.allocate(allocator)
        })
    }

    /// A new allocator handle for the process-wide generic allocator.
    pub fn get_generic_allocator(&self) -> Result<Handle> {
        translate("nativeGetGenericAllocator", || {
            self.allocators.allocate(Arc::clone(&self.generic))
        })
    }

    /// Run inference on named tensor handles.
    ///
    /// `requested` of `None` or an empty list means every declared output.
    /// Each output is returned as a new tensor handle.
    pub fn infer(
        &self,
        inputs: &[(String, Handle)],
        requested: Option<&[String]>,
        model: Handle,
    ) -> Result<BTreeMap<String, Handle>> {
        translate("nativeInfer", || {
            let model = self.models.resolve(model)?;
            let tensors = self.resolve_inputs(inputs)?;
            self.run(&model, &tensors, requested.unwrap_or(&[]))
        })
    }

    /// Bundle named tensor handles for repeated inference.
    pub fn prepare(&self, inputs: &[(String, Handle)]) -> Result<Handle> {
        translate("nativePrepare", || {
            let mut seen = HashSet::new();
            for (name, _) in inputs {
                if name.is_empty() {
                    return Err(BridgeError::name("input name must not be empty"));
                }
                if !seen.insert(name.as_str()) {
                    return Err(BridgeError::name(format!("input {name:?} given more than once")));
                }
            }
            let bundle = PreparedInputs {
                inputs: self.resolve_inputs(inputs)?,
            };
            let handle = self.prepared.allocate(Arc::new(bundle))?;
            debug!(handle = %handle, inputs = inputs.len(), "prepared inputs");
            Ok(handle)
        })
    }

    /// Run inference on a prepared bundle, producing every declared output.
    /// The bundle is not consumed.
    pub fn infer_prepared(&self, prepared: Handle, model: Handle) -> Result<BTreeMap<String, Handle>> {
        translate("nativeInferPrepared", || {
            let bundle = self.prepared.resolve(prepared)?;
            let model = self.models.resolve(model)?;
            self.run(&model, &bundle.inputs, &[])
        })
    }

    pub fn delete_prepared(&self, prepared: Handle) -> Result<()> {
        translate("nativeDeletePrepared", || self.prepared.dispose(prepared))
    }

    /// Release a model handle. Prepared bundles and tensors are unaffected.
    pub fn delete_model(&self, model: Handle) -> Result<()> {
        translate("nativeDelete", || {
            self.models.dispose(model)?;
            debug!(handle = %model, "model handle deleted");
            Ok(())
        })
    }

    // ----- allocators and tensors -----

    /// Copy a host buffer into a new fixed-width tensor.
    pub fn allocate_tensor(
        &self,
        allocator: Handle,
        dims: &[i64],
        tensor_type: HostTensorType,
        bytes: &[u8],
    ) -> Result<Handle> {
        translate("nativeAllocate", || {
            let allocator = self.allocators.resolve(allocator)?;
            let element_type = types::element_type_of(tensor_type)?;
            let width = element_type.byte_width().ok_or_else(|| {
                BridgeError::Inference(format!(
                    "{tensor_type} cannot be allocated from a buffer; use the string tensor constructor"
                ))
            })?;
            let shape = to_shape(dims)?;
            let expected = element_count(&shape)?
                .checked_mul(width)
                .ok_or_else(|| BridgeError::Inference(format!("dims {dims:?} overflow")))?;
            if bytes.len() != expected {
                return Err(BridgeError::Inference(format!(
                    "buffer holds {} bytes but {tensor_type} dims {dims:?} need {expected}",
                    bytes.len()
                )));
            }
            self.check_size(expected)?;
            let tensor = allocator.allocate(element_type, &shape, bytes)?;
            self.tensors.allocate(Arc::new(tensor))
        })
    }

    /// Create a string tensor from host strings.
    pub fn create_string_tensor<S: AsRef<str>>(
        &self,
        allocator: Handle,
        strings: &[S],
        dims: &[i64],
    ) -> Result<Handle> {
        translate("nativeCreateStringTensor", || {
            let allocator = self.allocators.resolve(allocator)?;
            let shape = to_shape(dims)?;
            let numel = element_count(&shape)?;
            if numel != strings.len() {
                return Err(BridgeError::Inference(format!(
                    "{} strings do not fit dims {dims:?} ({numel} elements)",
                    strings.len()
                )));
            }
            let data = codec::decode_all(strings);
            self.check_size(data.iter().map(Vec::len).sum())?;
            let tensor = allocator.allocate_strings(&shape, data)?;
            self.tensors.allocate(Arc::new(tensor))
        })
    }

    pub fn delete_allocator(&self, allocator: Handle) -> Result<()> {
        translate("NeuropodTensorAllocator.nativeDelete", || self.allocators.dispose(allocator))
    }

    pub fn delete_tensor(&self, tensor: Handle) -> Result<()> {
        translate("NeuropodTensor.nativeDelete", || self.tensors.dispose(tensor))
    }

    pub fn tensor_type(&self, tensor: Handle) -> Result<HostTensorType> {
        translate("nativeGetTensorType", || {
            types::host_type_of(self.tensors.resolve(tensor)?.element_type())
        })
    }

    pub fn tensor_shape(&self, tensor: Handle) -> Result<Vec<i64>> {
        translate("nativeGetDims", || {
            self.tensors
                .resolve(tensor)?
                .shape()
                .iter()
                .map(|&d| {
                    i64::try_from(d).map_err(|_| BridgeError::native(format!("dimension {d} does not fit in i64")))
                })
                .collect()
        })
    }

    /// Call `f` with a zero-copy view of a tensor's storage.
    pub fn with_tensor_buffer<R, F>(&self, tensor: Handle, f: F) -> Result<R>
    where
        F: FnOnce(DirectBufferView<'_>) -> R,
    {
        translate("nativeGetBuffer", || {
            let tensor = self.tensors.resolve(tensor)?;
            let view = buffer::expose_buffer(&tensor)?;
            Ok(f(view))
        })
    }

    /// Copy the elements of a string tensor out as host strings.
    pub fn tensor_strings(&self, tensor: Handle) -> Result<Vec<String>> {
        translate("nativeToStringList", || {
            let tensor = self.tensors.resolve(tensor)?;
            buffer::copy_strings(&tensor)
        })
    }

    pub fn live_handles(&self) -> HandleCounts {
        HandleCounts {
            models: self.models.len(),
            allocators: self.allocators.len(),
            prepared: self.prepared.len(),
            tensors: self.tensors.len(),
        }
    }

    // ----- helpers (run inside a translated call) -----

    fn resolve_inputs(&self, inputs: &[(String, Handle)]) -> Result<Vec<(String, Arc<Tensor>)>> {
        inputs
            .iter()
            .map(|(name, handle)| Ok((name.clone(), self.tensors.resolve(*handle)?)))
            .collect()
    }

    fn run(
        &self,
        model: &Model,
        inputs: &[(String, Arc<Tensor>)],
        requested: &[String],
    ) -> Result<BTreeMap<String, Handle>> {
        let refs: Vec<(&str, &Tensor)> = inputs.iter().map(|(n, t)| (n.as_str(), t.as_ref())).collect();
        let outputs = model.infer(&refs, requested)?;

        let mut handles = BTreeMap::new();
        for (name, tensor) in outputs {
            match self.tensors.allocate(Arc::new(tensor)) {
                Ok(handle) => {
                    handles.insert(name, handle);
                }
                Err(err) => {
                    for handle in handles.into_values() {
                        let _ = self.tensors.dispose(handle);
                    }
                    return Err(err);
                }
            }
        }
        debug!(model = %model.name(), outputs = handles.len(), "inference finished");
        Ok(handles)
    }

    fn check_size(&self, bytes: usize) -> Result<()> {
        let limit = self.config.allocator.max_tensor_bytes;
        if limit != 0 && bytes > limit {
            return Err(BridgeError::native(format!(
                "{bytes} byte tensor exceeds the configured {limit} byte limit"
            )));
        }
        Ok(())
    }
}

fn to_shape(dims: &[i64]) -> Result<Vec<usize>> {
    dims.iter()
        .map(|&d| {
            usize::try_from(d).map_err(|_| BridgeError::Inference(format!("negative dimension {d} in {dims:?}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge() -> Bridge {
        Bridge::new(BridgeConfig::default()).unwrap()
    }

    fn floats(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_ne_bytes()).collect()
    }

    #[test]
    fn test_allocate_and_read_back() {
        let bridge = bridge();
        let alloc = bridge.get_generic_allocator().unwrap();
        let t = bridge
            .allocate_tensor(alloc, &[2, 2], HostTensorType::FloatTensor, &floats(&[1.0, 2.0, 3.0, 4.0]))
            .unwrap();
        assert_eq!(bridge.tensor_type(t).unwrap(), HostTensorType::FloatTensor);
        assert_eq!(bridge.tensor_shape(t).unwrap(), vec![2, 2]);
        let sum: f32 = bridge
            .with_tensor_buffer(t, |view| view.as_slice::<f32>().unwrap_or_default().iter().sum())
            .unwrap();
        assert_eq!(sum, 10.0);
    }

    #[test]
    fn test_allocate_rejects_bad_dims() {
        let bridge = bridge();
        let alloc = bridge.get_generic_allocator().unwrap();
        let bytes = floats(&[1.0, 2.0]);
        assert!(matches!(
            bridge.allocate_tensor(alloc, &[-2], HostTensorType::FloatTensor, &bytes),
            Err(BridgeError::Inference(_))
        ));
        assert!(matches!(
            bridge.allocate_tensor(alloc, &[3], HostTensorType::FloatTensor, &bytes),
            Err(BridgeError::Inference(_))
        ));
        assert!(matches!(
            bridge.allocate_tensor(alloc, &[2], HostTensorType::StringTensor, &bytes),
            Err(BridgeError::Inference(_))
        ));
        assert_eq!(bridge.live_handles().tensors, 0);
    }

    #[test]
    fn test_string_tensor() {
        let bridge = bridge();
        let alloc = bridge.get_generic_allocator().unwrap();
        let t = bridge.create_string_tensor(alloc, &["a", "bc", "", "d"], &[2, 2]).unwrap();
        assert_eq!(bridge.tensor_type(t).unwrap(), HostTensorType::StringTensor);
        assert_eq!(bridge.tensor_strings(t).unwrap(), vec!["a", "bc", "", "d"]);
        assert!(matches!(bridge.with_tensor_buffer(t, |_| ()), Err(BridgeError::Inference(_))));
        assert!(bridge.create_string_tensor(alloc, &["x"], &[2]).is_err());
    }

    #[test]
    fn test_generic_allocator_handles_are_independent() {
        let bridge = bridge();
        let a = bridge.get_generic_allocator().unwrap();
        let b = bridge.get_generic_allocator().unwrap();
        assert_ne!(a, b);
        bridge.delete_allocator(a).unwrap();
        assert!(bridge.create_string_tensor(b, &["still works"], &[1]).is_ok());
        assert!(matches!(bridge.delete_allocator(a), Err(BridgeError::Native(_))));
    }

    #[test]
    fn test_size_limit() {
        let mut config = BridgeConfig::default();
        config.allocator.max_tensor_bytes = 4;
        let bridge = Bridge::new(config).unwrap();
        let alloc = bridge.get_generic_allocator().unwrap();
        assert!(bridge.allocate_tensor(alloc, &[1], HostTensorType::FloatTensor, &floats(&[1.0])).is_ok());
        assert!(matches!(
            bridge.allocate_tensor(alloc, &[2], HostTensorType::FloatTensor, &floats(&[1.0, 2.0])),
            Err(BridgeError::Native(_))
        ));
    }

    #[test]
    fn test_prepare_rejects_bad_names() {
        let bridge = bridge();
        let alloc = bridge.get_generic_allocator().unwrap();
        let t = bridge.create_string_tensor(alloc, &["v"], &[1]).unwrap();
        assert!(matches!(bridge.prepare(&[(String::new(), t)]), Err(BridgeError::Name(_))));
        assert!(matches!(
            bridge.prepare(&[("x".into(), t), ("x".into(), t)]),
            Err(BridgeError::Name(_))
        ));
        assert_eq!(bridge.live_handles().prepared, 0);
    }

    #[test]
    fn test_missing_model_is_load_error() {
        let bridge = bridge();
        let err = bridge.new_model("/definitely/not/a/package", Handle::NONE).unwrap_err();
        assert_eq!(err.kind().host_name(), "LoadError");
        let err = bridge.get_name(Handle::from_raw(12345)).unwrap_err();
        assert_eq!(err.kind().host_name(), "NativeError");
    }

    #[test]
    fn test_global_is_shared() {
        let a = Bridge::global().unwrap();
        let b = Bridge::global().unwrap();
        assert!(std::ptr::eq(a, b));
    }
}
