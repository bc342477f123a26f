//! Tensor allocators.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lazy_static::lazy_static;
use tracing::trace;

use crate::error::EngineError;
use crate::tensor::element_count;
use crate::{ElementType, Result, Tensor};

lazy_static! {
    static ref GENERIC: Arc<TensorAllocator> = Arc::new(TensorAllocator::new(AllocatorKind::Generic, 0));
}

/// Where an allocator came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocatorKind {
    /// The process-wide allocator, not tied to a model.
    Generic,
    /// An allocator bound to a model's backend platform.
    Model { platform: String },
}

impl fmt::Display for AllocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocatorKind::Generic => f.write_str("generic"),
            AllocatorKind::Model { platform } => write!(f, "model:{platform}"),
        }
    }
}

/// Creates tensors from host-supplied data.
///
/// Allocators are shared through `Arc`; every tensor they create is an
/// independent copy of the host data.
#[derive(Debug)]
pub struct TensorAllocator {
    kind: AllocatorKind,
    max_tensor_bytes: usize,
    allocated: AtomicUsize,
}

impl TensorAllocator {
    /// Create an allocator. `max_tensor_bytes == 0` means unlimited.
    pub fn new(kind: AllocatorKind, max_tensor_bytes: usize) -> Self {
        Self {
            kind,
            max_tensor_bytes,
            allocated: AtomicUsize::new(0),
        }
    }

    /// The process-wide generic allocator.
    pub fn generic() -> Arc<TensorAllocator> {
        Arc::clone(&GENERIC)
    }

    pub fn kind(&self) -> &AllocatorKind {
        &self.kind
    }

    /// Number of tensors created by this allocator so far.
    pub fn allocation_count(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Allocate a fixed-width tensor from native-endian bytes.
    pub fn allocate(&self, element_type: ElementType, shape: &[usize], bytes: &[u8]) -> Result<Tensor> {
        self.check_size(bytes.len())?;
        let tensor = Tensor::from_ne_bytes(element_type, shape, bytes)?;
        self.record(&tensor);
        Ok(tensor)
    }

    /// Allocate a string tensor.
    pub fn allocate_strings(&self, shape: &[usize], data: Vec<Vec<u8>>) -> Result<Tensor> {
        let numel = element_count(shape)?;
        if numel != data.len() {
            return Err(EngineError::Allocation(format!(
                "{} strings do not fit shape {shape:?} ({numel} elements)",
                data.len()
            )));
        }
        self.check_size(data.iter().map(Vec::len).sum())?;
        let tensor = Tensor::from_strings(shape, data)?;
        self.record(&tensor);
        Ok(tensor)
    }

    fn check_size(&self, bytes: usize) -> Result<()> {
        if self.max_tensor_bytes != 0 && bytes > self.max_tensor_bytes {
            return Err(EngineError::Allocation(format!(
                "{bytes} bytes exceeds the {} byte limit of the {} allocator",
                self.max_tensor_bytes, self.kind
            )));
        }
        Ok(())
    }

    fn record(&self, tensor: &Tensor) {
        self.allocated.fetch_add(1, Ordering::Relaxed);
        trace!(
            allocator = %self.kind,
            dtype = %tensor.element_type(),
            shape = ?tensor.shape(),
            "allocated tensor"
        );
    }
}
