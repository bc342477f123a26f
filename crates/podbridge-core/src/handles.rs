//! Opaque handles for native objects owned by the host.
//!
//! A handle is a 64-bit integer that packs a slot index, the slot's
//! generation and the kind of object it refers to:
//!
//! ```text
//!  63  62..56   55..32       31..0
//!  0   kind     generation   index + 1
//! ```
//!
//! Disposing a handle frees its slot and bumps the slot's generation, so a
//! stale copy of the handle no longer matches and is rejected instead of
//! resolving to whatever object reuses the slot.

use std::fmt;
use std::sync::{Arc, RwLock};

use tracing::trace;

use crate::error::{BridgeError, Result};

const INDEX_BITS: u32 = 32;
const GENERATION_BITS: u32 = 24;
const GENERATION_MASK: u32 = (1 << GENERATION_BITS) - 1;
const KIND_SHIFT: u32 = INDEX_BITS + GENERATION_BITS;
const KIND_MASK: u64 = 0x7f;

/// The kind of native object a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Model = 1,
    Allocator = 2,
    Prepared = 3,
    Tensor = 4,
}

impl HandleKind {
    fn from_tag(tag: u64) -> Option<Self> {
        match tag {
            1 => Some(HandleKind::Model),
            2 => Some(HandleKind::Allocator),
            3 => Some(HandleKind::Prepared),
            4 => Some(HandleKind::Tensor),
            _ => None,
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HandleKind::Model => "model",
            HandleKind::Allocator => "allocator",
            HandleKind::Prepared => "prepared",
            HandleKind::Tensor => "tensor",
        })
    }
}

/// An opaque reference to a native object, held by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

impl Handle {
    /// The null handle. Never refers to an object.
    pub const NONE: Handle = Handle(0);

    fn pack(kind: HandleKind, generation: u32, index: usize) -> Self {
        let slot = (index as u64) + 1;
        Handle(((kind as u64) << KIND_SHIFT) | (u64::from(generation & GENERATION_MASK) << INDEX_BITS) | slot)
    }

    pub fn from_raw(raw: u64) -> Self {
        Handle(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    /// The kind tag carried by the handle, if it is a well-formed one.
    pub fn kind(self) -> Option<HandleKind> {
        HandleKind::from_tag((self.0 >> KIND_SHIFT) & KIND_MASK)
    }

    fn generation(self) -> u32 {
        ((self.0 >> INDEX_BITS) as u32) & GENERATION_MASK
    }

    fn index(self) -> Option<usize> {
        let slot = self.0 as u32;
        slot.checked_sub(1).map(|i| i as usize)
    }
}

impl From<i64> for Handle {
    fn from(raw: i64) -> Self {
        Handle(raw as u64)
    }
}

impl From<Handle> for i64 {
    fn from(handle: Handle) -> Self {
        handle.0 as i64
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<Arc<T>>,
}

struct Slots<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    live: usize,
}

/// A table of live native objects of one kind.
///
/// Objects are stored as `Arc<T>`. Resolving a handle clones the `Arc` and
/// releases the table lock, so a resolved object stays usable even if the
/// handle is disposed concurrently.
pub struct HandleRegistry<T> {
    kind: HandleKind,
    max_live: usize,
    inner: RwLock<Slots<T>>,
}

impl<T> HandleRegistry<T> {
    /// Create an empty registry. `max_live == 0` means unlimited.
    pub fn new(kind: HandleKind, max_live: usize) -> Self {
        Self {
            kind,
            max_live,
            inner: RwLock::new(Slots {
                slots: Vec::new(),
                free: Vec::new(),
                live: 0,
            }),
        }
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.inner.read().map(|s| s.live).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register an object and return a fresh handle for it.
    pub fn allocate(&self, value: Arc<T>) -> Result<Handle> {
        let mut inner = self.write()?;
        if self.max_live != 0 && inner.live >= self.max_live {
            return Err(BridgeError::native(format!(
                "too many live {} handles (limit {})",
                self.kind, self.max_live
            )));
        }

        let index = match inner.free.pop() {
            Some(index) => {
                inner.slots[index].value = Some(value);
                index
            }
            None => {
                if inner.slots.len() >= u32::MAX as usize {
                    return Err(BridgeError::native(format!("{} handle table is full", self.kind)));
                }
                inner.slots.push(Slot {
                    generation: 0,
                    value: Some(value),
                });
                inner.slots.len() - 1
            }
        };
        inner.live += 1;

        let handle = Handle::pack(self.kind, inner.slots[index].generation, index);
        trace!(kind = %self.kind, handle = %handle, "allocated handle");
        Ok(handle)
    }

    /// Look up the object behind a handle.
    pub fn resolve(&self, handle: Handle) -> Result<Arc<T>> {
        let inner = self
            .inner
            .read()
            .map_err(|e| BridgeError::native(format!("{} handle table poisoned: {e}", self.kind)))?;
        let index = self.check(handle, &inner)?;
        inner.slots[index]
            .value
            .clone()
            .ok_or_else(|| self.stale(handle))
    }

    /// Release a handle. The object is dropped once no resolved copies remain.
    pub fn dispose(&self, handle: Handle) -> Result<()> {
        let mut inner = self.write()?;
        let index = self.check(handle, &inner)?;
        let slot = &mut inner.slots[index];
        if slot.value.take().is_none() {
            return Err(self.stale(handle));
        }
        slot.generation = slot.generation.wrapping_add(1) & GENERATION_MASK;
        inner.free.push(index);
        inner.live -= 1;
        trace!(kind = %self.kind, handle = %handle, "disposed handle");
        Ok(())
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Slots<T>>> {
        self.inner
            .write()
            .map_err(|e| BridgeError::native(format!("{} handle table poisoned: {e}", self.kind)))
    }

    /// Validate the structure of a handle and return its slot index.
    fn check(&self, handle: Handle, inner: &Slots<T>) -> Result<usize> {
        if handle.is_none() {
            return Err(BridgeError::native(format!("null {} handle", self.kind)));
        }
        match handle.kind() {
            Some(kind) if kind == self.kind => {}
            Some(kind) => {
                return Err(BridgeError::native(format!(
                    "expected a {} handle, got a {kind} handle {handle}",
                    self.kind
                )));
            }
            None => {
                return Err(BridgeError::native(format!("malformed {} handle {handle}", self.kind)));
            }
        }
        let index = handle
            .index()
            .filter(|i| *i < inner.slots.len())
            .ok_or_else(|| BridgeError::native(format!("unknown {} handle {handle}", self.kind)))?;
        if inner.slots[index].generation != handle.generation() {
            return Err(self.stale(handle));
        }
        Ok(index)
    }

    fn stale(&self, handle: Handle) -> BridgeError {
        BridgeError::native(format!("{} handle {handle} was already deleted", self.kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_resolve_dispose() {
        let registry = HandleRegistry::new(HandleKind::Tensor, 0);
        let h = registry.allocate(Arc::new("a")).unwrap();
        assert!(!h.is_none());
        assert_eq!(h.kind(), Some(HandleKind::Tensor));
        assert_eq!(*registry.resolve(h).unwrap(), "a");
        assert_eq!(registry.len(), 1);

        registry.dispose(h).unwrap();
        assert!(registry.is_empty());
        assert!(matches!(registry.resolve(h), Err(BridgeError::Native(_))));
        assert!(matches!(registry.dispose(h), Err(BridgeError::Native(_))));
    }

    #[test]
    fn test_reused_slot_rejects_stale_handle() {
        let registry = HandleRegistry::new(HandleKind::Model, 0);
        let old = registry.allocate(Arc::new(1)).unwrap();
        registry.dispose(old).unwrap();
        let new = registry.allocate(Arc::new(2)).unwrap();

        assert_ne!(old, new);
        assert_eq!(old.index(), new.index());
        assert_eq!(*registry.resolve(new).unwrap(), 2);
        let err = registry.resolve(old).unwrap_err();
        assert!(err.to_string().contains("already deleted"));
    }

    #[test]
    fn test_cross_kind_and_null_handles() {
        let models = HandleRegistry::new(HandleKind::Model, 0);
        let tensors = HandleRegistry::new(HandleKind::Tensor, 0);
        let t = tensors.allocate(Arc::new(())).unwrap();
        models.allocate(Arc::new(())).unwrap();

        let err = models.resolve(t).unwrap_err();
        assert!(err.to_string().contains("expected a model handle, got a tensor handle"));
        assert!(models.resolve(Handle::NONE).is_err());
        assert!(models.resolve(Handle::from_raw(u64::MAX >> 1)).is_err());
    }

    #[test]
    fn test_max_live() {
        let registry = HandleRegistry::new(HandleKind::Prepared, 2);
        let a = registry.allocate(Arc::new(0)).unwrap();
        registry.allocate(Arc::new(1)).unwrap();
        assert!(registry.allocate(Arc::new(2)).is_err());
        registry.dispose(a).unwrap();
        assert!(registry.allocate(Arc::new(3)).is_ok());
    }

    #[test]
    fn test_host_round_trip_is_positive() {
        let registry = HandleRegistry::new(HandleKind::Allocator, 0);
        let h = registry.allocate(Arc::new(())).unwrap();
        let raw: i64 = h.into();
        assert!(raw > 0);
        assert_eq!(Handle::from(raw), h);
    }

    #[test]
    fn test_resolved_value_outlives_dispose() {
        let registry = HandleRegistry::new(HandleKind::Tensor, 0);
        let h = registry.allocate(Arc::new(vec![1, 2, 3])).unwrap();
        let value = registry.resolve(h).unwrap();
        registry.dispose(h).unwrap();
        assert_eq!(*value, vec![1, 2, 3]);
    }
}
