//! Mapping between engine element types and the host `TensorType` enum.
//!
//! The host enum is looked up by constant name. The table below is the single
//! source of truth for both directions; [`verify_type_table`] checks at
//! startup that every engine type has exactly one host constant.

use std::collections::HashSet;
use std::fmt;

use podbridge_engine::ElementType;
use serde::{Serialize, Serializer};

use crate::error::{BridgeError, Result};

/// Constants of the host runtime's tensor type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostTensorType {
    DoubleTensor,
    FloatTensor,
    HalfTensor,
    StringTensor,
    Int8Tensor,
    Int16Tensor,
    Int32Tensor,
    Int64Tensor,
    Uint8Tensor,
    Uint16Tensor,
    Uint32Tensor,
    Uint64Tensor,
}

/// `(host constant, field name, ordinal, bytes per element)`.
const HOST_CONSTANTS: [(HostTensorType, &str, i32, u32); 12] = [
    (HostTensorType::DoubleTensor, "DOUBLE_TENSOR", 0, 8),
    (HostTensorType::FloatTensor, "FLOAT_TENSOR", 1, 4),
    (HostTensorType::HalfTensor, "HALF_TENSOR", 2, 2),
    (HostTensorType::StringTensor, "STRING_TENSOR", 3, 0),
    (HostTensorType::Int8Tensor, "INT8_TENSOR", 4, 1),
    (HostTensorType::Int16Tensor, "INT16_TENSOR", 5, 2),
    (HostTensorType::Int32Tensor, "INT32_TENSOR", 6, 4),
    (HostTensorType::Int64Tensor, "INT64_TENSOR", 7, 8),
    (HostTensorType::Uint8Tensor, "UINT8_TENSOR", 8, 1),
    (HostTensorType::Uint16Tensor, "UINT16_TENSOR", 9, 2),
    (HostTensorType::Uint32Tensor, "UINT32_TENSOR", 10, 4),
    (HostTensorType::Uint64Tensor, "UINT64_TENSOR", 11, 8),
];

impl HostTensorType {
    /// Every host constant, in ordinal order.
    pub fn all() -> impl Iterator<Item = HostTensorType> {
        HOST_CONSTANTS.iter().map(|(t, ..)| *t)
    }

    fn entry(self) -> &'static (HostTensorType, &'static str, i32, u32) {
        // The table lists every variant in declaration order.
        &HOST_CONSTANTS[self as usize]
    }

    /// Field name of the constant on the host enum.
    pub fn field_name(self) -> &'static str {
        self.entry().1
    }

    /// Ordinal value passed across the boundary.
    pub fn value(self) -> i32 {
        self.entry().2
    }

    /// Element width in bytes; 0 for strings.
    pub fn bytes_per_element(self) -> u32 {
        self.entry().3
    }

    /// Look up a constant by ordinal value.
    pub fn from_value(value: i32) -> Result<Self> {
        HOST_CONSTANTS
            .iter()
            .find(|(_, _, v, _)| *v == value)
            .map(|(t, ..)| *t)
            .ok_or_else(|| BridgeError::lookup(format!("no TensorType constant with value {value}")))
    }
}

impl fmt::Display for HostTensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

impl Serialize for HostTensorType {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.field_name())
    }
}

/// Host field name for an engine element type.
pub fn to_native_type_name(element_type: ElementType) -> Result<&'static str> {
    Ok(match element_type {
        ElementType::Double => "DOUBLE_TENSOR",
        ElementType::Float => "FLOAT_TENSOR",
        ElementType::Half => "HALF_TENSOR",
        ElementType::String => "STRING_TENSOR",
        ElementType::Int8 => "INT8_TENSOR",
        ElementType::Int16 => "INT16_TENSOR",
        ElementType::Int32 => "INT32_TENSOR",
        ElementType::Int64 => "INT64_TENSOR",
        ElementType::Uint8 => "UINT8_TENSOR",
        ElementType::Uint16 => "UINT16_TENSOR",
        ElementType::Uint32 => "UINT32_TENSOR",
        ElementType::Uint64 => "UINT64_TENSOR",
        other => {
            return Err(BridgeError::lookup(format!(
                "element type {other} has no host counterpart"
            )));
        }
    })
}

/// Host enum constant with exactly this field name.
pub fn to_host_enum(field_name: &str) -> Result<HostTensorType> {
    HOST_CONSTANTS
        .iter()
        .find(|(_, name, ..)| *name == field_name)
        .map(|(t, ..)| *t)
        .ok_or_else(|| BridgeError::lookup(format!("TensorType has no constant {field_name:?}")))
}

/// Host constant for an engine element type.
pub fn host_type_of(element_type: ElementType) -> Result<HostTensorType> {
    to_host_enum(to_native_type_name(element_type)?)
}

/// Engine element type for a host constant.
pub fn element_type_of(host: HostTensorType) -> Result<ElementType> {
    ElementType::ALL
        .into_iter()
        .find(|t| to_native_type_name(*t).ok() == Some(host.field_name()))
        .ok_or_else(|| BridgeError::lookup(format!("{host} has no engine element type")))
}

/// Check that the mapping is a bijection between engine types and host
/// constants, and that widths agree.
pub fn verify_type_table() -> Result<()> {
    let mut seen = HashSet::new();
    for element_type in ElementType::ALL {
        let host = host_type_of(element_type)?;
        if !seen.insert(host) {
            return Err(BridgeError::lookup(format!(
                "{host} is mapped from more than one element type"
            )));
        }
        let width = element_type.byte_width().unwrap_or(0);
        if width != host.bytes_per_element() as usize {
            return Err(BridgeError::lookup(format!(
                "{element_type} is {width} bytes wide but {host} declares {}",
                host.bytes_per_element()
            )));
        }
    }
    if let Some(orphan) = HostTensorType::all().find(|h| !seen.contains(h)) {
        return Err(BridgeError::lookup(format!("{orphan} has no engine element type")));
    }
    Ok(())
}
