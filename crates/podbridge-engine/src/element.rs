//! Tensor element types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::EngineError;

/// Element types the engine can store and produce.
///
/// New variants may be added as backends grow; callers that map these to
/// another type system must treat an unknown variant as a lookup failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum ElementType {
    #[serde(rename = "float64")]
    Double,
    #[serde(rename = "float32")]
    Float,
    #[serde(rename = "float16")]
    Half,
    String,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
}

impl ElementType {
    /// Every element type, in engine enumeration order.
    pub const ALL: [ElementType; 12] = [
        ElementType::Double,
        ElementType::Float,
        ElementType::Half,
        ElementType::String,
        ElementType::Int8,
        ElementType::Int16,
        ElementType::Int32,
        ElementType::Int64,
        ElementType::Uint8,
        ElementType::Uint16,
        ElementType::Uint32,
        ElementType::Uint64,
    ];

    /// Name used in `config.json`.
    pub fn config_name(self) -> &'static str {
        match self {
            ElementType::Double => "float64",
            ElementType::Float => "float32",
            ElementType::Half => "float16",
            ElementType::String => "string",
            ElementType::Int8 => "int8",
            ElementType::Int16 => "int16",
            ElementType::Int32 => "int32",
            ElementType::Int64 => "int64",
            ElementType::Uint8 => "uint8",
            ElementType::Uint16 => "uint16",
            ElementType::Uint32 => "uint32",
            ElementType::Uint64 => "uint64",
        }
    }

    /// Size of one element in bytes, or `None` for variable-width strings.
    pub fn byte_width(self) -> Option<usize> {
        match self {
            ElementType::String => None,
            ElementType::Int8 | ElementType::Uint8 => Some(1),
            ElementType::Half | ElementType::Int16 | ElementType::Uint16 => Some(2),
            ElementType::Float | ElementType::Int32 | ElementType::Uint32 => Some(4),
            ElementType::Double | ElementType::Int64 | ElementType::Uint64 => Some(8),
        }
    }

    /// Whether elements have a fixed-width binary representation.
    pub fn is_fixed_width(self) -> bool {
        self.byte_width().is_some()
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_name())
    }
}

impl FromStr for ElementType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ElementType::ALL
            .into_iter()
            .find(|t| t.config_name() == s)
            .ok_or_else(|| EngineError::Config(format!("unknown dtype {s:?}")))
    }
}
