//! Tensor storage.

use bytemuck::{cast_slice, pod_collect_to_vec, Pod};
use ndarray::{ArrayD, IxDyn};

use crate::error::EngineError;
use crate::{ElementType, Result};

/// Native tensor data, stored contiguously in standard (row-major) layout.
///
/// Half-precision values are kept as raw IEEE 754 bits. String elements are
/// byte strings: the engine does not require them to be valid UTF-8.
#[derive(Debug, Clone, PartialEq)]
pub enum Tensor {
    Double(ArrayD<f64>),
    Float(ArrayD<f32>),
    Half(ArrayD<u16>),
    String(ArrayD<Vec<u8>>),
    Int8(ArrayD<i8>),
    Int16(ArrayD<i16>),
    Int32(ArrayD<i32>),
    Int64(ArrayD<i64>),
    Uint8(ArrayD<u8>),
    Uint16(ArrayD<u16>),
    Uint32(ArrayD<u32>),
    Uint64(ArrayD<u64>),
}

macro_rules! each_array {
    ($tensor:expr, $arr:ident => $body:expr) => {
        match $tensor {
            Tensor::Double($arr) => $body,
            Tensor::Float($arr) => $body,
            Tensor::Half($arr) => $body,
            Tensor::String($arr) => $body,
            Tensor::Int8($arr) => $body,
            Tensor::Int16($arr) => $body,
            Tensor::Int32($arr) => $body,
            Tensor::Int64($arr) => $body,
            Tensor::Uint8($arr) => $body,
            Tensor::Uint16($arr) => $body,
            Tensor::Uint32($arr) => $body,
            Tensor::Uint64($arr) => $body,
        }
    };
}

/// Fixed-width numeric element with a one-to-one tensor variant.
///
/// Half precision has no native Rust scalar and is handled through
/// [`Tensor::from_f16_bits`] instead.
pub trait TensorElement: Pod {
    const ELEMENT_TYPE: ElementType;

    fn wrap(array: ArrayD<Self>) -> Tensor;

    fn unwrap(tensor: &Tensor) -> Option<&ArrayD<Self>>;
}

macro_rules! impl_tensor_element {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl TensorElement for $ty {
                const ELEMENT_TYPE: ElementType = ElementType::$variant;

                fn wrap(array: ArrayD<Self>) -> Tensor {
                    Tensor::$variant(array)
                }

                fn unwrap(tensor: &Tensor) -> Option<&ArrayD<Self>> {
                    match tensor {
                        Tensor::$variant(array) => Some(array),
                        _ => None,
                    }
                }
            }
        )*
    };
}

impl_tensor_element! {
    f64 => Double,
    f32 => Float,
    i8 => Int8,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => Uint8,
    u16 => Uint16,
    u32 => Uint32,
    u64 => Uint64,
}

impl Tensor {
    /// Get the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        each_array!(self, arr => arr.shape())
    }

    /// Get the total number of elements.
    pub fn numel(&self) -> usize {
        each_array!(self, arr => arr.len())
    }

    /// Get the element type of the tensor.
    pub fn element_type(&self) -> ElementType {
        match self {
            Tensor::Double(_) => ElementType::Double,
            Tensor::Float(_) => ElementType::Float,
            Tensor::Half(_) => ElementType::Half,
            Tensor::String(_) => ElementType::String,
            Tensor::Int8(_) => ElementType::Int8,
            Tensor::Int16(_) => ElementType::Int16,
            Tensor::Int32(_) => ElementType::Int32,
            Tensor::Int64(_) => ElementType::Int64,
            Tensor::Uint8(_) => ElementType::Uint8,
            Tensor::Uint16(_) => ElementType::Uint16,
            Tensor::Uint32(_) => ElementType::Uint32,
            Tensor::Uint64(_) => ElementType::Uint64,
        }
    }

    /// Create a tensor from a flat vector and a shape.
    pub fn from_vec<T: TensorElement>(shape: &[usize], data: Vec<T>) -> Result<Self> {
        array_from(shape, data).map(T::wrap)
    }

    /// Create a half-precision tensor from raw IEEE 754 bits.
    pub fn from_f16_bits(shape: &[usize], bits: Vec<u16>) -> Result<Self> {
        array_from(shape, bits).map(Tensor::Half)
    }

    /// Create a string tensor from byte strings.
    pub fn from_strings(shape: &[usize], data: Vec<Vec<u8>>) -> Result<Self> {
        array_from(shape, data).map(Tensor::String)
    }

    /// Create a fixed-width tensor by copying native-endian bytes.
    ///
    /// The byte length must be exactly `numel * byte_width`.
    pub fn from_ne_bytes(element_type: ElementType, shape: &[usize], bytes: &[u8]) -> Result<Self> {
        let width = element_type.byte_width().ok_or_else(|| {
            EngineError::Allocation("string tensors cannot be built from raw bytes".into())
        })?;
        let expected = element_count(shape)?
            .checked_mul(width)
            .ok_or_else(|| EngineError::Allocation(format!("shape {shape:?} overflows")))?;
        if bytes.len() != expected {
            return Err(EngineError::Allocation(format!(
                "buffer holds {} bytes but {element_type} shape {shape:?} needs {expected}",
                bytes.len()
            )));
        }

        match element_type {
            ElementType::Double => decode::<f64>(shape, bytes),
            ElementType::Float => decode::<f32>(shape, bytes),
            ElementType::Half => Tensor::from_f16_bits(shape, pod_collect_to_vec(bytes)),
            ElementType::Int8 => decode::<i8>(shape, bytes),
            ElementType::Int16 => decode::<i16>(shape, bytes),
            ElementType::Int32 => decode::<i32>(shape, bytes),
            ElementType::Int64 => decode::<i64>(shape, bytes),
            ElementType::Uint8 => decode::<u8>(shape, bytes),
            ElementType::Uint16 => decode::<u16>(shape, bytes),
            ElementType::Uint32 => decode::<u32>(shape, bytes),
            ElementType::Uint64 => decode::<u64>(shape, bytes),
            ElementType::String => Err(EngineError::Allocation(
                "string tensors cannot be built from raw bytes".into(),
            )),
        }
    }

    /// Borrow the backing storage of a fixed-width tensor as bytes.
    ///
    /// Returns `None` for string tensors. The slice aliases the tensor's
    /// memory; no copy is made.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Tensor::String(_) => None,
            Tensor::Double(arr) => bytes_of(arr),
            Tensor::Float(arr) => bytes_of(arr),
            Tensor::Half(arr) => bytes_of(arr),
            Tensor::Int8(arr) => bytes_of(arr),
            Tensor::Int16(arr) => bytes_of(arr),
            Tensor::Int32(arr) => bytes_of(arr),
            Tensor::Int64(arr) => bytes_of(arr),
            Tensor::Uint8(arr) => bytes_of(arr),
            Tensor::Uint16(arr) => bytes_of(arr),
            Tensor::Uint32(arr) => bytes_of(arr),
            Tensor::Uint64(arr) => bytes_of(arr),
        }
    }

    /// Try to get the inner array for a numeric element type.
    pub fn as_array<T: TensorElement>(&self) -> Option<&ArrayD<T>> {
        T::unwrap(self)
    }

    /// Try to get the elements of a numeric tensor as a flat slice.
    pub fn as_slice<T: TensorElement>(&self) -> Option<&[T]> {
        T::unwrap(self).and_then(|arr| arr.as_slice())
    }

    /// Try to get the raw bits of a half-precision tensor.
    pub fn as_f16_bits(&self) -> Option<&[u16]> {
        match self {
            Tensor::Half(arr) => arr.as_slice(),
            _ => None,
        }
    }

    /// Try to get the byte strings of a string tensor.
    pub fn as_strings(&self) -> Option<&ArrayD<Vec<u8>>> {
        match self {
            Tensor::String(arr) => Some(arr),
            _ => None,
        }
    }
}

/// Product of a shape's dimensions, failing on overflow.
pub fn element_count(shape: &[usize]) -> Result<usize> {
    shape
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| EngineError::Allocation(format!("shape {shape:?} overflows")))
}

fn array_from<T>(shape: &[usize], data: Vec<T>) -> Result<ArrayD<T>> {
    ArrayD::from_shape_vec(IxDyn(shape), data).map_err(|e| {
        EngineError::Allocation(format!("data does not fit shape {shape:?}: {e}"))
    })
}

/// Copy native-endian bytes into `T` elements; `bytes` may be unaligned.
fn decode<T: TensorElement>(shape: &[usize], bytes: &[u8]) -> Result<Tensor> {
    Tensor::from_vec::<T>(shape, pod_collect_to_vec(bytes))
}

fn bytes_of<T: Pod>(arr: &ArrayD<T>) -> Option<&[u8]> {
    arr.as_slice().map(cast_slice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_from_vec_and_accessors() {
        let t = Tensor::from_vec(&[2, 2], vec![1.0f32, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(t.shape(), &[2, 2]);
        assert_eq!(t.numel(), 4);
        assert_eq!(t.element_type(), ElementType::Float);
        assert_eq!(t.as_slice::<f32>(), Some(&[1.0, 2.0, 3.0, 4.0][..]));
        assert!(t.as_slice::<f64>().is_none());
    }

    #[test]
    fn test_from_vec_shape_mismatch() {
        let err = Tensor::from_vec(&[3], vec![1i64, 2]).unwrap_err();
        assert!(matches!(err, EngineError::Allocation(_)));
    }

    #[test]
    fn test_bytes_alias_storage() {
        let t = Tensor::from_vec(&[3], vec![1i32, -2, 3]).unwrap();
        let bytes = t.as_bytes().unwrap();
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytes.as_ptr(), t.as_slice::<i32>().unwrap().as_ptr().cast::<u8>());
        assert_eq!(i32::from_ne_bytes(bytes[4..8].try_into().unwrap()), -2);
    }

    #[test]
    fn test_from_ne_bytes_copies_values() {
        let values = [1.5f64, -0.25];
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_ne_bytes()).collect();
        let t = Tensor::from_ne_bytes(ElementType::Double, &[2], &bytes).unwrap();
        assert_eq!(t.as_slice::<f64>(), Some(&values[..]));

        let half = Tensor::from_ne_bytes(ElementType::Half, &[1], &0x3c00u16.to_ne_bytes()).unwrap();
        assert_eq!(half.as_f16_bits(), Some(&[0x3c00u16][..]));
    }

    #[test]
    fn test_from_ne_bytes_accepts_unaligned_input() {
        let values = [7u32, u32::MAX, 0x0102_0304];
        let mut bytes = vec![0u8];
        bytes.extend(values.iter().flat_map(|v| v.to_ne_bytes()));
        let t = Tensor::from_ne_bytes(ElementType::Uint32, &[3], &bytes[1..]).unwrap();
        assert_eq!(t.as_slice::<u32>(), Some(&values[..]));
        assert_eq!(t.as_bytes(), Some(&bytes[1..]));
    }

    #[test]
    fn test_from_ne_bytes_rejects_wrong_length() {
        let err = Tensor::from_ne_bytes(ElementType::Float, &[2], &[0u8; 7]).unwrap_err();
        assert!(err.to_string().contains("needs 8"));
    }

    #[test]
    fn test_from_ne_bytes_rejects_strings() {
        assert!(Tensor::from_ne_bytes(ElementType::String, &[0], &[]).is_err());
    }

    #[test]
    fn test_zero_length_tensor() {
        let t = Tensor::from_ne_bytes(ElementType::Float, &[0, 3], &[]).unwrap();
        assert_eq!(t.numel(), 0);
        assert_eq!(t.as_bytes(), Some(&[][..]));
    }

    #[test]
    fn test_string_tensor_has_no_byte_view() {
        let t = Tensor::from_strings(&[2], vec![b"a".to_vec(), vec![0xff]]).unwrap();
        assert_eq!(t.element_type(), ElementType::String);
        assert!(t.as_bytes().is_none());
        assert_eq!(t.as_strings().unwrap().iter().nth(1), Some(&vec![0xffu8]));
    }
}
