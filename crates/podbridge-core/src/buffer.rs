//! Zero-copy views of tensor storage.

use podbridge_engine::{ElementType, Tensor, TensorElement};

use crate::codec;
use crate::error::{BridgeError, Result};

/// A borrowed view of a fixed-width tensor's storage.
///
/// The view aliases the tensor's memory, so it cannot outlive the tensor.
/// Its length is exactly `numel * bytes_per_element`.
#[derive(Debug, Clone, Copy)]
pub struct DirectBufferView<'a> {
    tensor: &'a Tensor,
    bytes: &'a [u8],
}

impl<'a> DirectBufferView<'a> {
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    pub fn element_type(&self) -> ElementType {
        self.tensor.element_type()
    }

    pub fn shape(&self) -> &'a [usize] {
        self.tensor.shape()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.tensor.numel()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reinterpret the storage as a slice of `T`. `None` if `T` is not the
    /// tensor's element type.
    pub fn as_slice<T: TensorElement>(&self) -> Option<&'a [T]> {
        self.tensor.as_slice::<T>()
    }

    /// Raw bit patterns of a half-precision tensor.
    pub fn as_f16_bits(&self) -> Option<&'a [u16]> {
        self.tensor.as_f16_bits()
    }
}

/// Expose a tensor's storage without copying.
pub fn expose_buffer(tensor: &Tensor) -> Result<DirectBufferView<'_>> {
    if !tensor.element_type().is_fixed_width() {
        return Err(BridgeError::Inference(format!(
            "{} tensors have no direct buffer; use the string list accessor",
            tensor.element_type()
        )));
    }
    let bytes = tensor
        .as_bytes()
        .ok_or_else(|| BridgeError::native("tensor storage is not contiguous"))?;
    Ok(DirectBufferView { tensor, bytes })
}

/// Copy the elements of a string tensor out as host strings.
pub fn copy_strings(tensor: &Tensor) -> Result<Vec<String>> {
    let strings = tensor.as_strings().ok_or_else(|| {
        BridgeError::Inference(format!(
            "{} tensor is not a string tensor; use the direct buffer accessor",
            tensor.element_type()
        ))
    })?;
    codec::encode_all(strings.iter())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_aliases_storage() {
        let tensor = Tensor::from_vec(&[2, 2], vec![1.5f32, -2.0, 0.0, 8.25]).unwrap();
        let view = expose_buffer(&tensor).unwrap();
        assert_eq!(view.len(), 4);
        assert_eq!(view.bytes().len(), 16);
        assert_eq!(view.shape(), &[2, 2]);
        assert_eq!(view.element_type(), ElementType::Float);
        assert_eq!(view.as_slice::<f32>(), Some(&[1.5f32, -2.0, 0.0, 8.25][..]));
        assert_eq!(view.as_slice::<i32>(), None);
        assert_eq!(view.bytes().as_ptr(), tensor.as_bytes().unwrap().as_ptr());
    }

    #[test]
    fn test_zero_length_view() {
        let tensor = Tensor::from_vec::<i64>(&[0, 3], Vec::new()).unwrap();
        let view = expose_buffer(&tensor).unwrap();
        assert!(view.is_empty());
        assert!(view.bytes().is_empty());
    }

    #[test]
    fn test_strings_use_copy_path() {
        let tensor = Tensor::from_strings(&[2], vec![b"hello".to_vec(), "świat".as_bytes().to_vec()]).unwrap();
        let err = expose_buffer(&tensor).unwrap_err();
        assert!(err.to_string().contains("string list accessor"));
        assert_eq!(copy_strings(&tensor).unwrap(), vec!["hello", "świat"]);

        let numbers = Tensor::from_vec(&[1], vec![1u8]).unwrap();
        assert!(matches!(copy_strings(&numbers), Err(BridgeError::Inference(_))));
    }

    #[test]
    fn test_invalid_string_element() {
        let tensor = Tensor::from_strings(&[1], vec![vec![b'o', b'k', 0xff]]).unwrap();
        assert_eq!(copy_strings(&tensor), Err(BridgeError::Encoding { offset: 2 }));
    }
}
