//! Tensor specs and input validation.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::{ElementType, Result, Tensor};

/// One dimension of a declared tensor shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawDim", into = "RawDim")]
pub enum Dim {
    /// A concrete size.
    Fixed(i64),
    /// Any size.
    Any,
    /// Any size, but the same size everywhere the symbol appears in one call.
    Symbol(String),
}

/// `config.json` form: a number (`-1` is a wildcard), a string symbol or null.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawDim {
    Size(i64),
    Symbol(String),
    Wildcard(()),
}

impl From<RawDim> for Dim {
    fn from(raw: RawDim) -> Self {
        match raw {
            RawDim::Size(-1) | RawDim::Wildcard(()) => Dim::Any,
            RawDim::Size(n) => Dim::Fixed(n),
            RawDim::Symbol(s) => Dim::Symbol(s),
        }
    }
}

impl From<Dim> for RawDim {
    fn from(dim: Dim) -> Self {
        match dim {
            Dim::Fixed(n) => RawDim::Size(n),
            Dim::Any => RawDim::Wildcard(()),
            Dim::Symbol(s) => RawDim::Symbol(s),
        }
    }
}

impl Dim {
    /// Concrete size, or `-1` for wildcard and symbolic dimensions.
    pub fn value(&self) -> i64 {
        match self {
            Dim::Fixed(n) => *n,
            Dim::Any | Dim::Symbol(_) => -1,
        }
    }

    /// Symbol name for symbolic dimensions.
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Dim::Symbol(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Fixed(n) => write!(f, "{n}"),
            Dim::Any => f.write_str("?"),
            Dim::Symbol(s) => f.write_str(s),
        }
    }
}

/// Declared name, element type and shape of one model input or output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub name: String,
    pub dtype: ElementType,
    pub shape: Vec<Dim>,
}

impl TensorSpec {
    pub fn new(name: impl Into<String>, dtype: ElementType, shape: Vec<Dim>) -> Self {
        Self {
            name: name.into(),
            dtype,
            shape,
        }
    }
}

impl fmt::Display for TensorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.shape.iter().map(ToString::to_string).collect();
        write!(f, "{}: {}[{}]", self.name, self.dtype, dims.join(", "))
    }
}

/// Check that every name in a spec list is unique.
pub fn ensure_unique_names(kind: &str, specs: &[TensorSpec]) -> Result<()> {
    let mut seen = HashSet::new();
    for spec in specs {
        if !seen.insert(spec.name.as_str()) {
            return Err(EngineError::Config(format!(
                "{kind} name {:?} is declared more than once",
                spec.name
            )));
        }
    }
    Ok(())
}

/// Validate named tensors against a declared input spec.
///
/// Inputs may be a subset of the declared set. Symbols must resolve to the
/// same size across every tensor checked in one call.
pub fn validate_inputs(specs: &[TensorSpec], inputs: &[(&str, &Tensor)]) -> Result<()> {
    let mut seen = HashSet::new();
    let mut symbols: HashMap<&str, (usize, &str)> = HashMap::new();

    for (name, tensor) in inputs {
        if !seen.insert(*name) {
            return Err(EngineError::DuplicateInput(name.to_string()));
        }
        let spec = specs
            .iter()
            .find(|s| s.name == *name)
            .ok_or_else(|| EngineError::UnknownInput(name.to_string()))?;
        check_tensor(spec, tensor, &mut symbols)?;
    }
    Ok(())
}

/// Validate one tensor against its spec, binding symbols as it goes.
pub(crate) fn check_tensor<'a>(
    spec: &'a TensorSpec,
    tensor: &Tensor,
    symbols: &mut HashMap<&'a str, (usize, &'a str)>,
) -> Result<()> {
    let actual = tensor.element_type();
    if actual != spec.dtype {
        return Err(EngineError::TypeMismatch {
            name: spec.name.clone(),
            expected: spec.dtype,
            actual,
        });
    }

    let shape = tensor.shape();
    if shape.len() != spec.shape.len() {
        return Err(EngineError::shape(
            &spec.name,
            format!("rank {}, expected {}", shape.len(), spec.shape.len()),
        ));
    }

    for (axis, (dim, &size)) in spec.shape.iter().zip(shape).enumerate() {
        match dim {
            Dim::Any => {}
            Dim::Fixed(expected) => {
                if i64::try_from(size).ok() != Some(*expected) {
                    return Err(EngineError::shape(
                        &spec.name,
                        format!("dim {axis} is {size}, expected {expected}"),
                    ));
                }
            }
            Dim::Symbol(sym) => match symbols.get(sym.as_str()) {
                Some(&(bound, owner)) if bound != size => {
                    return Err(EngineError::shape(
                        &spec.name,
                        format!(
                            "dim {axis} is {size} but symbol {sym:?} is {bound} (bound by {owner:?})"
                        ),
                    ));
                }
                Some(_) => {}
                None => {
                    symbols.insert(sym.as_str(), (size, spec.name.as_str()));
                }
            },
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn spec(name: &str, dtype: ElementType, shape: Vec<Dim>) -> TensorSpec {
        TensorSpec::new(name, dtype, shape)
    }

    #[test]
    fn test_dims_from_config_json() {
        let dims: Vec<Dim> = serde_json::from_str(r#"[null, -1, 3, "batch"]"#).unwrap();
        assert_eq!(
            dims,
            vec![Dim::Any, Dim::Any, Dim::Fixed(3), Dim::Symbol("batch".into())]
        );
        assert_eq!(serde_json::to_string(&dims).unwrap(), r#"[null,null,3,"batch"]"#);
    }

    #[test]
    fn test_spec_display() {
        let s = spec(
            "x",
            ElementType::Float,
            vec![Dim::Symbol("batch".into()), Dim::Fixed(3), Dim::Any],
        );
        assert_eq!(s.to_string(), "x: float32[batch, 3, ?]");
    }

    #[test]
    fn test_validate_accepts_matching_subset() {
        let specs = vec![
            spec("x", ElementType::Float, vec![Dim::Fixed(3)]),
            spec("mask", ElementType::Uint8, vec![Dim::Fixed(3)]),
        ];
        let x = Tensor::from_vec(&[3], vec![1.0f32, 2.0, 3.0]).unwrap();
        validate_inputs(&specs, &[("x", &x)]).unwrap();
    }

    #[test]
    fn test_validate_unknown_and_duplicate_names() {
        let specs = vec![spec("x", ElementType::Float, vec![Dim::Any])];
        let x = Tensor::from_vec(&[1], vec![1.0f32]).unwrap();
        assert!(matches!(
            validate_inputs(&specs, &[("y", &x)]),
            Err(EngineError::UnknownInput(n)) if n == "y"
        ));
        assert!(matches!(
            validate_inputs(&specs, &[("x", &x), ("x", &x)]),
            Err(EngineError::DuplicateInput(_))
        ));
    }

    #[test]
    fn test_validate_type_and_shape() {
        let specs = vec![spec("x", ElementType::Float, vec![Dim::Fixed(3)])];
        let wrong_type = Tensor::from_vec(&[3], vec![1i32, 2, 3]).unwrap();
        assert!(matches!(
            validate_inputs(&specs, &[("x", &wrong_type)]),
            Err(EngineError::TypeMismatch { .. })
        ));

        let wrong_size = Tensor::from_vec(&[2], vec![1.0f32, 2.0]).unwrap();
        assert!(matches!(
            validate_inputs(&specs, &[("x", &wrong_size)]),
            Err(EngineError::ShapeMismatch { .. })
        ));

        let wrong_rank = Tensor::from_vec(&[3, 1], vec![1.0f32, 2.0, 3.0]).unwrap();
        assert!(matches!(
            validate_inputs(&specs, &[("x", &wrong_rank)]),
            Err(EngineError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_symbols_bind_across_inputs() {
        let batch = || Dim::Symbol("batch".into());
        let specs = vec![
            spec("a", ElementType::Int64, vec![batch()]),
            spec("b", ElementType::Int64, vec![batch(), Dim::Fixed(2)]),
        ];
        let a = Tensor::from_vec(&[2], vec![0i64, 1]).unwrap();
        let b_ok = Tensor::from_vec(&[2, 2], vec![0i64; 4]).unwrap();
        let b_bad = Tensor::from_vec(&[3, 2], vec![0i64; 6]).unwrap();

        validate_inputs(&specs, &[("a", &a), ("b", &b_ok)]).unwrap();
        let err = validate_inputs(&specs, &[("a", &a), ("b", &b_bad)]).unwrap_err();
        assert!(err.to_string().contains("symbol \"batch\" is 2"));
    }

    #[test]
    fn test_unique_names() {
        let specs = vec![
            spec("x", ElementType::Float, vec![]),
            spec("x", ElementType::Float, vec![]),
        ];
        assert!(ensure_unique_names("input", &specs).is_err());
        assert!(ensure_unique_names("input", &specs[..1]).is_ok());
    }
}
