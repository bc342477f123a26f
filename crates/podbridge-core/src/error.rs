//! Error types for the bridge.

use std::fmt;

use podbridge_engine::EngineError;
use thiserror::Error;

/// Every failure a bridge call can surface to the host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Model path, package or load-time failure.
    #[error("load error: {0}")]
    Load(String),

    /// Shape or type mismatch, or backend execution failure.
    #[error("inference error: {0}")]
    Inference(String),

    /// Unknown input or output name.
    #[error("name error: {0}")]
    Name(String),

    /// Unmapped element type or missing host enum constant.
    #[error("lookup error: {0}")]
    Lookup(String),

    /// Text that is not valid UTF-8.
    #[error("encoding error: invalid UTF-8 at byte {offset}")]
    Encoding { offset: usize },

    /// Any other failure, including handle misuse and native panics.
    #[error("native error: {0}")]
    Native(String),
}

/// The taxonomy of [`BridgeError`], without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Load,
    Inference,
    Name,
    Lookup,
    Encoding,
    Native,
}

impl ErrorKind {
    /// Name of the exception raised on the host side.
    pub fn host_name(self) -> &'static str {
        match self {
            ErrorKind::Load => "LoadError",
            ErrorKind::Inference => "InferenceError",
            ErrorKind::Name => "NameError",
            ErrorKind::Lookup => "LookupError",
            ErrorKind::Encoding => "EncodingError",
            ErrorKind::Native => "NativeError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.host_name())
    }
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Load(_) => ErrorKind::Load,
            BridgeError::Inference(_) => ErrorKind::Inference,
            BridgeError::Name(_) => ErrorKind::Name,
            BridgeError::Lookup(_) => ErrorKind::Lookup,
            BridgeError::Encoding { .. } => ErrorKind::Encoding,
            BridgeError::Native(_) => ErrorKind::Native,
        }
    }

    /// Create a native error.
    pub fn native(msg: impl Into<String>) -> Self {
        Self::Native(msg.into())
    }

    /// Create a lookup error.
    pub fn lookup(msg: impl Into<String>) -> Self {
        Self::Lookup(msg.into())
    }

    /// Create a name error.
    pub fn name(msg: impl Into<String>) -> Self {
        Self::Name(msg.into())
    }
}

impl From<EngineError> for BridgeError {
    fn from(err: EngineError) -> Self {
        let msg = err.to_string();
        match err {
            EngineError::ModelLoad(_)
            | EngineError::Config(_)
            | EngineError::UnsupportedPlatform(_)
            | EngineError::AlreadyLoaded(_)
            | EngineError::Io(_)
            | EngineError::Json(_) => BridgeError::Load(msg),
            EngineError::UnknownInput(_)
            | EngineError::UnknownOutput(_)
            | EngineError::DuplicateInput(_)
            | EngineError::DuplicateOutput(_) => BridgeError::Name(msg),
            EngineError::NotLoaded(_)
            | EngineError::TypeMismatch { .. }
            | EngineError::ShapeMismatch { .. }
            | EngineError::InvalidInput(_)
            | EngineError::InferenceFailed(_)
            | EngineError::OutputExtraction(_) => BridgeError::Inference(msg),
            EngineError::Allocation(_) => BridgeError::Native(msg),
        }
    }
}

/// Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;
    use podbridge_engine::ElementType;

    #[test]
    fn test_error_display() {
        let err = BridgeError::Encoding { offset: 3 };
        assert_eq!(err.to_string(), "encoding error: invalid UTF-8 at byte 3");
        assert_eq!(err.kind().host_name(), "EncodingError");
    }

    #[test]
    fn test_engine_error_classification() {
        let cases = [
            (EngineError::ModelLoad("gone".into()), ErrorKind::Load),
            (EngineError::AlreadyLoaded("m".into()), ErrorKind::Load),
            (EngineError::UnknownOutput("z".into()), ErrorKind::Name),
            (EngineError::DuplicateOutput("y".into()), ErrorKind::Name),
            (EngineError::NotLoaded("m".into()), ErrorKind::Inference),
            (
                EngineError::TypeMismatch {
                    name: "x".into(),
                    expected: ElementType::Float,
                    actual: ElementType::Int8,
                },
                ErrorKind::Inference,
            ),
            (EngineError::Allocation("too big".into()), ErrorKind::Native),
        ];
        for (engine, kind) in cases {
            assert_eq!(BridgeError::from(engine).kind(), kind);
        }
    }
}
