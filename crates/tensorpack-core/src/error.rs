//! Error types for container encode/decode operations.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::types::DType;

/// Result type alias for tensorpack operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Container codec error types.
///
/// No error is recovered from internally: any failure while decoding rejects
/// the whole container.
#[derive(Debug, Error)]
pub enum Error {
    /// Buffer is shorter than the 8-byte header length prefix.
    #[error("invalid header size: need at least 8 bytes, got {len}")]
    InvalidHeaderSize { len: usize },

    /// Declared header length exceeds the available buffer.
    #[error("invalid header data: header declares {declared} bytes, only {available} available")]
    InvalidHeaderData { declared: u64, available: usize },

    /// Header JSON is malformed or has the wrong shape.
    #[error("malformed header: {message}")]
    MalformedHeader {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// A metadata-shaped value appeared under a key other than `__metadata__`.
    #[error("metadata found under key '{0}', only '__metadata__' may hold metadata")]
    MisplacedMetadata(String),

    /// An offset range is not a `[start, end]` pair with `start <= end`.
    #[error("malformed offset range: {0}")]
    MalformedRange(String),

    /// Tensor byte ranges do not tile the data segment exactly.
    #[error("incomplete buffer: {0}")]
    IncompleteBuffer(String),

    /// Requested tensor is not present.
    #[error("missing tensor '{0}'")]
    MissingTensor(String),

    /// Dtype tag has no known width. Raised by typed access and encoding,
    /// never by decode.
    #[error("unsupported data type '{0}'")]
    UnsupportedDataType(String),

    /// Caller asked for a scalar type that differs from the stored dtype.
    #[error("data type mismatch: requested {expected}, tensor holds {actual}")]
    DataTypeMismatch { expected: DType, actual: DType },

    /// Adapter bytes disagree with `shape * dtype width`.
    #[error("tensor '{name}' has {actual} bytes, shape and dtype require {expected}")]
    TensorSizeMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// The same tensor name was supplied twice.
    #[error("duplicate tensor name '{0}'")]
    DuplicateTensor(String),

    /// A tensor was given the reserved metadata key as its name.
    #[error("'__metadata__' is reserved and cannot name a tensor")]
    ReservedName,

    /// Shard index document is malformed.
    #[error("malformed index: {0}")]
    MalformedIndex(String),

    /// Filesystem failure.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Path exists but is not a regular file.
    #[error("not a regular file: {}", .0.display())]
    NotAFile(PathBuf),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Create a malformed header error without an underlying JSON error.
    pub fn malformed_header(message: impl Into<String>) -> Self {
        Error::MalformedHeader {
            message: message.into(),
            source: None,
        }
    }

    /// Create a malformed header error wrapping a JSON error.
    pub fn json(context: &str, source: serde_json::Error) -> Self {
        Error::MalformedHeader {
            message: format!("{context}: {source}"),
            source: Some(source),
        }
    }

    /// Create an incomplete buffer error.
    pub fn incomplete(message: impl Into<String>) -> Self {
        Error::IncompleteBuffer(message.into())
    }

    /// Create an I/O error bound to a path.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Returns true for errors caused by the content of a buffer rather
    /// than the environment or the caller.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidHeaderSize { .. }
                | Error::InvalidHeaderData { .. }
                | Error::MalformedHeader { .. }
                | Error::MisplacedMetadata(_)
                | Error::MalformedRange(_)
                | Error::IncompleteBuffer(_)
                | Error::UnsupportedDataType(_)
                | Error::MalformedIndex(_)
        )
    }

    /// Get error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Error::InvalidHeaderSize { .. } => "invalid_header_size",
            Error::InvalidHeaderData { .. } => "invalid_header_data",
            Error::MalformedHeader { .. } => "malformed_header",
            Error::MisplacedMetadata(_) => "misplaced_metadata",
            Error::MalformedRange(_) => "malformed_range",
            Error::IncompleteBuffer(_) => "incomplete_buffer",
            Error::MissingTensor(_) => "missing_tensor",
            Error::UnsupportedDataType(_) => "unsupported_data_type",
            Error::DataTypeMismatch { .. } => "data_type_mismatch",
            Error::TensorSizeMismatch { .. } => "tensor_size_mismatch",
            Error::DuplicateTensor(_) => "duplicate_tensor",
            Error::ReservedName => "reserved_name",
            Error::MalformedIndex(_) => "malformed_index",
            Error::Io { .. } => "io_error",
            Error::NotAFile(_) => "not_a_file",
            Error::Config(_) => "config",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidHeaderSize { len: 3 };
        assert_eq!(
            err.to_string(),
            "invalid header size: need at least 8 bytes, got 3"
        );

        let err = Error::MissingTensor("layer.0.weight".into());
        assert!(err.to_string().contains("layer.0.weight"));

        let err = Error::DataTypeMismatch {
            expected: DType::F32,
            actual: DType::I32,
        };
        assert_eq!(
            err.to_string(),
            "data type mismatch: requested F32, tensor holds I32"
        );
    }

    #[test]
    fn test_error_category() {
        assert_eq!(Error::incomplete("gap").category(), "incomplete_buffer");
        assert_eq!(Error::ReservedName.category(), "reserved_name");
        assert_eq!(
            Error::io("/nope", std::io::Error::other("boom")).category(),
            "io_error"
        );
    }

    #[test]
    fn test_is_format_error() {
        assert!(Error::incomplete("gap").is_format_error());
        assert!(Error::malformed_header("bad").is_format_error());
        assert!(!Error::MissingTensor("x".into()).is_format_error());
        assert!(!Error::NotAFile(PathBuf::from("/tmp")).is_format_error());
    }

    #[test]
    fn test_io_error_source() {
        use std::error::Error as _;

        let err = Error::io("model.safetensors", std::io::Error::other("denied"));
        assert!(err.source().is_some());
        assert!(err.to_string().contains("model.safetensors"));
    }
}
