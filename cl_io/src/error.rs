//! Error types for cl_io operations.

use core::fmt;

use cl_core::CoreError;

/// Errors that can occur while reading or writing run artifacts.
#[derive(Debug, Clone, PartialEq)]
pub enum ClIoError {
    /// Malformed checkpoint data.
    InvalidFormat {
        /// Description of the format error.
        message: &'static str,
    },
    /// Checkpoint written by an unknown format version.
    UnsupportedVersion {
        /// Version found in the header.
        got: u16,
    },
    /// I/O error during serialization/deserialization.
    Io(String),
    /// JSON encoding or decoding failed.
    Json(String),
    /// Decoded data violated a core invariant.
    Core(CoreError),
}

impl fmt::Display for ClIoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClIoError::InvalidFormat { message } => {
                write!(f, "invalid checkpoint format: {}", message)
            }
            ClIoError::UnsupportedVersion { got } => {
                write!(f, "unsupported checkpoint version {}", got)
            }
            ClIoError::Io(msg) => write!(f, "I/O error: {}", msg),
            ClIoError::Json(msg) => write!(f, "JSON error: {}", msg),
            ClIoError::Core(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for ClIoError {}

impl From<std::io::Error> for ClIoError {
    fn from(err: std::io::Error) -> Self {
        ClIoError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ClIoError {
    fn from(err: serde_json::Error) -> Self {
        ClIoError::Json(err.to_string())
    }
}

impl From<CoreError> for ClIoError {
    fn from(err: CoreError) -> Self {
        ClIoError::Core(err)
    }
}

/// Result type alias for cl_io operations.
pub type Result<T> = core::result::Result<T, ClIoError>;
