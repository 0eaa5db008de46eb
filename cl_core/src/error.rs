//! Error types for cl_core operations.
//!
//! A plain enum with no external dependencies so every layer above can wrap it.

use std::fmt;

/// Errors that can occur during cl_core operations.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreError {
    /// A class-only continual-learning mode was configured with the wrong batch size.
    BatchSizeMismatch {
        /// Name of the resolved mode.
        mode: &'static str,
        /// Batch size the mode requires.
        required: usize,
        /// Batch size that was configured or observed.
        got: usize,
    },
    /// A loss term has no coefficient registered for its category.
    MissingCoefficient {
        /// Full loss key, e.g. `bbox_3_dn`.
        key: String,
        /// Coefficient lookup name derived from the key.
        category: String,
    },
    /// Weight adaptation only supports tensors of rank 1 through 5.
    UnsupportedRank {
        /// The offending rank.
        rank: usize,
    },
    /// Old and template tensors disagree on rank.
    RankMismatch {
        /// Rank of the template tensor.
        expected: usize,
        /// Rank of the loaded tensor.
        got: usize,
    },
    /// Value buffer length does not match the product of the shape.
    ShapeMismatch {
        /// Number of values implied by the shape.
        expected: usize,
        /// Number of values provided.
        got: usize,
    },
    /// An index along the leading dimension was out of range.
    IndexOutOfBounds {
        /// Requested index.
        index: usize,
        /// Size of the dimension.
        len: usize,
    },
    /// The evaluator did not report a required metric.
    MissingMetric {
        /// Metric name.
        key: String,
    },
    /// A collaborator (data loader, evaluator) failed.
    Data(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::BatchSizeMismatch {
                mode,
                required,
                got,
            } => write!(
                f,
                "{} mode requires batch size {}, got {}",
                mode, required, got
            ),
            CoreError::MissingCoefficient { key, category } => write!(
                f,
                "no loss coefficient registered for '{}' (loss term '{}')",
                category, key
            ),
            CoreError::UnsupportedRank { rank } => {
                write!(f, "unsupported tensor rank {} for weight adaptation", rank)
            }
            CoreError::RankMismatch { expected, got } => {
                write!(f, "tensor rank mismatch: expected {}, got {}", expected, got)
            }
            CoreError::ShapeMismatch { expected, got } => write!(
                f,
                "shape implies {} values, buffer holds {}",
                expected, got
            ),
            CoreError::IndexOutOfBounds { index, len } => {
                write!(f, "index {} out of bounds for dimension of size {}", index, len)
            }
            CoreError::MissingMetric { key } => write!(f, "metric '{}' not reported", key),
            CoreError::Data(msg) => write!(f, "data error: {}", msg),
        }
    }
}

impl std::error::Error for CoreError {}

/// Result type alias for cl_core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
