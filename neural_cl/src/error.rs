//! Error types for neural_cl.

use thiserror::Error;

/// Errors raised while training, evaluating or checkpointing.
#[derive(Error, Debug)]
pub enum NeuralClError {
    /// Bookkeeping failure (mode selection, coefficients, adaptation).
    #[error(transparent)]
    Core(#[from] cl_core::CoreError),

    /// Checkpoint or run-artifact I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] cl_io::ClIoError),

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration error.
        message: String,
    },

    /// Module or optimizer record could not be encoded or decoded.
    #[error("record error: {0}")]
    Record(String),

    /// Tensor data could not be read back to the host.
    #[error("tensor readback failed: {0}")]
    Tensor(String),

    /// A collaborator returned inconsistent data.
    #[error("invalid data: {0}")]
    Data(String),
}

impl NeuralClError {
    /// Shorthand for [`NeuralClError::InvalidConfig`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for NeuralClError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(cl_io::ClIoError::from(err))
    }
}

/// Result type for neural_cl operations.
pub type Result<T> = std::result::Result<T, NeuralClError>;
