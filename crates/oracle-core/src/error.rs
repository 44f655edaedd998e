//! Error types for Oracle Core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Weights not found: {0}")]
    WeightsNotFound(String),

    #[error("No weight bundle loaded")]
    WeightsNotLoaded,

    #[error("Corrupt weights: {0}")]
    CorruptWeights(String),

    #[error("Shape mismatch in {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: String,
        expected: usize,
        actual: usize,
    },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OracleError {
    /// Errors the caller can only fix by changing the request
    pub fn is_input_error(&self) -> bool {
        matches!(self, OracleError::InvalidInput(_))
    }

    /// Errors that make every inference impossible until the weights are fixed
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            OracleError::WeightsNotFound(_)
                | OracleError::WeightsNotLoaded
                | OracleError::CorruptWeights(_)
                | OracleError::ShapeMismatch { .. }
        )
    }

    pub(crate) fn shape(what: impl Into<String>, expected: usize, actual: usize) -> Self {
        OracleError::ShapeMismatch {
            what: what.into(),
            expected,
            actual,
        }
    }
}

pub type OracleResult<T> = Result<T, OracleError>;
