//! Error types for Kolosal NAS finalization

use thiserror::Error;

use crate::device::Device;

/// Result type alias for NAS operations
pub type Result<T> = std::result::Result<T, NasError>;

/// Main error type for super-network finalization
#[derive(Error, Debug)]
pub enum NasError {
    #[error("Device invariant violated: expected model on {expected}, found parameter on {actual}")]
    DeviceInvariant { expected: Device, actual: Device },

    #[error("Invalid rank {rank} returned by op '{op}'")]
    InvalidRank { op: String, rank: f64 },

    #[error("No selectable candidate in mixed op: {0}")]
    NoCandidate(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },
}

impl From<ndarray::ShapeError> for NasError {
    fn from(err: ndarray::ShapeError) -> Self {
        NasError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}
