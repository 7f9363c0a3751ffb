//! Error types for density-matrix estimation and measurement.
//!
//! This module defines the errors raised while accumulating, normalizing,
//! decomposing and measuring density matrices.

use thiserror::Error;

/// Result type alias for qmeasure operations.
pub type Result<T> = std::result::Result<T, QMeasureError>;

/// Errors that can occur in the density-matrix models.
#[derive(Error, Debug, Clone)]
pub enum QMeasureError {
    /// Dimension mismatch between vectors or matrices.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension encountered.
        actual: usize,
    },

    /// Shape mismatch between multi-dimensional arrays.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Actual shape.
        actual: Vec<usize>,
    },

    /// Invalid parameter value provided.
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// Reason why the parameter is invalid.
        reason: String,
    },

    /// Normalization was requested before any sample was accumulated.
    #[error("Cannot normalize density matrix: no samples were accumulated")]
    NoSamples,

    /// The estimator was already normalized for the current training run.
    #[error("Density matrix already finalized; call reset() before a new training run")]
    AlreadyFinalized,

    /// A class label outside `0..num_classes`.
    #[error("Invalid label {label}: expected a class index below {num_classes}")]
    InvalidLabel {
        /// The offending label value.
        label: f64,
        /// Number of classes configured.
        num_classes: usize,
    },

    /// Eigen-decomposition did not converge.
    #[error("Eigen-decomposition failed: {0}")]
    DecompositionFailed(String),

    /// Model configuration could not be converted.
    #[error("Config error: {0}")]
    ConfigError(String),

    /// Numerical computation error (overflow, underflow, NaN).
    #[error("Numerical error: {0}")]
    NumericalError(String),
}

impl QMeasureError {
    /// Create a dimension mismatch error.
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }

    /// Create a shape mismatch error.
    pub fn shape_mismatch(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Create an invalid parameter error.
    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a numerical error.
    pub fn numerical(msg: impl Into<String>) -> Self {
        Self::NumericalError(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QMeasureError::dimension_mismatch(16, 8);
        assert!(err.to_string().contains("16"));
        assert!(err.to_string().contains("8"));

        let err = QMeasureError::shape_mismatch(&[4, 4], &[4, 3]);
        assert!(err.to_string().contains("[4, 3]"));

        let err = QMeasureError::invalid_parameter("gamma", "must be positive");
        assert!(err.to_string().contains("gamma"));
        assert!(err.to_string().contains("positive"));

        let err = QMeasureError::InvalidLabel {
            label: 3.0,
            num_classes: 2,
        };
        assert!(err.to_string().contains('3'));
    }

    #[test]
    fn test_error_clone() {
        let err = QMeasureError::numerical("trace is NaN");
        let cloned = err.clone();
        assert_eq!(err.to_string(), cloned.to_string());
        assert!(QMeasureError::NoSamples.to_string().contains("no samples"));
    }
}
