// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! Error types for the post-processing library.

use std::fmt;

/// Result type alias for post-processing operations.
pub type Result<T> = std::result::Result<T, PostprocessError>;

/// Main error type for the post-processing library.
///
/// Every variant is a programming or data error. The zero-detections case is
/// not an error and is reported through [`PostprocessWarning`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostprocessError {
    /// Input array rank or size violation, or a non-finite value.
    ShapeMismatch(String),
    /// A surviving detection could not be mapped back to its anchor.
    SelectionMismatch(String),
    /// Invalid configuration provided.
    ConfigError(String),
}

impl PostprocessError {
    /// Build a [`PostprocessError::ShapeMismatch`] describing an expected/actual pair.
    #[must_use]
    pub fn shape(what: &str, expected: impl fmt::Display, actual: impl fmt::Display) -> Self {
        Self::ShapeMismatch(format!("{what}: expected {expected}, got {actual}"))
    }
}

impl fmt::Display for PostprocessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShapeMismatch(msg) => write!(f, "Shape mismatch: {msg}"),
            Self::SelectionMismatch(msg) => write!(f, "Selection mismatch: {msg}"),
            Self::ConfigError(msg) => write!(f, "Config error: {msg}"),
        }
    }
}

impl std::error::Error for PostprocessError {}

impl From<ndarray::ShapeError> for PostprocessError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::ShapeMismatch(err.to_string())
    }
}

/// Non-fatal conditions reported alongside a successful pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PostprocessWarning {
    /// No detection survived filtering and suppression; pose assembly was skipped.
    EmptyDetections,
}

impl fmt::Display for PostprocessWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyDetections => write!(f, "no detections survived post-processing"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PostprocessError::ShapeMismatch("test".to_string());
        assert_eq!(err.to_string(), "Shape mismatch: test");

        let err = PostprocessError::SelectionMismatch("test".to_string());
        assert_eq!(err.to_string(), "Selection mismatch: test");
    }

    #[test]
    fn test_shape_helper() {
        let err = PostprocessError::shape("prior boxes rows", 8, 7);
        assert_eq!(
            err.to_string(),
            "Shape mismatch: prior boxes rows: expected 8, got 7"
        );
    }

    #[test]
    fn test_from_ndarray_shape_error() {
        let err: PostprocessError = ndarray::Array2::<f32>::from_shape_vec((2, 2), vec![0.0; 3])
            .unwrap_err()
            .into();
        assert!(matches!(err, PostprocessError::ShapeMismatch(_)));
    }

    #[test]
    fn test_warning_display() {
        assert_eq!(
            PostprocessWarning::EmptyDetections.to_string(),
            "no detections survived post-processing"
        );
    }
}
