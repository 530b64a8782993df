//! Error types for the visual geometry verifier.
//!
//! Image problems (blank, unreadable, nothing detected) are not errors: they
//! produce a zero-confidence [`crate::VisualVerification`]. Only invalid
//! requests and malformed verifier output reach these variants.

/// Errors produced by the vision layer.
#[derive(Debug, thiserror::Error)]
pub enum VisionError {
    #[error("invalid grid spacing: {0} (must be a positive number of pixels)")]
    InvalidGridSpacing(f64),

    #[error("invalid expected answer: {0}")]
    InvalidExpectedAnswer(String),

    #[error("malformed verifier output: {0}")]
    MalformedOutput(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for vision operations.
pub type Result<T> = std::result::Result<T, VisionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vision_error_display() {
        let err = VisionError::InvalidGridSpacing(-2.0);
        assert!(err.to_string().contains("invalid grid spacing"));
        assert!(err.to_string().contains("-2"));

        let err = VisionError::InvalidExpectedAnswer("triangle needs 3 vertices".to_string());
        assert!(err.to_string().contains("triangle needs 3 vertices"));
    }
}
