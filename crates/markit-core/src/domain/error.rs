//! Error taxonomy for grading.
//!
//! Only ensemble exhaustion and invalid requests abort a paper. Everything
//! else that can go wrong is recorded as a [`crate::GradingWarning`] on the
//! returned result.

use std::time::Duration;

/// Failures of a single marking-oracle call. Each one drops that candidate.
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("oracle timed out after {0:?}")]
    Timeout(Duration),

    #[error("oracle returned malformed output: {0}")]
    MalformedOutput(String),

    #[error("oracle failed: {0}")]
    Failed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of a single visual verification task. Each one leaves that
/// question without a visual analysis.
#[derive(Debug, thiserror::Error)]
pub enum VisualTaskError {
    #[error("visual verification timed out after {0:?}")]
    Timeout(Duration),

    #[error("visual verifier returned malformed output: {0}")]
    MalformedOutput(String),

    #[error("visual verification failed: {0}")]
    Failed(String),

    #[error("vision error: {0}")]
    Vision(#[from] markit_vision::VisionError),
}

/// Paper-level grading errors.
#[derive(Debug, thiserror::Error)]
pub enum GradingError {
    #[error("no marking candidates available: {attempted} oracle call(s) all failed")]
    NoCandidatesAvailable { attempted: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid grading request: {0}")]
    InvalidRequest(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for grading operations.
pub type Result<T> = std::result::Result<T, GradingError>;
