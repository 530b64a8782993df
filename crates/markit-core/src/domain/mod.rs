//! Grading domain model: rubric criteria, oracle candidates and graded results.

pub mod candidate;
pub mod criterion;
pub mod error;
pub mod result;

pub use candidate::{CandidateDefect, MarkCandidate, QuestionMark};
pub use criterion::Criterion;
pub use error::{GradingError, OracleError, Result, VisualTaskError};
pub use result::{ConfidenceBreakdown, GradingWarning, MarkResult, PartialCredit, QuestionResult};
