//! Mark-It grading core.
//!
//! Reconciles independent marking-oracle runs into one trusted mark-set,
//! scores confidence from rubric criteria and drawn-shape geometry, and
//! assembles the final [`MarkResult`] with its totals invariant enforced.

pub mod aggregate;
pub mod agreement;
pub mod benchmark;
pub mod confidence;
pub mod config;
pub mod criteria;
pub mod domain;
pub mod ensemble;
pub mod metrics;
pub mod obs;
pub mod oracle;
pub mod pipeline;
pub mod reconcile;
pub mod telemetry;
pub mod visual;

pub use aggregate::{aggregate, final_confidence, overall_confidence, AggregateInput};
pub use agreement::{paper_agreement, AgreementPolicy, TieredAgreement};
pub use benchmark::{benchmark, BenchmarkReport, QuestionScore};
pub use confidence::{clamp01, combine_confidence, embedding_confidence};
pub use config::GradingConfig;
pub use criteria::{score_criteria, CriteriaInput};
pub use domain::{
    ConfidenceBreakdown, Criterion, GradingError, GradingWarning, MarkCandidate, MarkResult,
    OracleError, PartialCredit, QuestionMark, QuestionResult, Result, VisualTaskError,
};
pub use ensemble::{run_ensemble, EnsembleOutcome, EnsembleSettings};
pub use metrics::METRICS;
pub use oracle::{parse_candidate, CommandOracle, MarkingOracle, OracleRequest, ReplayOracle};
pub use pipeline::{Grader, GradingRequest, QuestionContext};
pub use reconcile::{reconcile, QuestionAgreement, Reconciliation};
pub use telemetry::init_tracing;
pub use visual::{
    run_visual_tasks, CommandVerifier, InProcessVerifier, VisualOutcome, VisualSpec, VisualTask,
    VisualVerifier,
};
