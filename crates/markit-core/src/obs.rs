//! Structured lifecycle events for grading a paper.
//!
//! - `paper_span` scoping every log line to one paper
//! - `emit_*` functions for the paper lifecycle and recoverable degradations
//!
//! Events are emitted at `info!` (degradations at `warn!`) with an `event`
//! field, so JSON logs can be filtered on it.

use tracing::{info, warn};

/// Span tagging everything logged while grading one paper.
///
/// ```ignore
/// grade(request).instrument(paper_span(&request.digest())).await
/// ```
pub fn paper_span(paper: &str) -> tracing::Span {
    tracing::info_span!("markit.paper", paper = %paper)
}

pub fn emit_paper_started(paper: &str, ensemble_size: usize, visual_questions: usize) {
    info!(
        event = "paper.started",
        paper = %paper,
        ensemble_size = ensemble_size,
        visual_questions = visual_questions,
    );
}

/// Emit event: one oracle call failed and its candidate was dropped.
pub fn emit_candidate_dropped(call: usize, error: &dyn std::fmt::Display) {
    warn!(event = "oracle.candidate_dropped", call = call, error = %error);
}

/// Emit event: reported totals replaced by per-question sums.
pub fn emit_totals_corrected(reported: (u32, u32), corrected: (u32, u32)) {
    warn!(
        event = "reconcile.totals_corrected",
        reported_awarded = reported.0,
        reported_available = reported.1,
        corrected_awarded = corrected.0,
        corrected_available = corrected.1,
    );
}

/// Emit event: a question lost its visual analysis.
pub fn emit_visual_degraded(question_number: u32, error: &dyn std::fmt::Display) {
    warn!(event = "visual.degraded", question_number = question_number, error = %error);
}

pub fn emit_paper_finished(
    paper: &str,
    duration_ms: u64,
    candidates: usize,
    overall_confidence: f64,
    warnings: usize,
) {
    info!(
        event = "paper.finished",
        paper = %paper,
        duration_ms = duration_ms,
        candidates = candidates,
        overall_confidence = overall_confidence,
        warnings = warnings,
    );
}

pub fn emit_paper_failed(paper: &str, error: &dyn std::fmt::Display) {
    warn!(event = "paper.failed", paper = %paper, error = %error);
}
