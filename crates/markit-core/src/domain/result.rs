//! The graded paper handed to review and export consumers.
//!
//! Field names are part of the export contract; keep them stable.

use markit_vision::VisualVerification;
use serde::{Deserialize, Serialize};

/// Criteria-match outcome for one criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialCredit {
    pub criterion: String,
    pub matched: bool,
    pub partial_score: f64,
    pub explanation: String,
}

/// Objective, criteria-derived confidence for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    pub criteria_matched: usize,
    pub total_criteria: usize,
    pub confidence_score: f64,
    pub reasoning: String,
    pub partial_credit_details: Vec<PartialCredit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub question_number: u32,
    pub marks_awarded: u32,
    pub total_marks: u32,
    pub feedback: String,
    pub reason: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_breakdown: Option<ConfidenceBreakdown>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_analysis: Option<VisualVerification>,
}

/// A recoverable problem encountered while grading, kept on the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GradingWarning {
    /// Reported totals disagreed with the per-question sums and were replaced.
    TotalsMismatch {
        reported_awarded: u32,
        reported_available: u32,
        corrected_awarded: u32,
        corrected_available: u32,
    },
    /// An oracle call failed and its candidate left the ensemble.
    OracleDropped { call: usize, reason: String },
    /// Visual verification failed; the question keeps its text-only confidence.
    VisualAnalysisUnavailable { question_number: u32, reason: String },
}

/// Final reconciled marks for one paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkResult {
    pub student_name: String,
    pub results: Vec<QuestionResult>,
    pub total_marks_awarded: u32,
    pub total_marks_available: u32,
    pub general_feedback: String,
    pub overall_confidence: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<GradingWarning>,
}

impl MarkResult {
    /// Per-question sums `(awarded, available)`.
    pub fn summed_totals(&self) -> (u32, u32) {
        self.results.iter().fold((0u32, 0u32), |(a, t), q| {
            (
                a.saturating_add(q.marks_awarded),
                t.saturating_add(q.total_marks),
            )
        })
    }

    /// Whether the reported totals equal the per-question sums.
    pub fn totals_consistent(&self) -> bool {
        self.summed_totals() == (self.total_marks_awarded, self.total_marks_available)
    }

    pub fn question(&self, number: u32) -> Option<&QuestionResult> {
        self.results.iter().find(|q| q.question_number == number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_serializes_with_kind_tag() {
        let w = GradingWarning::TotalsMismatch {
            reported_awarded: 10,
            reported_available: 12,
            corrected_awarded: 8,
            corrected_available: 12,
        };
        let json = serde_json::to_value(&w).unwrap();
        assert_eq!(json["kind"], "totals_mismatch");
        assert_eq!(json["corrected_awarded"], 8);
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let q = QuestionResult {
            question_number: 1,
            marks_awarded: 1,
            total_marks: 2,
            feedback: String::new(),
            reason: String::new(),
            confidence: 0.5,
            confidence_breakdown: None,
            visual_analysis: None,
        };
        let json = serde_json::to_value(&q).unwrap();
        assert!(json.get("confidence_breakdown").is_none());
        assert!(json.get("visual_analysis").is_none());
    }
}
