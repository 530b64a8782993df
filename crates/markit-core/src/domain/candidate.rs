//! One marking-oracle invocation's output.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// Marks for a single question as reported by the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionMark {
    pub question_number: u32,
    pub marks_awarded: u32,
    pub total_marks: u32,
    #[serde(default)]
    pub feedback: String,
    #[serde(default)]
    pub reason: String,
    /// The oracle's own confidence. Weak evidence, never used alone.
    #[serde(alias = "confidence", default)]
    pub self_reported_confidence: f64,
}

/// A complete mark-set produced by one oracle call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkCandidate {
    #[serde(default)]
    pub student_name: String,
    pub results: Vec<QuestionMark>,
    pub total_marks_awarded: u32,
    pub total_marks_available: u32,
    #[serde(default)]
    pub general_feedback: String,
}

/// Why a candidate was rejected at the oracle boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CandidateDefect {
    #[error("duplicate question number {0}")]
    DuplicateQuestion(u32),

    #[error("question {question_number} awards {marks_awarded} of {total_marks} marks")]
    AwardExceedsTotal {
        question_number: u32,
        marks_awarded: u32,
        total_marks: u32,
    },

    #[error("question {0} has a non-finite confidence")]
    NonFiniteConfidence(u32),
}

impl MarkCandidate {
    /// The `(awarded, available)` totals pair used to find the ensemble mode.
    pub fn totals(&self) -> (u32, u32) {
        (self.total_marks_awarded, self.total_marks_available)
    }

    pub fn question(&self, number: u32) -> Option<&QuestionMark> {
        self.results.iter().find(|q| q.question_number == number)
    }

    /// Per-question sums `(awarded, available)`.
    pub fn summed_totals(&self) -> (u32, u32) {
        self.results.iter().fold((0u32, 0u32), |(a, t), q| {
            (
                a.saturating_add(q.marks_awarded),
                t.saturating_add(q.total_marks),
            )
        })
    }

    /// Fraction of available marks awarded, if anything was available.
    pub fn percentage(&self) -> Option<f64> {
        (self.total_marks_available > 0)
            .then(|| self.total_marks_awarded as f64 / self.total_marks_available as f64)
    }

    /// Structural checks every candidate must pass before reconciliation.
    pub fn validate(&self) -> Result<(), CandidateDefect> {
        let mut seen = HashSet::new();
        for q in &self.results {
            if !seen.insert(q.question_number) {
                return Err(CandidateDefect::DuplicateQuestion(q.question_number));
            }
            if q.marks_awarded > q.total_marks {
                return Err(CandidateDefect::AwardExceedsTotal {
                    question_number: q.question_number,
                    marks_awarded: q.marks_awarded,
                    total_marks: q.total_marks,
                });
            }
            if !q.self_reported_confidence.is_finite() {
                return Err(CandidateDefect::NonFiniteConfidence(q.question_number));
            }
        }
        Ok(())
    }

    /// Clamp every self-reported confidence into [0, 1].
    pub fn clamp_confidences(&mut self) {
        for q in &mut self.results {
            q.self_reported_confidence = q.self_reported_confidence.clamp(0.0, 1.0);
        }
    }
}
