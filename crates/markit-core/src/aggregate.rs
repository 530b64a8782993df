//! Confidence fusion and final result assembly.

use std::collections::BTreeMap;

use markit_vision::VisualVerification;

use crate::confidence::{clamp01, combine_confidence};
use crate::domain::{ConfidenceBreakdown, GradingWarning, MarkResult, QuestionResult};
use crate::metrics::METRICS;
use crate::obs;
use crate::reconcile::Reconciliation;

/// Everything the aggregator fuses for one paper.
#[derive(Debug, Clone)]
pub struct AggregateInput {
    pub reconciliation: Reconciliation,
    pub criteria: BTreeMap<u32, ConfidenceBreakdown>,
    pub visual: BTreeMap<u32, VisualVerification>,
    /// Paper-level agreement across the ensemble, when computable.
    pub paper_agreement: Option<f64>,
    pub prefer_ensemble_agreement: bool,
    /// Warnings collected upstream (dropped candidates, failed visual tasks).
    pub warnings: Vec<GradingWarning>,
}

/// Fuse one question's signals.
///
/// A visual analysis, when present, is averaged with the base confidence.
/// Otherwise criteria confidence is averaged in when available, and the base
/// confidence stands alone when neither exists.
pub fn final_confidence(base: f64, criteria: Option<f64>, visual: Option<f64>) -> f64 {
    match (visual, criteria) {
        (Some(v), _) => combine_confidence(&[base, v], None),
        (None, Some(c)) => combine_confidence(&[base, c], None),
        (None, None) => clamp01(base),
    }
}

/// Paper confidence: a positive ensemble agreement score takes precedence
/// when preferred; otherwise the mean of the question confidences.
pub fn overall_confidence(
    question_confidences: &[f64],
    paper_agreement: Option<f64>,
    prefer_ensemble_agreement: bool,
) -> f64 {
    match paper_agreement {
        Some(a) if prefer_ensemble_agreement && a > 0.0 => clamp01(a),
        _ => combine_confidence(question_confidences, None),
    }
}

/// Build the final [`MarkResult`], re-checking the totals invariant.
pub fn aggregate(input: AggregateInput) -> MarkResult {
    let AggregateInput {
        reconciliation,
        mut criteria,
        mut visual,
        paper_agreement,
        prefer_ensemble_agreement,
        mut warnings,
    } = input;
    warnings.extend(reconciliation.warnings.iter().cloned());

    let canonical = reconciliation.canonical;
    let agreement = reconciliation.agreement;

    let results: Vec<QuestionResult> = canonical
        .results
        .into_iter()
        .map(|q| {
            let base = agreement
                .iter()
                .find(|a| a.question_number == q.question_number)
                .map_or(0.0, |a| a.base_confidence);
            let breakdown = criteria.remove(&q.question_number);
            let analysis = visual.remove(&q.question_number);
            let confidence = final_confidence(
                base,
                breakdown.as_ref().map(|b| b.confidence_score),
                analysis.as_ref().map(|v| v.confidence),
            );
            QuestionResult {
                question_number: q.question_number,
                marks_awarded: q.marks_awarded,
                total_marks: q.total_marks,
                feedback: q.feedback,
                reason: q.reason,
                confidence,
                confidence_breakdown: breakdown,
                visual_analysis: analysis,
            }
        })
        .collect();

    let confidences: Vec<f64> = results.iter().map(|r| r.confidence).collect();
    let mut result = MarkResult {
        student_name: canonical.student_name,
        results,
        total_marks_awarded: canonical.total_marks_awarded,
        total_marks_available: canonical.total_marks_available,
        general_feedback: canonical.general_feedback,
        overall_confidence: overall_confidence(
            &confidences,
            paper_agreement,
            prefer_ensemble_agreement,
        ),
        warnings,
    };
    enforce_totals(&mut result);
    result
}

/// Make the reported totals equal the per-question sums, recording any fix.
pub fn enforce_totals(result: &mut MarkResult) {
    if result.totals_consistent() {
        return;
    }
    let (awarded, available) = result.summed_totals();
    obs::emit_totals_corrected(
        (result.total_marks_awarded, result.total_marks_available),
        (awarded, available),
    );
    METRICS.inc_totals_corrections();
    result.warnings.push(GradingWarning::TotalsMismatch {
        reported_awarded: result.total_marks_awarded,
        reported_available: result.total_marks_available,
        corrected_awarded: awarded,
        corrected_available: available,
    });
    result.total_marks_awarded = awarded;
    result.total_marks_available = available;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agreement::TieredAgreement;
    use crate::domain::{MarkCandidate, QuestionMark};
    use crate::reconcile::reconcile;

    fn paper(marks: &[(u32, u32, u32, f64)]) -> MarkCandidate {
        let results: Vec<QuestionMark> = marks
            .iter()
            .map(|&(n, a, t, c)| QuestionMark {
                question_number: n,
                marks_awarded: a,
                total_marks: t,
                feedback: String::new(),
                reason: String::new(),
                self_reported_confidence: c,
            })
            .collect();
        let (a, t) = results
            .iter()
            .fold((0, 0), |(a, t), q| (a + q.marks_awarded, t + q.total_marks));
        MarkCandidate {
            student_name: "Ada".to_string(),
            results,
            total_marks_awarded: a,
            total_marks_available: t,
            general_feedback: "ok".to_string(),
        }
    }

    fn input(candidates: &[MarkCandidate]) -> AggregateInput {
        AggregateInput {
            reconciliation: reconcile(candidates, &TieredAgreement::default()).unwrap(),
            criteria: BTreeMap::new(),
            visual: BTreeMap::new(),
            paper_agreement: None,
            prefer_ensemble_agreement: true,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_final_confidence_rules() {
        assert_eq!(final_confidence(0.6, None, None), 0.6);
        assert!((final_confidence(0.6, Some(0.8), None) - 0.7).abs() < 1e-12);
        assert!((final_confidence(0.6, Some(0.8), Some(0.0)) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_overall_prefers_positive_agreement() {
        assert_eq!(overall_confidence(&[0.2, 0.4], Some(0.9), true), 0.9);
        assert!((overall_confidence(&[0.2, 0.4], Some(0.0), true) - 0.3).abs() < 1e-12);
        assert!((overall_confidence(&[0.2, 0.4], Some(0.9), false) - 0.3).abs() < 1e-12);
        assert_eq!(overall_confidence(&[], None, true), 0.0);
    }

    #[test]
    fn test_visual_analysis_is_averaged_in() {
        let mut inp = input(&[paper(&[(1, 2, 2, 0.8), (2, 1, 3, 0.6)])]);
        let mut analysis = VisualVerification::no_shape();
        analysis.confidence = 1.0;
        inp.visual.insert(2, analysis);
        let result = aggregate(inp);
        assert_eq!(result.question(1).unwrap().confidence, 0.8);
        assert!((result.question(2).unwrap().confidence - 0.8).abs() < 1e-12);
        assert!(result.question(2).unwrap().visual_analysis.is_some());
        assert!((result.overall_confidence - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_totals_are_enforced() {
        let mut result = aggregate(input(&[paper(&[(1, 2, 2, 0.8)])]));
        result.total_marks_awarded = 7;
        enforce_totals(&mut result);
        assert!(result.totals_consistent());
        assert!(matches!(
            result.warnings.last(),
            Some(GradingWarning::TotalsMismatch { reported_awarded: 7, corrected_awarded: 2, .. })
        ));
    }

    #[test]
    fn test_reconciliation_warnings_are_carried() {
        let mut p = paper(&[(1, 3, 4, 0.9), (2, 5, 6, 0.9)]);
        p.total_marks_awarded = 10;
        let result = aggregate(input(&[p]));
        assert_eq!(result.total_marks_awarded, 8);
        assert_eq!(result.warnings.len(), 1);
    }
}
