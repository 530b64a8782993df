//! Ensemble reconciliation.
//!
//! Independent oracle runs for the same paper are merged into one canonical
//! mark-set. The canonical run is the first one whose reported totals equal
//! the most common totals pair; every question then gets a trust multiplier
//! from how much the runs disagreed on it.

use serde::{Deserialize, Serialize};

use crate::agreement::{distinct_values, AgreementPolicy};
use crate::confidence::clamp01;
use crate::domain::{GradingError, GradingWarning, MarkCandidate, Result};
use crate::metrics::METRICS;
use crate::obs;

/// Agreement observed for one question of the canonical candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionAgreement {
    pub question_number: u32,
    /// Marks awarded by each run that graded this question, in run order.
    pub observed_marks: Vec<u32>,
    pub distinct_marks: usize,
    pub multiplier: f64,
    /// `multiplier × mean(self-reported confidence)`, clamped to [0, 1].
    pub base_confidence: f64,
}

/// The merged ensemble.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// Canonical candidate with totals recomputed from its questions.
    pub canonical: MarkCandidate,
    /// Position of the canonical candidate in the input.
    pub canonical_index: usize,
    /// One entry per canonical question, in canonical order.
    pub agreement: Vec<QuestionAgreement>,
    pub warnings: Vec<GradingWarning>,
}

impl Reconciliation {
    pub fn agreement_for(&self, question_number: u32) -> Option<&QuestionAgreement> {
        self.agreement
            .iter()
            .find(|a| a.question_number == question_number)
    }
}

/// Merge `candidates` into one canonical mark-set.
///
/// Fails only when `candidates` is empty.
pub fn reconcile(
    candidates: &[MarkCandidate],
    policy: &dyn AgreementPolicy,
) -> Result<Reconciliation> {
    let canonical_index = mode_index(candidates)
        .ok_or(GradingError::NoCandidatesAvailable { attempted: 0 })?;
    let mut canonical = candidates[canonical_index].clone();

    let agreement = canonical
        .results
        .iter()
        .map(|q| {
            let peers: Vec<_> = candidates
                .iter()
                .filter_map(|c| c.question(q.question_number))
                .collect();
            let observed_marks: Vec<u32> = peers.iter().map(|p| p.marks_awarded).collect();
            let multiplier = policy.multiplier(&observed_marks);
            let mean_confidence = peers
                .iter()
                .map(|p| p.self_reported_confidence)
                .sum::<f64>()
                / peers.len().max(1) as f64;
            QuestionAgreement {
                question_number: q.question_number,
                distinct_marks: distinct_values(&observed_marks),
                observed_marks,
                multiplier,
                base_confidence: clamp01(multiplier * mean_confidence),
            }
        })
        .collect();

    let mut warnings = Vec::new();
    if let Some(w) = correct_totals(&mut canonical) {
        warnings.push(w);
    }

    Ok(Reconciliation {
        canonical,
        canonical_index,
        agreement,
        warnings,
    })
}

/// Index of the first candidate carrying the most frequent totals pair.
/// Ties between pairs go to the pair that occurs first.
fn mode_index(candidates: &[MarkCandidate]) -> Option<usize> {
    // (pair, count, first index) in first-occurrence order.
    let mut tally: Vec<((u32, u32), usize, usize)> = Vec::new();
    for (i, c) in candidates.iter().enumerate() {
        let pair = c.totals();
        match tally.iter_mut().find(|(p, _, _)| *p == pair) {
            Some(entry) => entry.1 += 1,
            None => tally.push((pair, 1, i)),
        }
    }
    let mut best: Option<&((u32, u32), usize, usize)> = None;
    for entry in &tally {
        if best.map_or(true, |b| entry.1 > b.1) {
            best = Some(entry);
        }
    }
    best.map(|(_, _, first)| *first)
}

/// Replace reported totals with the per-question sums when they disagree.
pub fn correct_totals(candidate: &mut MarkCandidate) -> Option<GradingWarning> {
    let (awarded, available) = candidate.summed_totals();
    if (awarded, available) == candidate.totals() {
        return None;
    }
    let warning = GradingWarning::TotalsMismatch {
        reported_awarded: candidate.total_marks_awarded,
        reported_available: candidate.total_marks_available,
        corrected_awarded: awarded,
        corrected_available: available,
    };
    obs::emit_totals_corrected(candidate.totals(), (awarded, available));
    METRICS.inc_totals_corrections();
    candidate.total_marks_awarded = awarded;
    candidate.total_marks_available = available;
    Some(warning)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agreement::TieredAgreement;
    use crate::domain::QuestionMark;

    fn q(n: u32, awarded: u32, total: u32, conf: f64) -> QuestionMark {
        QuestionMark {
            question_number: n,
            marks_awarded: awarded,
            total_marks: total,
            feedback: format!("feedback {n}"),
            reason: String::new(),
            self_reported_confidence: conf,
        }
    }

    fn run(name: &str, results: Vec<QuestionMark>) -> MarkCandidate {
        let (a, t) = results
            .iter()
            .fold((0, 0), |(a, t), q| (a + q.marks_awarded, t + q.total_marks));
        MarkCandidate {
            student_name: name.to_string(),
            results,
            total_marks_awarded: a,
            total_marks_available: t,
            general_feedback: String::new(),
        }
    }

    #[test]
    fn test_empty_ensemble_is_fatal() {
        let err = reconcile(&[], &TieredAgreement::default()).unwrap_err();
        assert!(matches!(err, GradingError::NoCandidatesAvailable { .. }));
    }

    #[test]
    fn test_single_candidate_is_canonical() {
        let only = run("a", vec![q(1, 2, 4, 0.8)]);
        let r = reconcile(std::slice::from_ref(&only), &TieredAgreement::default()).unwrap();
        assert_eq!(r.canonical_index, 0);
        assert_eq!(r.canonical, only);
        assert_eq!(r.agreement[0].multiplier, 1.0);
        assert!((r.agreement[0].base_confidence - 0.8).abs() < 1e-12);
        assert!(r.warnings.is_empty());
    }

    #[test]
    fn test_mode_selects_canonical() {
        let runs = vec![
            run("a", vec![q(1, 3, 4, 0.9)]),
            run("b", vec![q(1, 2, 4, 0.9)]),
            run("c", vec![q(1, 2, 4, 0.9)]),
        ];
        let r = reconcile(&runs, &TieredAgreement::default()).unwrap();
        assert_eq!(r.canonical_index, 1);
        assert_eq!(r.canonical.student_name, "b");
    }

    #[test]
    fn test_mode_tie_goes_to_earliest() {
        let runs = vec![
            run("a", vec![q(1, 1, 4, 0.9)]),
            run("b", vec![q(1, 3, 4, 0.9)]),
            run("c", vec![q(1, 3, 4, 0.9)]),
            run("d", vec![q(1, 1, 4, 0.9)]),
        ];
        let r = reconcile(&runs, &TieredAgreement::default()).unwrap();
        assert_eq!(r.canonical_index, 0);
    }

    #[test]
    fn test_disagreement_scales_confidence() {
        let runs = vec![
            run("a", vec![q(5, 2, 4, 0.9)]),
            run("b", vec![q(5, 2, 4, 0.95)]),
            run("c", vec![q(5, 3, 4, 0.8)]),
        ];
        let r = reconcile(&runs, &TieredAgreement::default()).unwrap();
        let a = r.agreement_for(5).unwrap();
        assert_eq!(a.distinct_marks, 2);
        assert_eq!(a.observed_marks, vec![2, 2, 3]);
        let expected = 0.7 * (0.9 + 0.95 + 0.8) / 3.0;
        assert!((a.base_confidence - expected).abs() < 1e-12);
    }

    #[test]
    fn test_reported_totals_are_corrected() {
        let mut paper = run("a", vec![q(1, 3, 4, 0.9), q(2, 5, 6, 0.9)]);
        paper.total_marks_awarded = 10;
        let r = reconcile(&[paper], &TieredAgreement::default()).unwrap();
        assert_eq!(r.canonical.total_marks_awarded, 8);
        assert_eq!(r.canonical.total_marks_available, 10);
        assert_eq!(
            r.warnings,
            vec![GradingWarning::TotalsMismatch {
                reported_awarded: 10,
                reported_available: 10,
                corrected_awarded: 8,
                corrected_available: 10,
            }]
        );
    }

    #[test]
    fn test_questions_missing_from_some_runs() {
        let runs = vec![
            run("a", vec![q(1, 2, 2, 1.0), q(2, 1, 2, 0.6)]),
            run("b", vec![q(1, 2, 2, 0.8)]),
        ];
        let r = reconcile(&runs, &TieredAgreement::default()).unwrap();
        let q2 = r.agreement_for(2).unwrap();
        assert_eq!(q2.observed_marks, vec![1]);
        assert!((q2.base_confidence - 0.6).abs() < 1e-12);
    }
}
