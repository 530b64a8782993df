//! Compare graded marks against a reference marking.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::MarkResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionScore {
    pub question_number: u32,
    pub graded: u32,
    pub reference: u32,
    /// 100 for an exact match, 50 when off by one mark, otherwise 0.
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    /// Mean question score in [0, 100]; 0 when no question overlaps.
    pub overall: f64,
    /// Scores for questions present in both markings, in graded order.
    pub questions: Vec<QuestionScore>,
}

pub fn score_question(graded: u32, reference: u32) -> u32 {
    match graded.abs_diff(reference) {
        0 => 100,
        1 => 50,
        _ => 0,
    }
}

pub fn benchmark(graded: &MarkResult, reference: &MarkResult) -> BenchmarkReport {
    let reference_marks: HashMap<u32, u32> = reference
        .results
        .iter()
        .map(|q| (q.question_number, q.marks_awarded))
        .collect();

    let questions: Vec<QuestionScore> = graded
        .results
        .iter()
        .filter_map(|q| {
            let reference = *reference_marks.get(&q.question_number)?;
            Some(QuestionScore {
                question_number: q.question_number,
                graded: q.marks_awarded,
                reference,
                score: score_question(q.marks_awarded, reference),
            })
        })
        .collect();

    let overall = if questions.is_empty() {
        0.0
    } else {
        questions.iter().map(|q| q.score as f64).sum::<f64>() / questions.len() as f64
    };
    BenchmarkReport { overall, questions }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QuestionResult;

    fn marking(marks: &[(u32, u32)]) -> MarkResult {
        MarkResult {
            student_name: String::new(),
            results: marks
                .iter()
                .map(|&(n, a)| QuestionResult {
                    question_number: n,
                    marks_awarded: a,
                    total_marks: 5,
                    feedback: String::new(),
                    reason: String::new(),
                    confidence: 1.0,
                    confidence_breakdown: None,
                    visual_analysis: None,
                })
                .collect(),
            total_marks_awarded: marks.iter().map(|m| m.1).sum(),
            total_marks_available: 5 * marks.len() as u32,
            general_feedback: String::new(),
            overall_confidence: 1.0,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_scores_exact_near_and_far() {
        let graded = marking(&[(1, 3), (2, 2), (3, 0), (9, 1)]);
        let reference = marking(&[(1, 3), (2, 3), (3, 4)]);
        let report = benchmark(&graded, &reference);
        let scores: Vec<u32> = report.questions.iter().map(|q| q.score).collect();
        assert_eq!(scores, vec![100, 50, 0]);
        assert!((report.overall - 50.0).abs() < 1e-12);
    }

    #[test]
    fn test_no_overlap_scores_zero() {
        let report = benchmark(&marking(&[(1, 3)]), &marking(&[(2, 3)]));
        assert!(report.questions.is_empty());
        assert_eq!(report.overall, 0.0);
    }
}
