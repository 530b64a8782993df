//! Confidence arithmetic shared by the scorers and the aggregator.

use crate::criteria::tokens;

const SIMILARITY_WEIGHT: f64 = 0.5;
const LENGTH_WEIGHT: f64 = 0.2;
const OVERLAP_WEIGHT: f64 = 0.3;

/// Clamp into [0, 1]; NaN becomes 0.
pub fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Weighted mean of `scores`, clamped to [0, 1].
///
/// Weights are normalised to sum to one; `None` (or weights that do not line
/// up with the scores, or sum to zero) means equal weighting. An empty input
/// scores 0.
pub fn combine_confidence(scores: &[f64], weights: Option<&[f64]>) -> f64 {
    if scores.is_empty() {
        return 0.0;
    }
    let weights = weights
        .filter(|w| w.len() == scores.len())
        .filter(|w| w.iter().all(|x| x.is_finite() && *x >= 0.0))
        .filter(|w| w.iter().sum::<f64>() > 0.0);
    let combined = match weights {
        Some(w) => {
            let total: f64 = w.iter().sum();
            scores.iter().zip(w).map(|(s, w)| s * w).sum::<f64>() / total
        }
        None => scores.iter().sum::<f64>() / scores.len() as f64,
    };
    clamp01(combined)
}

/// Confidence for a free-text answer compared against a model answer.
///
/// `similarity` is an externally computed semantic similarity in [0, 1]. It
/// is blended with the ratio of the two answers' word counts and the share of
/// the model answer's tokens that the student used.
pub fn embedding_confidence(student_answer: &str, expected_answer: &str, similarity: f64) -> f64 {
    let student_words = student_answer.split_whitespace().count();
    let expected_words = expected_answer.split_whitespace().count();
    let length_ratio = if student_words == 0 || expected_words == 0 {
        0.0
    } else {
        student_words.min(expected_words) as f64 / student_words.max(expected_words) as f64
    };

    let expected = tokens(expected_answer);
    let overlap = if expected.is_empty() {
        0.0
    } else {
        let student = tokens(student_answer);
        expected.intersection(&student).count() as f64 / expected.len() as f64
    };

    clamp01(
        SIMILARITY_WEIGHT * clamp01(similarity)
            + LENGTH_WEIGHT * length_ratio
            + OVERLAP_WEIGHT * overlap,
    )
}
