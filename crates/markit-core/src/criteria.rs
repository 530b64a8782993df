//! Criteria-based confidence.
//!
//! Confidence here comes from explicit rubric evidence: how many criteria
//! the answer demonstrably meets, how the awarded marks compare with the
//! available ones, and whether the oracle's feedback cites scheme terms.
//! The oracle's self-reported confidence plays no part.

use std::collections::HashSet;

use crate::confidence::clamp01;
use crate::domain::{ConfidenceBreakdown, Criterion, PartialCredit};

const CRITERIA_WEIGHT: f64 = 0.5;
const MARKS_WEIGHT: f64 = 0.3;
const FEEDBACK_WEIGHT: f64 = 0.2;

/// Overlap at or above which a criterion counts as matched.
pub const MATCH_THRESHOLD: f64 = 0.8;
/// Overlap at or above which a criterion earns a partial-credit signal.
pub const PARTIAL_THRESHOLD: f64 = 0.3;

/// Weight of a keyword found only in the oracle's feedback.
const FEEDBACK_ONLY_CREDIT: f64 = 0.5;

/// Inputs for scoring one question.
#[derive(Debug, Clone, Copy)]
pub struct CriteriaInput<'a> {
    pub answer: &'a str,
    pub criteria: &'a [Criterion],
    pub feedback: &'a str,
    pub marks_awarded: u32,
    pub total_marks: u32,
}

/// Score one question against its criteria.
pub fn score_criteria(input: CriteriaInput<'_>) -> ConfidenceBreakdown {
    let answer = tokens(input.answer);
    let feedback = tokens(input.feedback);

    let partial_credit_details: Vec<PartialCredit> = input
        .criteria
        .iter()
        .map(|c| assess(c, &answer, &feedback))
        .collect();
    let criteria_matched = partial_credit_details.iter().filter(|p| p.matched).count();
    let total_criteria = input.criteria.len();

    let criteria_ratio = if total_criteria == 0 {
        0.0
    } else {
        criteria_matched as f64 / total_criteria as f64
    };
    let marks_ratio = if input.total_marks == 0 {
        1.0
    } else {
        (input.marks_awarded as f64 / input.total_marks as f64).min(1.0)
    };
    let quality = feedback_quality(input.feedback, &feedback, input.criteria);

    let confidence_score = clamp01(
        CRITERIA_WEIGHT * criteria_ratio + MARKS_WEIGHT * marks_ratio + FEEDBACK_WEIGHT * quality,
    );

    ConfidenceBreakdown {
        criteria_matched,
        total_criteria,
        confidence_score,
        reasoning: reasoning(
            confidence_score,
            criteria_matched,
            total_criteria,
            input.marks_awarded,
            input.total_marks,
            quality,
        ),
        partial_credit_details,
    }
}

fn assess(criterion: &Criterion, answer: &HashSet<String>, feedback: &HashSet<String>) -> PartialCredit {
    if criterion.keywords.is_empty() {
        return PartialCredit {
            criterion: criterion.description.clone(),
            matched: false,
            partial_score: 0.0,
            explanation: "criterion lists no keywords to match".to_string(),
        };
    }

    let mut credit = 0.0;
    let mut in_answer = Vec::new();
    let mut in_feedback = Vec::new();
    for kw in &criterion.keywords {
        if keyword_present(kw, answer) {
            credit += 1.0;
            in_answer.push(kw.as_str());
        } else if keyword_present(kw, feedback) {
            credit += FEEDBACK_ONLY_CREDIT;
            in_feedback.push(kw.as_str());
        }
    }
    let overlap = credit / criterion.keywords.len() as f64;

    let (matched, partial_score, verdict) = if overlap >= MATCH_THRESHOLD {
        (true, 1.0, "matched")
    } else if overlap >= PARTIAL_THRESHOLD {
        (false, 0.5, "partially evidenced")
    } else {
        (false, 0.0, "not evidenced")
    };

    let mut explanation = format!(
        "{verdict}: keyword overlap {:.0}% ({} of {} in answer",
        overlap * 100.0,
        in_answer.len(),
        criterion.keywords.len()
    );
    if !in_feedback.is_empty() {
        explanation.push_str(&format!(", {} only in feedback", in_feedback.len()));
    }
    explanation.push(')');
    if !in_answer.is_empty() {
        explanation.push_str(&format!("; found: {}", in_answer.join(", ")));
    }

    PartialCredit {
        criterion: criterion.description.clone(),
        matched,
        partial_score,
        explanation,
    }
}

/// 0 for empty feedback, 1 when it cites a criterion keyword, 0.5 otherwise.
pub fn feedback_quality(raw: &str, feedback: &HashSet<String>, criteria: &[Criterion]) -> f64 {
    if raw.trim().is_empty() {
        return 0.0;
    }
    let cites_scheme = criteria
        .iter()
        .flat_map(|c| c.keywords.iter())
        .any(|kw| keyword_present(kw, feedback));
    if cites_scheme {
        1.0
    } else {
        0.5
    }
}

/// Lower-cased alphanumeric tokens.
pub fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// A keyword is present when every one of its tokens is.
fn keyword_present(keyword: &str, tokens_in: &HashSet<String>) -> bool {
    let parts = tokens(keyword);
    !parts.is_empty() && parts.iter().all(|p| tokens_in.contains(p))
}

fn reasoning(
    score: f64,
    matched: usize,
    total: usize,
    awarded: u32,
    available: u32,
    quality: f64,
) -> String {
    let tier = if score >= 0.9 {
        "High confidence"
    } else if score >= 0.7 {
        "Good confidence"
    } else if score >= 0.5 {
        "Moderate confidence"
    } else {
        "Low confidence"
    };
    let feedback = if quality >= 1.0 {
        "feedback cites scheme terms"
    } else if quality > 0.0 {
        "feedback is generic"
    } else {
        "no feedback"
    };
    format!("{tier}: {matched}/{total} criteria matched, {awarded}/{available} marks awarded, {feedback}")
}
