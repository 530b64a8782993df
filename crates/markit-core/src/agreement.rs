//! Agreement signals derived from ensemble disagreement.

use std::collections::HashSet;

use crate::domain::MarkCandidate;

/// Maps the marks independent candidates awarded for one question to a
/// trust multiplier in [0, 1].
pub trait AgreementPolicy: Send + Sync {
    fn multiplier(&self, marks: &[u32]) -> f64;
}

/// Three-tier multiplier keyed on the number of distinct marks observed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TieredAgreement {
    pub unanimous: f64,
    pub split: f64,
    pub scattered: f64,
}

impl Default for TieredAgreement {
    fn default() -> Self {
        Self {
            unanimous: 1.0,
            split: 0.7,
            scattered: 0.4,
        }
    }
}

impl AgreementPolicy for TieredAgreement {
    fn multiplier(&self, marks: &[u32]) -> f64 {
        match distinct_values(marks) {
            0 | 1 => self.unanimous,
            2 => self.split,
            _ => self.scattered,
        }
    }
}

pub fn distinct_values(marks: &[u32]) -> usize {
    marks.iter().collect::<HashSet<_>>().len()
}

/// Paper-level agreement: `max(0, 1 - 2σ)` over the candidates' percentage
/// scores, with σ the population standard deviation.
///
/// `None` when fewer than two candidates have marks available, since a
/// single run carries no agreement information.
pub fn paper_agreement(candidates: &[MarkCandidate]) -> Option<f64> {
    let scores: Vec<f64> = candidates.iter().filter_map(MarkCandidate::percentage).collect();
    if scores.len() < 2 {
        return None;
    }
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    Some((1.0 - 2.0 * variance.sqrt()).clamp(0.0, 1.0))
}
