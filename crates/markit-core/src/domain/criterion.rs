//! Rubric criteria parsed from the mark scheme.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// One rubric criterion from the mark scheme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub description: String,
    #[serde(default)]
    pub marks: u32,
    /// Scheme-specific terms whose presence evidences the criterion.
    #[serde(default)]
    pub keywords: BTreeSet<String>,
}

impl Criterion {
    pub fn new<I, S>(description: impl Into<String>, marks: u32, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            description: description.into(),
            marks,
            keywords: keywords.into_iter().map(Into::into).collect(),
        }
    }
}
