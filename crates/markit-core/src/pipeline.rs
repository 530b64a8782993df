//! The grading pipeline.
//!
//! scheme + answer → N concurrent oracle calls → reconciliation → criteria
//! scoring → concurrent visual verification → aggregation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use markit_vision::GeometryVerifier;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::agreement::{paper_agreement, AgreementPolicy, TieredAgreement};
use crate::aggregate::{aggregate, AggregateInput};
use crate::config::GradingConfig;
use crate::criteria::{score_criteria, CriteriaInput};
use crate::domain::{ConfidenceBreakdown, Criterion, GradingError, MarkResult, Result};
use crate::ensemble::{run_ensemble, EnsembleSettings};
use crate::obs::{self, paper_span};
use crate::oracle::{MarkingOracle, OracleRequest};
use crate::reconcile::{reconcile, Reconciliation};
use crate::visual::{run_visual_tasks, InProcessVerifier, VisualSpec, VisualTask, VisualVerifier};

/// Scheme-side knowledge about one question.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionContext {
    /// The student's answer text, when it is available to the grader.
    #[serde(default)]
    pub answer_text: Option<String>,
    #[serde(default)]
    pub criteria: Vec<Criterion>,
    #[serde(default)]
    pub visual: Option<VisualSpec>,
}

/// One paper to grade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradingRequest {
    /// Opaque reference to the mark scheme, passed through to the oracle.
    pub scheme: String,
    /// Opaque reference to the answer document, passed through to the oracle.
    pub answer: String,
    #[serde(default)]
    pub questions: BTreeMap<u32, QuestionContext>,
}

impl GradingRequest {
    pub fn oracle_request(&self) -> OracleRequest {
        OracleRequest::new(self.scheme.clone(), self.answer.clone())
    }
}

/// Grades papers with an oracle ensemble and a visual verifier.
pub struct Grader {
    oracle: Arc<dyn MarkingOracle>,
    verifier: Arc<dyn VisualVerifier>,
    policy: Arc<dyn AgreementPolicy>,
    config: GradingConfig,
}

impl Grader {
    /// Grader with the in-process geometry verifier and tiered agreement.
    pub fn new(oracle: Arc<dyn MarkingOracle>, config: GradingConfig) -> Result<Self> {
        config.validate()?;
        let verifier = InProcessVerifier::new(GeometryVerifier::new(config.verifier.clone()));
        Ok(Self {
            oracle,
            verifier: Arc::new(verifier),
            policy: Arc::new(TieredAgreement::default()),
            config,
        })
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn VisualVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn AgreementPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(&self) -> &GradingConfig {
        &self.config
    }

    /// Grade one paper.
    ///
    /// Fails only for an invalid request or when no oracle call succeeds;
    /// every other problem is recorded in [`MarkResult::warnings`].
    pub async fn grade(&self, request: GradingRequest) -> Result<MarkResult> {
        let paper = request.oracle_request().digest();
        let result = self
            .grade_inner(&paper, request)
            .instrument(paper_span(&paper))
            .await;
        if let Err(e) = &result {
            obs::emit_paper_failed(&paper, e);
        }
        result
    }

    async fn grade_inner(&self, paper: &str, request: GradingRequest) -> Result<MarkResult> {
        if request.scheme.trim().is_empty() || request.answer.trim().is_empty() {
            return Err(GradingError::InvalidRequest(
                "scheme and answer references must not be empty".to_string(),
            ));
        }
        let started = Instant::now();
        let visual_questions = request.questions.values().filter(|q| q.visual.is_some()).count();
        obs::emit_paper_started(paper, self.config.ensemble_size, visual_questions);

        let ensemble = run_ensemble(
            Arc::clone(&self.oracle),
            &request.oracle_request(),
            EnsembleSettings {
                size: self.config.ensemble_size,
                timeout: self.config.oracle_timeout(),
                max_concurrent: self.config.max_concurrent,
            },
        )
        .await?;

        let reconciliation = reconcile(&ensemble.candidates, self.policy.as_ref())?;
        let criteria = criteria_breakdowns(&reconciliation, &request.questions);

        let tasks = visual_tasks(&reconciliation, &request.questions);
        let visual = run_visual_tasks(
            Arc::clone(&self.verifier),
            tasks,
            self.config.visual_timeout(),
            self.config.max_concurrent,
        )
        .await;

        let mut warnings = ensemble.warnings;
        warnings.extend(visual.warnings);

        let result = aggregate(AggregateInput {
            paper_agreement: paper_agreement(&ensemble.candidates),
            reconciliation,
            criteria,
            visual: visual.analyses,
            prefer_ensemble_agreement: self.config.prefer_ensemble_agreement,
            warnings,
        });

        obs::emit_paper_finished(
            paper,
            started.elapsed().as_millis() as u64,
            ensemble.candidates.len(),
            result.overall_confidence,
            result.warnings.len(),
        );
        Ok(result)
    }
}

/// Criteria breakdowns for canonical questions that have both criteria and
/// answer text.
fn criteria_breakdowns(
    reconciliation: &Reconciliation,
    questions: &BTreeMap<u32, QuestionContext>,
) -> BTreeMap<u32, ConfidenceBreakdown> {
    reconciliation
        .canonical
        .results
        .iter()
        .filter_map(|q| {
            let ctx = questions.get(&q.question_number)?;
            let answer = ctx.answer_text.as_deref()?;
            if ctx.criteria.is_empty() {
                return None;
            }
            let breakdown = score_criteria(CriteriaInput {
                answer,
                criteria: &ctx.criteria,
                feedback: &q.feedback,
                marks_awarded: q.marks_awarded,
                total_marks: q.total_marks,
            });
            Some((q.question_number, breakdown))
        })
        .collect()
}

/// Visual tasks for canonical questions with a visual spec, in question order.
fn visual_tasks(
    reconciliation: &Reconciliation,
    questions: &BTreeMap<u32, QuestionContext>,
) -> Vec<VisualTask> {
    reconciliation
        .canonical
        .results
        .iter()
        .filter_map(|q| {
            let spec = questions.get(&q.question_number)?.visual.clone()?;
            Some(VisualTask {
                question_number: q.question_number,
                spec,
            })
        })
        .collect()
}
