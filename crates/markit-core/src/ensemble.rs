//! Concurrent ensemble dispatch.
//!
//! Each oracle call is an independent task with its own timeout. Failed or
//! timed-out calls drop out of the ensemble; survivors are returned in call
//! order regardless of completion order.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::instrument;

use crate::domain::{GradingError, GradingWarning, MarkCandidate, OracleError, Result};
use crate::metrics::METRICS;
use crate::obs;
use crate::oracle::{MarkingOracle, OracleRequest};

/// Dispatch limits for one ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnsembleSettings {
    pub size: usize,
    pub timeout: Duration,
    pub max_concurrent: usize,
}

/// Candidates that survived, in call order.
#[derive(Debug, Clone)]
pub struct EnsembleOutcome {
    pub candidates: Vec<MarkCandidate>,
    /// One `OracleDropped` per failed call.
    pub warnings: Vec<GradingWarning>,
    pub attempted: usize,
}

/// Call `oracle` `settings.size` times concurrently.
///
/// Returns [`GradingError::NoCandidatesAvailable`] only when every call fails.
#[instrument(skip(oracle, request), fields(size = settings.size))]
pub async fn run_ensemble(
    oracle: Arc<dyn MarkingOracle>,
    request: &OracleRequest,
    settings: EnsembleSettings,
) -> Result<EnsembleOutcome> {
    let sem = Arc::new(Semaphore::new(settings.max_concurrent.max(1)));

    let handles: Vec<_> = (0..settings.size)
        .map(|attempt| {
            let oracle = Arc::clone(&oracle);
            let sem = Arc::clone(&sem);
            let request = request.with_attempt(attempt);
            tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                METRICS.inc_oracle_calls();
                match tokio::time::timeout(settings.timeout, oracle.mark(&request)).await {
                    Ok(result) => result,
                    Err(_) => Err(OracleError::Timeout(settings.timeout)),
                }
            })
        })
        .collect();

    let mut candidates = Vec::new();
    let mut warnings = Vec::new();
    for (call, joined) in join_all(handles).await.into_iter().enumerate() {
        let result = joined
            .unwrap_or_else(|e| Err(OracleError::Failed(format!("oracle task aborted: {e}"))));
        match result {
            Ok(candidate) => candidates.push(candidate),
            Err(e) => {
                METRICS.inc_oracle_failures();
                obs::emit_candidate_dropped(call, &e);
                warnings.push(GradingWarning::OracleDropped {
                    call,
                    reason: e.to_string(),
                });
            }
        }
    }

    if candidates.is_empty() {
        return Err(GradingError::NoCandidatesAvailable {
            attempted: settings.size,
        });
    }
    Ok(EnsembleOutcome {
        candidates,
        warnings,
        attempted: settings.size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Oracle whose behaviour depends on the attempt number.
    struct Scripted {
        /// (delay, awarded) per attempt; `None` awarded means malformed output.
        script: Vec<(Duration, Option<u32>)>,
    }

    #[async_trait]
    impl MarkingOracle for Scripted {
        async fn mark(&self, request: &OracleRequest) -> std::result::Result<MarkCandidate, OracleError> {
            let (delay, awarded) = self.script[request.attempt];
            tokio::time::sleep(delay).await;
            let awarded =
                awarded.ok_or_else(|| OracleError::MalformedOutput("not json".to_string()))?;
            Ok(MarkCandidate {
                student_name: format!("run {}", request.attempt),
                results: Vec::new(),
                total_marks_awarded: awarded,
                total_marks_available: 10,
                general_feedback: String::new(),
            })
        }
    }

    fn settings(size: usize) -> EnsembleSettings {
        EnsembleSettings {
            size,
            timeout: Duration::from_secs(5),
            max_concurrent: 4,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_keep_call_order() {
        let oracle = Arc::new(Scripted {
            script: vec![
                (Duration::from_secs(3), Some(1)),
                (Duration::from_secs(1), Some(2)),
                (Duration::from_secs(2), Some(3)),
            ],
        });
        let out = run_ensemble(oracle, &OracleRequest::new("s", "a"), settings(3))
            .await
            .unwrap();
        let awarded: Vec<u32> = out.candidates.iter().map(|c| c.total_marks_awarded).collect();
        assert_eq!(awarded, vec![1, 2, 3]);
        assert!(out.warnings.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_and_bad_output_shrink_ensemble() {
        let oracle = Arc::new(Scripted {
            script: vec![
                (Duration::from_secs(60), Some(1)),
                (Duration::from_secs(1), Some(2)),
                (Duration::from_secs(1), None),
            ],
        });
        let out = run_ensemble(oracle, &OracleRequest::new("s", "a"), settings(3))
            .await
            .unwrap();
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.candidates[0].total_marks_awarded, 2);
        assert_eq!(out.warnings.len(), 2);
        assert!(matches!(
            &out.warnings[0],
            GradingWarning::OracleDropped { call: 0, reason } if reason.contains("timed out")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_failures_are_fatal() {
        let oracle = Arc::new(Scripted {
            script: vec![(Duration::from_secs(60), Some(1)), (Duration::ZERO, None)],
        });
        let err = run_ensemble(oracle, &OracleRequest::new("s", "a"), settings(2))
            .await
            .unwrap_err();
        assert!(matches!(err, GradingError::NoCandidatesAvailable { attempted: 2 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded() {
        let oracle = Arc::new(Scripted {
            script: vec![(Duration::from_secs(4), Some(5)); 4],
        });
        let start = tokio::time::Instant::now();
        let out = run_ensemble(
            oracle,
            &OracleRequest::new("s", "a"),
            EnsembleSettings {
                size: 4,
                timeout: Duration::from_secs(5),
                max_concurrent: 2,
            },
        )
        .await
        .unwrap();
        assert_eq!(out.candidates.len(), 4);
        assert!(start.elapsed() >= Duration::from_secs(8));
    }
}
