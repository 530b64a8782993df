//! Per-question visual verification.
//!
//! Tasks run concurrently, each under its own timeout. A task that times
//! out, fails or returns malformed output only removes that question's
//! visual analysis; it never fails the paper.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use markit_vision::{ExpectedVisualAnswer, GeometryVerifier, VisionError, VisualVerification};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::Semaphore;

use crate::domain::{GradingWarning, VisualTaskError};
use crate::metrics::METRICS;
use crate::obs;

pub const IMAGE_PLACEHOLDER: &str = "{image}";
pub const EXPECTED_PLACEHOLDER: &str = "{expected}";
pub const GRID_SPACING_PLACEHOLDER: &str = "{grid_spacing}";

/// Where a visual question's drawing lives and what it should show.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualSpec {
    pub image_path: PathBuf,
    pub expected: ExpectedVisualAnswer,
    /// Pixels per grid unit.
    pub grid_spacing: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisualTask {
    pub question_number: u32,
    pub spec: VisualSpec,
}

#[async_trait]
pub trait VisualVerifier: Send + Sync {
    async fn verify(&self, task: &VisualTask) -> Result<VisualVerification, VisualTaskError>;
}

/// Runs [`GeometryVerifier`] on the blocking pool.
#[derive(Debug, Clone, Default)]
pub struct InProcessVerifier {
    verifier: GeometryVerifier,
}

impl InProcessVerifier {
    pub fn new(verifier: GeometryVerifier) -> Self {
        Self { verifier }
    }
}

#[async_trait]
impl VisualVerifier for InProcessVerifier {
    async fn verify(&self, task: &VisualTask) -> Result<VisualVerification, VisualTaskError> {
        let verifier = self.verifier.clone();
        let spec = task.spec.clone();
        tokio::task::spawn_blocking(move || {
            verifier.verify_path(&spec.image_path, &spec.expected, spec.grid_spacing)
        })
        .await
        .map_err(|e| VisualTaskError::Failed(format!("verifier task aborted: {e}")))?
        .map_err(VisualTaskError::from)
    }
}

/// Runs an external verifier program and parses its JSON stdout.
///
/// Arguments may contain `{image}`, `{expected}` (the expected answer as
/// JSON) and `{grid_spacing}`.
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    program: String,
    args: Vec<String>,
}

impl CommandVerifier {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn render_args(&self, task: &VisualTask) -> Result<Vec<String>, VisualTaskError> {
        let expected = serde_json::to_string(&task.spec.expected)
            .map_err(|e| VisualTaskError::Failed(e.to_string()))?;
        let image = task.spec.image_path.display().to_string();
        let spacing = task.spec.grid_spacing.to_string();
        Ok(self
            .args
            .iter()
            .map(|a| {
                a.replace(IMAGE_PLACEHOLDER, &image)
                    .replace(EXPECTED_PLACEHOLDER, &expected)
                    .replace(GRID_SPACING_PLACEHOLDER, &spacing)
            })
            .collect())
    }
}

#[async_trait]
impl VisualVerifier for CommandVerifier {
    async fn verify(&self, task: &VisualTask) -> Result<VisualVerification, VisualTaskError> {
        let output = Command::new(&self.program)
            .args(self.render_args(task)?)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| VisualTaskError::Failed(format!("{}: {e}", self.program)))?;

        if !output.status.success() {
            return Err(VisualTaskError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        VisualVerification::from_json(&String::from_utf8_lossy(&output.stdout)).map_err(|e| match e {
            VisionError::MalformedOutput(msg) => VisualTaskError::MalformedOutput(msg),
            other => VisualTaskError::Vision(other),
        })
    }
}

/// Visual analyses keyed by question number.
#[derive(Debug, Clone, Default)]
pub struct VisualOutcome {
    pub analyses: BTreeMap<u32, VisualVerification>,
    /// One `VisualAnalysisUnavailable` per failed task, in task order.
    pub warnings: Vec<GradingWarning>,
}

/// Verify every task concurrently.
pub async fn run_visual_tasks(
    verifier: Arc<dyn VisualVerifier>,
    tasks: Vec<VisualTask>,
    timeout: Duration,
    max_concurrent: usize,
) -> VisualOutcome {
    let sem = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let numbers: Vec<u32> = tasks.iter().map(|t| t.question_number).collect();

    let handles: Vec<_> = tasks
        .into_iter()
        .map(|task| {
            let verifier = Arc::clone(&verifier);
            let sem = Arc::clone(&sem);
            tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.ok();
                METRICS.inc_visual_tasks();
                match tokio::time::timeout(timeout, verifier.verify(&task)).await {
                    Ok(result) => result,
                    Err(_) => Err(VisualTaskError::Timeout(timeout)),
                }
            })
        })
        .collect();

    let mut outcome = VisualOutcome::default();
    for (question_number, joined) in numbers.into_iter().zip(join_all(handles).await) {
        let result = joined
            .unwrap_or_else(|e| Err(VisualTaskError::Failed(format!("visual task aborted: {e}"))));
        match result {
            Ok(analysis) => {
                outcome.analyses.insert(question_number, analysis);
            }
            Err(e) => {
                METRICS.inc_visual_failures();
                obs::emit_visual_degraded(question_number, &e);
                outcome.warnings.push(GradingWarning::VisualAnalysisUnavailable {
                    question_number,
                    reason: e.to_string(),
                });
            }
        }
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use markit_vision::{ShapeType, Tolerance};

    fn spec(path: &str) -> VisualSpec {
        VisualSpec {
            image_path: PathBuf::from(path),
            expected: ExpectedVisualAnswer::polygon(
                ShapeType::Triangle,
                vec![[2.0, 2.0], [4.0, 6.0], [7.0, 3.0]],
                Tolerance::default(),
            ),
            grid_spacing: 50.0,
        }
    }

    struct Slow;

    #[async_trait]
    impl VisualVerifier for Slow {
        async fn verify(&self, task: &VisualTask) -> Result<VisualVerification, VisualTaskError> {
            if task.question_number == 2 {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            Ok(VisualVerification::no_shape())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_task_degrades_only_its_question() {
        let tasks = vec![
            VisualTask { question_number: 1, spec: spec("a.png") },
            VisualTask { question_number: 2, spec: spec("b.png") },
            VisualTask { question_number: 3, spec: spec("c.png") },
        ];
        let out = run_visual_tasks(Arc::new(Slow), tasks, Duration::from_secs(8), 4).await;
        assert_eq!(out.analyses.keys().copied().collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(out.warnings.len(), 1);
        assert!(matches!(
            &out.warnings[0],
            GradingWarning::VisualAnalysisUnavailable { question_number: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_in_process_missing_image_is_zero_confidence() {
        let task = VisualTask {
            question_number: 4,
            spec: spec("/nonexistent/markit/answer.png"),
        };
        let v = InProcessVerifier::default().verify(&task).await.unwrap();
        assert_eq!(v.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_in_process_invalid_spacing_is_an_error() {
        let mut task = VisualTask {
            question_number: 4,
            spec: spec("a.png"),
        };
        task.spec.grid_spacing = -1.0;
        let err = InProcessVerifier::default().verify(&task).await.unwrap_err();
        assert!(matches!(err, VisualTaskError::Vision(_)));
    }

    #[tokio::test]
    async fn test_command_verifier_parses_output() {
        let verifier = CommandVerifier::new(
            "echo",
            vec![r#"{"confidence": 0.5, "feedback": "ok", "geometric_accuracy": null, "detected_shapes": []}"#.to_string()],
        );
        let task = VisualTask { question_number: 1, spec: spec("a.png") };
        let v = verifier.verify(&task).await.unwrap();
        assert_eq!(v.confidence, 0.5);
    }

    #[tokio::test]
    async fn test_command_verifier_rejects_garbage() {
        let verifier = CommandVerifier::new("echo", vec!["Segmentation fault".to_string()]);
        let task = VisualTask { question_number: 1, spec: spec("a.png") };
        let err = verifier.verify(&task).await.unwrap_err();
        assert!(matches!(err, VisualTaskError::MalformedOutput(_)));
    }

    #[test]
    fn test_command_verifier_renders_placeholders() {
        let verifier = CommandVerifier::new(
            "verify",
            vec![
                "--image={image}".to_string(),
                "--spacing={grid_spacing}".to_string(),
                EXPECTED_PLACEHOLDER.to_string(),
            ],
        );
        let args = verifier
            .render_args(&VisualTask { question_number: 1, spec: spec("q1.png") })
            .unwrap();
        assert_eq!(args[0], "--image=q1.png");
        assert_eq!(args[1], "--spacing=50");
        assert!(args[2].contains("\"shape_type\":\"triangle\""));
    }
}
