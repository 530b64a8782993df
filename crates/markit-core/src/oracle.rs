//! Marking-oracle boundary.
//!
//! The oracle is an external, unreliable scorer. Whatever it prints is parsed
//! exactly once, here, into a validated [`MarkCandidate`]; anything else is a
//! typed [`OracleError`] and the candidate is dropped from the ensemble.

use std::process::Stdio;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::debug;

use crate::domain::{MarkCandidate, OracleError};

/// Placeholder replaced by [`OracleRequest::scheme`] in command arguments.
pub const SCHEME_PLACEHOLDER: &str = "{scheme}";
/// Placeholder replaced by [`OracleRequest::answer`] in command arguments.
pub const ANSWER_PLACEHOLDER: &str = "{answer}";

/// Input for one oracle call. Every call in an ensemble gets the same
/// scheme and answer; only `attempt` differs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleRequest {
    /// Opaque reference to the mark scheme document.
    pub scheme: String,
    /// Opaque reference to the answer document.
    pub answer: String,
    /// Zero-based position of this call within the ensemble.
    #[serde(default)]
    pub attempt: usize,
}

impl OracleRequest {
    pub fn new(scheme: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
            answer: answer.into(),
            attempt: 0,
        }
    }

    pub fn with_attempt(&self, attempt: usize) -> Self {
        Self {
            attempt,
            ..self.clone()
        }
    }

    /// SHA-256 hex digest identifying the paper (scheme + answer).
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.scheme.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.answer.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// An independently invokable marking oracle.
#[async_trait]
pub trait MarkingOracle: Send + Sync {
    async fn mark(&self, request: &OracleRequest) -> Result<MarkCandidate, OracleError>;
}

/// Parse raw oracle output into a validated candidate.
///
/// Self-reported confidences are clamped into [0, 1]; structural defects
/// (duplicate questions, over-awarded marks, non-finite numbers) are rejected.
pub fn parse_candidate(raw: &str) -> Result<MarkCandidate, OracleError> {
    let mut candidate: MarkCandidate = serde_json::from_str(raw.trim())
        .map_err(|e| OracleError::MalformedOutput(e.to_string()))?;
    candidate
        .validate()
        .map_err(|e| OracleError::MalformedOutput(e.to_string()))?;
    candidate.clamp_confidences();
    Ok(candidate)
}

/// Runs an external program per call and parses its stdout.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    program: String,
    args: Vec<String>,
}

impl CommandOracle {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Build from a full argv (`program arg...`).
    pub fn from_argv(argv: &[String]) -> Result<Self, OracleError> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| OracleError::Failed("oracle command is empty".to_string()))?;
        Ok(Self::new(program.clone(), args.to_vec()))
    }

    fn render_args(&self, request: &OracleRequest) -> Vec<String> {
        self.args
            .iter()
            .map(|a| {
                a.replace(SCHEME_PLACEHOLDER, &request.scheme)
                    .replace(ANSWER_PLACEHOLDER, &request.answer)
            })
            .collect()
    }
}

#[async_trait]
impl MarkingOracle for CommandOracle {
    async fn mark(&self, request: &OracleRequest) -> Result<MarkCandidate, OracleError> {
        // kill_on_drop: a timed-out call is cancelled by dropping this future.
        let output = Command::new(&self.program)
            .args(self.render_args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OracleError::Failed(format!(
                "{} exited with {}: {}",
                self.program,
                output
                    .status
                    .code()
                    .map_or_else(|| "signal".to_string(), |c| c.to_string()),
                stderr.trim()
            )));
        }
        debug!(
            attempt = request.attempt,
            bytes = output.stdout.len(),
            "oracle command finished"
        );
        parse_candidate(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Serves previously recorded oracle output, one recording per attempt.
#[derive(Debug, Clone, Default)]
pub struct ReplayOracle {
    recordings: Vec<String>,
}

impl ReplayOracle {
    /// Recordings are raw oracle output and go through [`parse_candidate`].
    pub fn new(recordings: Vec<String>) -> Self {
        Self { recordings }
    }

    pub fn from_candidates(candidates: &[MarkCandidate]) -> Result<Self, OracleError> {
        let recordings = candidates
            .iter()
            .map(|c| serde_json::to_string(c).map_err(|e| OracleError::Failed(e.to_string())))
            .collect::<Result<_, _>>()?;
        Ok(Self { recordings })
    }

    pub fn len(&self) -> usize {
        self.recordings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recordings.is_empty()
    }
}

#[async_trait]
impl MarkingOracle for ReplayOracle {
    async fn mark(&self, request: &OracleRequest) -> Result<MarkCandidate, OracleError> {
        let raw = self.recordings.get(request.attempt).ok_or_else(|| {
            OracleError::Failed(format!(
                "no recording for attempt {} ({} recorded)",
                request.attempt,
                self.recordings.len()
            ))
        })?;
        parse_candidate(raw)
    }
}
