//! Mark-It - exam grading CLI
//!
//! The `markit` command grades answer papers with an ensemble of marking
//! oracles and verifies drawn geometry answers against graph paper.
//!
//! ## Commands
//!
//! - `grade`: Grade a paper with an external oracle command
//! - `reconcile`: Grade a paper from recorded oracle outputs
//! - `confidence`: Criteria confidence for one question
//! - `visual`: Verify one drawn answer image
//! - `agreement`: Agreement across recorded oracle outputs
//! - `benchmark`: Compare graded marks against a reference marking

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use uuid::Uuid;

use markit_core::{
    benchmark, embedding_confidence, paper_agreement, parse_candidate, reconcile, score_criteria,
    CommandOracle, CommandVerifier, ConfidenceBreakdown, CriteriaInput, Criterion, Grader,
    GradingConfig, GradingRequest, MarkResult, QuestionAgreement, ReplayOracle, TieredAgreement,
    METRICS,
};
use markit_vision::{
    graded_geometric_confidence, ExpectedVisualAnswer, GeometryVerifier, VisualVerification,
};

#[derive(Parser)]
#[command(name = "markit")]
#[command(author = "Mark-It Engineering")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Ensemble exam grading with geometric answer verification", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade a paper by calling an external marking oracle
    ///
    /// The oracle command follows `--`; `{scheme}` and `{answer}` in its
    /// arguments are replaced with the request's references.
    Grade {
        /// Grading request (JSON)
        request: PathBuf,

        /// External visual verifier command (default: in-process verifier).
        /// `{image}`, `{expected}` and `{grid_spacing}` are substituted.
        #[arg(long, num_args = 1.., allow_hyphen_values = true)]
        verifier: Vec<String>,

        #[command(flatten)]
        config: ConfigArgs,

        /// Output path for the grading report
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Oracle program and arguments
        #[arg(last = true, required = true)]
        oracle: Vec<String>,
    },

    /// Grade a paper from recorded oracle outputs
    ///
    /// Each file is one raw oracle run; the ensemble size is the number of
    /// files given.
    Reconcile {
        /// Recorded oracle outputs (JSON), one per run
        #[arg(required = true)]
        candidates: Vec<PathBuf>,

        /// Grading request with per-question criteria and visual specs
        #[arg(long)]
        request: Option<PathBuf>,

        #[command(flatten)]
        config: ConfigArgs,

        /// Output path for the grading report
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Score one question against its rubric criteria
    Confidence {
        /// Question input (JSON): answer, criteria, feedback, marks_awarded, total_marks,
        /// and optionally expected_answer with its similarity
        input: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Verify a drawn answer against its expected shape
    Visual {
        /// Image of the answer on graph paper
        image: PathBuf,

        /// Expected answer (JSON)
        #[arg(short, long)]
        expected: PathBuf,

        /// Pixels per grid unit
        #[arg(short, long)]
        grid_spacing: f64,

        #[command(flatten)]
        config: ConfigArgs,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Agreement across recorded oracle outputs for one paper
    Agreement {
        /// Recorded oracle outputs (JSON), one per run
        #[arg(required = true)]
        candidates: Vec<PathBuf>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compare graded marks against a reference marking
    Benchmark {
        /// Graded result or grading report (JSON)
        graded: PathBuf,

        /// Reference result (JSON)
        reference: PathBuf,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Configuration file plus per-field overrides.
#[derive(Args, Debug, Clone, Default)]
struct ConfigArgs {
    /// Grading configuration file (JSON)
    #[arg(long, env = "MARKIT_CONFIG")]
    config: Option<PathBuf>,

    /// Independent oracle calls per paper
    #[arg(long, env = "MARKIT_ENSEMBLE_SIZE")]
    ensemble_size: Option<usize>,

    /// Per-call oracle timeout in milliseconds
    #[arg(long, env = "MARKIT_ORACLE_TIMEOUT_MS")]
    oracle_timeout_ms: Option<u64>,

    /// Per-question visual verification timeout in milliseconds
    #[arg(long, env = "MARKIT_VISUAL_TIMEOUT_MS")]
    visual_timeout_ms: Option<u64>,
}

impl ConfigArgs {
    fn load(&self) -> Result<GradingConfig> {
        let mut config = match &self.config {
            Some(path) => GradingConfig::from_file(path)
                .with_context(|| format!("Failed to load config: {:?}", path))?,
            None => GradingConfig::default(),
        };
        if let Some(n) = self.ensemble_size {
            config.ensemble_size = n;
        }
        if let Some(ms) = self.oracle_timeout_ms {
            config.oracle_timeout_ms = ms;
        }
        if let Some(ms) = self.visual_timeout_ms {
            config.visual_timeout_ms = ms;
        }
        config.validate().context("Invalid grading configuration")?;
        Ok(config)
    }
}

/// A graded paper as written by `grade` and `reconcile`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GradingReport {
    run_id: Uuid,
    generated_at: DateTime<Utc>,
    result: MarkResult,
}

impl GradingReport {
    fn new(result: MarkResult) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            result,
        }
    }
}

/// Input for `confidence`.
#[derive(Debug, Deserialize)]
struct ConfidenceRequest {
    answer: String,
    criteria: Vec<Criterion>,
    #[serde(default)]
    feedback: String,
    marks_awarded: u32,
    total_marks: u32,
    /// Model answer for the similarity-based score.
    #[serde(default)]
    expected_answer: Option<String>,
    /// Precomputed semantic similarity between `answer` and `expected_answer`.
    #[serde(default)]
    similarity: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ConfidenceReport {
    #[serde(flatten)]
    breakdown: ConfidenceBreakdown,
    #[serde(skip_serializing_if = "Option::is_none")]
    embedding_confidence: Option<f64>,
}

#[derive(Debug, Serialize)]
struct VisualReport {
    #[serde(flatten)]
    verification: VisualVerification,
    /// Continuous geometric score, present when accuracy was measured.
    graded_confidence: Option<f64>,
}

#[derive(Debug, Serialize)]
struct AgreementReport {
    candidates: usize,
    paper_agreement: Option<f64>,
    questions: Vec<QuestionAgreement>,
}

/// `benchmark` accepts either a full report or a bare result.
#[derive(Deserialize)]
#[serde(untagged)]
enum MarkResultFile {
    Report(GradingReport),
    Result(MarkResult),
}

impl MarkResultFile {
    fn into_result(self) -> MarkResult {
        match self {
            Self::Report(report) => report.result,
            Self::Result(result) => result,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    markit_core::init_tracing(cli.json, level);

    let outcome = match cli.command {
        Commands::Grade {
            request,
            verifier,
            config,
            output,
            oracle,
        } => cmd_grade(&request, &oracle, &verifier, &config, output.as_deref()).await,
        Commands::Reconcile {
            candidates,
            request,
            config,
            output,
        } => cmd_reconcile(&candidates, request.as_deref(), &config, output.as_deref()).await,
        Commands::Confidence { input, output } => cmd_confidence(&input, output.as_deref()),
        Commands::Visual {
            image,
            expected,
            grid_spacing,
            config,
            output,
        } => cmd_visual(&image, &expected, grid_spacing, &config, output.as_deref()),
        Commands::Agreement { candidates, output } => {
            cmd_agreement(&candidates, output.as_deref())
        }
        Commands::Benchmark {
            graded,
            reference,
            output,
        } => cmd_benchmark(&graded, &reference, output.as_deref()),
    };

    METRICS.flush();
    outcome
}

/// Grade a paper with an external oracle command
async fn cmd_grade(
    request_path: &Path,
    oracle: &[String],
    verifier: &[String],
    config: &ConfigArgs,
    output: Option<&Path>,
) -> Result<()> {
    let config = config.load()?;
    let request: GradingRequest = read_json_file(request_path)?;
    let oracle = CommandOracle::from_argv(oracle).context("Invalid oracle command")?;

    let mut grader = Grader::new(Arc::new(oracle), config)?;
    if let Some((program, args)) = verifier.split_first() {
        grader = grader.with_verifier(Arc::new(CommandVerifier::new(
            program.clone(),
            args.to_vec(),
        )));
    }

    let result = grader.grade(request).await.context("Grading failed")?;
    write_report(GradingReport::new(result), output)
}

/// Grade a paper from recorded oracle outputs
async fn cmd_reconcile(
    candidates: &[PathBuf],
    request_path: Option<&Path>,
    config: &ConfigArgs,
    output: Option<&Path>,
) -> Result<()> {
    let mut config = config.load()?;
    config.ensemble_size = candidates.len();

    let recordings = candidates
        .iter()
        .map(|path| {
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read recorded output: {:?}", path))
        })
        .collect::<Result<Vec<_>>>()?;

    let request = match request_path {
        Some(path) => read_json_file(path)?,
        None => GradingRequest {
            scheme: "recorded".to_string(),
            answer: candidates
                .first()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            questions: Default::default(),
        },
    };

    let grader = Grader::new(Arc::new(ReplayOracle::new(recordings)), config)?;
    let result = grader.grade(request).await.context("Reconciliation failed")?;
    write_report(GradingReport::new(result), output)
}

fn write_report(report: GradingReport, output: Option<&Path>) -> Result<()> {
    info!(
        run_id = %report.run_id,
        awarded = report.result.total_marks_awarded,
        available = report.result.total_marks_available,
        overall_confidence = report.result.overall_confidence,
        warnings = report.result.warnings.len(),
        "paper graded"
    );
    write_output(&report, output)
}

/// Criteria confidence for one question
fn cmd_confidence(input: &Path, output: Option<&Path>) -> Result<()> {
    let request: ConfidenceRequest = read_json_file(input)?;
    let breakdown = score_criteria(CriteriaInput {
        answer: &request.answer,
        criteria: &request.criteria,
        feedback: &request.feedback,
        marks_awarded: request.marks_awarded,
        total_marks: request.total_marks,
    });
    let embedding_confidence = request
        .expected_answer
        .as_deref()
        .zip(request.similarity)
        .map(|(expected, similarity)| embedding_confidence(&request.answer, expected, similarity));
    write_output(
        &ConfidenceReport {
            breakdown,
            embedding_confidence,
        },
        output,
    )
}

/// Verify one drawn answer image
fn cmd_visual(
    image: &Path,
    expected: &Path,
    grid_spacing: f64,
    config: &ConfigArgs,
    output: Option<&Path>,
) -> Result<()> {
    let config = config.load()?;
    let expected: ExpectedVisualAnswer = read_json_file(expected)?;

    let verification = GeometryVerifier::new(config.verifier)
        .verify_path(image, &expected, grid_spacing)
        .with_context(|| format!("Failed to verify {:?}", image))?;
    let graded_confidence = verification.geometric_accuracy.as_ref().map(|accuracy| {
        graded_geometric_confidence(
            accuracy,
            &expected.tolerance,
            expected.shape_type.is_polygonal(),
        )
    });

    write_output(
        &VisualReport {
            verification,
            graded_confidence,
        },
        output,
    )
}

/// Agreement across recorded oracle outputs
fn cmd_agreement(candidates: &[PathBuf], output: Option<&Path>) -> Result<()> {
    let parsed = candidates
        .iter()
        .map(|path| {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read recorded output: {:?}", path))?;
            parse_candidate(&raw).with_context(|| format!("Invalid oracle output in {:?}", path))
        })
        .collect::<Result<Vec<_>>>()?;

    let reconciliation = reconcile(&parsed, &TieredAgreement::default())?;
    write_output(
        &AgreementReport {
            candidates: parsed.len(),
            paper_agreement: paper_agreement(&parsed),
            questions: reconciliation.agreement,
        },
        output,
    )
}

/// Compare graded marks against a reference marking
fn cmd_benchmark(graded: &Path, reference: &Path, output: Option<&Path>) -> Result<()> {
    let graded = read_json_file::<MarkResultFile>(graded)?.into_result();
    let reference = read_json_file::<MarkResultFile>(reference)?.into_result();
    write_output(&benchmark(&graded, &reference), output)
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read JSON file: {:?}", path))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid JSON in {:?}", path))
}

fn write_output<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    if let Some(path) = output {
        std::fs::write(path, &json).with_context(|| format!("Failed to write to {:?}", path))?;
        info!(path = %path.display(), "output written");
    } else {
        println!("{}", json);
    }
    Ok(())
}
