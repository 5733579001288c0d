//! Conductor Evaluator
//!
//! Checks the evidence pipeline stages leave on disk, and scores how well the
//! trimmed script matches the creative brief.
//!
//! Every check is read-only, so evaluating an unchanged render directory
//! twice yields identical outcomes.

use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tokio::fs;
use tracing::{debug, warn};

use crate::conductor::types::EvaluationOutcome;
use crate::llm::{self, LLMProvider};
use sdk::{RunRequest, ToolKind};

/// Coverage at or above which alignment passes without a model score
pub const COVERAGE_PASS: f64 = 0.5;

/// Model score at or above which alignment passes
pub const MODEL_SCORE_PASS: u32 = 70;

/// Script characters sent to the model for scoring
const MAX_SCRIPT_CHARS: usize = 6000;

const ALIGNMENT_SYSTEM_PROMPT: &str = "You grade how well an edited video script matches \
a creative brief. Respond with ONLY an integer from 0 to 100. No words, no punctuation.";

const STOP_WORDS: &[&str] = &[
    "about", "after", "again", "also", "been", "before", "being", "between", "both", "clip",
    "could", "does", "each", "explain", "footage", "from", "have", "into", "just", "like",
    "make", "more", "most", "only", "other", "over", "please", "should", "show", "some",
    "such", "than", "that", "their", "them", "then", "there", "these", "they", "this",
    "those", "through", "very", "video", "want", "were", "what", "when", "where", "which",
    "while", "will", "with", "would", "your",
];

static SCRIPT_NOISE: OnceLock<Vec<Regex>> = OnceLock::new();

/// Lines of a script that carry no spoken content
fn script_noise() -> &'static [Regex] {
    SCRIPT_NOISE.get_or_init(|| {
        vec![
            // subtitle index
            Regex::new(r"^\s*\d+\s*$").expect("Invalid index pattern"),
            // subtitle timing
            Regex::new(r"-->").expect("Invalid timestamp pattern"),
            // metric annotations added by ranking stages
            Regex::new(
                r"(?i)^\s*[\[(#]?\s*(score|rank|novelty|similarity|weight|metric|coverage|confidence)[\w ]*[:=]",
            )
            .expect("Invalid annotation pattern"),
        ]
    })
}

/// Evaluator for stage evidence and prompt alignment
#[derive(Default)]
pub struct Evaluator {
    llm: Option<Arc<dyn LLMProvider>>,
}

impl Evaluator {
    pub fn new(llm: Option<Arc<dyn LLMProvider>>) -> Self {
        Self { llm }
    }

    /// Verify the minimal on-disk evidence of a tool.
    ///
    /// Unknown tool names pass unconditionally.
    pub async fn evaluate_step(&self, tool: &str, request: &RunRequest) -> EvaluationOutcome {
        let Some(kind) = ToolKind::from_name(tool) else {
            debug!("No evidence rule for tool '{}', passing", tool);
            return EvaluationOutcome::pass().with_metric("tool", tool);
        };

        let outcome = match kind {
            ToolKind::TakeProcessing => check_transcripts(&request.transcripts_dir()).await,
            other => match request.stage_output(other) {
                Some(path) => check_file(&path).await,
                None => EvaluationOutcome::pass(),
            },
        };
        outcome.with_metric("tool", kind.as_str())
    }

    /// Gate consulted before render: the trimmed script must exist and be non-empty.
    pub async fn evaluate_gate(&self, request: &RunRequest) -> EvaluationOutcome {
        self.evaluate_step(ToolKind::TrimToLength.as_str(), request)
            .await
            .with_metric("gate", "pre_render")
    }

    /// Score how well the trimmed script matches the brief.
    ///
    /// Passes when keyword coverage is at least 0.5 or the model scores at
    /// least 70. A failing or absent model leaves coverage as the only signal.
    pub async fn evaluate_alignment(&self, request: &RunRequest) -> EvaluationOutcome {
        let path = request.render_file(
            ToolKind::TrimToLength
                .output_suffix()
                .unwrap_or("trim.srt"),
        );
        let raw = match fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) => {
                return EvaluationOutcome::fail(format!(
                    "cannot read trimmed script {}: {}",
                    path.display(),
                    e
                ))
                .with_metric("coverage", 0.0);
            }
        };

        let script = spoken_text(&raw);
        let keywords = brief_keywords(&request.brief.prompt);
        let script_lower = script.to_lowercase();
        let matched: Vec<&String> = keywords
            .iter()
            .filter(|k| script_lower.contains(k.as_str()))
            .collect();
        let coverage = if keywords.is_empty() {
            1.0
        } else {
            matched.len() as f64 / keywords.len() as f64
        };

        let model_score = self.model_score(&request.brief.prompt, &script).await;

        let passed =
            coverage >= COVERAGE_PASS || model_score.is_some_and(|s| s >= MODEL_SCORE_PASS);

        let mut outcome = if passed {
            EvaluationOutcome::pass()
        } else {
            EvaluationOutcome::fail(format!(
                "coverage {:.2} below {:.2} and no passing model score",
                coverage, COVERAGE_PASS
            ))
        };
        outcome = outcome
            .with_metric("coverage", coverage)
            .with_metric("keywords", keywords.len())
            .with_metric("matched", matched.len());
        if let Some(score) = model_score {
            outcome = outcome.with_metric("model_score", score);
        }
        outcome
    }

    async fn model_score(&self, brief: &str, script: &str) -> Option<u32> {
        let llm = self.llm.as_ref()?;
        let excerpt: String = script.chars().take(MAX_SCRIPT_CHARS).collect();
        let prompt = format!(
            "Creative brief:\n{}\n\nEdited script:\n{}\n\nScore (0-100):",
            brief, excerpt
        );
        match llm::complete(llm.as_ref(), ALIGNMENT_SYSTEM_PROMPT, &prompt).await {
            Ok(reply) => {
                let score = parse_score(&reply);
                if score.is_none() {
                    warn!("Alignment score reply was not a 0-100 integer: {:?}", reply);
                }
                score
            }
            Err(e) => {
                warn!("Alignment model call failed, using coverage only: {}", e);
                None
            }
        }
    }
}

async fn check_file(path: &Path) -> EvaluationOutcome {
    let display = path.display().to_string();
    match fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => EvaluationOutcome::pass()
            .with_metric("exists", true)
            .with_metric("size", meta.len())
            .with_metric("path", display),
        Ok(meta) => EvaluationOutcome::fail(format!("{} is empty", display))
            .with_metric("exists", true)
            .with_metric("size", meta.len())
            .with_metric("path", display),
        Err(_) => EvaluationOutcome::fail(format!("{} does not exist", display))
            .with_metric("exists", false)
            .with_metric("size", 0)
            .with_metric("path", display),
    }
}

async fn check_transcripts(dir: &Path) -> EvaluationOutcome {
    let display = dir.display().to_string();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => {
            return EvaluationOutcome::fail(format!("transcript directory {} does not exist", display))
                .with_metric("transcripts", 0)
                .with_metric("path", display);
        }
    };

    let mut count = 0u64;
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!("Stopped listing transcripts in {}: {}", dir.display(), e);
                break;
            }
        };
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("srt") {
            continue;
        }
        if let Ok(meta) = entry.metadata().await {
            if meta.is_file() && meta.len() > 0 {
                count += 1;
            }
        }
    }

    let outcome = if count > 0 {
        EvaluationOutcome::pass()
    } else {
        EvaluationOutcome::fail(format!("no transcripts produced in {}", display))
    };
    outcome
        .with_metric("transcripts", count)
        .with_metric("path", display)
}

/// Drop subtitle indices, timings and metric annotations.
fn spoken_text(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| !script_noise().iter().any(|re| re.is_match(line)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Distinct lowercase words of four or more letters, minus stop words.
fn brief_keywords(prompt: &str) -> BTreeSet<String> {
    prompt
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= 4)
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// First integer in the reply, if it lies within 0..=100.
fn parse_score(reply: &str) -> Option<u32> {
    let digits: String = reply
        .trim()
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse::<u32>().ok().filter(|score| *score <= 100)
}
