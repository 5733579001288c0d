//! External pipeline stage
//!
//! Runs a configured program as one pipeline stage. Arguments may contain
//! `{placeholders}` filled from the run request. The process runs without a
//! shell, with stdin closed, under a timeout; a non-zero exit status becomes
//! a tool error carrying the tail of stderr.

use async_trait::async_trait;
use regex::{Captures, Regex};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::ToolConfig;
use sdk::{EngineError, PipelineTool, RunRequest, ToolKind};

/// Characters of stderr kept in a tool error
const STDERR_TAIL_CHARS: usize = 2000;

#[derive(Debug, Clone)]
pub struct ExternalTool {
    kind: ToolKind,
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl ExternalTool {
    pub fn new(kind: ToolKind, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            kind,
            program: program.into(),
            args,
            working_dir: None,
            timeout: Duration::from_secs(3600),
        }
    }

    pub fn from_config(kind: ToolKind, config: &ToolConfig) -> Self {
        Self {
            kind,
            program: config.program.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
            timeout: config.timeout(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Arguments with every placeholder filled from the request
    pub fn render_args(&self, request: &RunRequest) -> Vec<String> {
        let output = request
            .stage_output(self.kind)
            .unwrap_or_else(|| request.transcripts_dir());
        let values = placeholder_values(request, &output);
        self.args
            .iter()
            .map(|arg| substitute(arg, &values))
            .collect()
    }
}

#[async_trait]
impl PipelineTool for ExternalTool {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    async fn execute(&self, request: &RunRequest) -> Result<(), EngineError> {
        let args = self.render_args(request);
        info!("Running {}: {} {}", self.kind, self.program, args.join(" "));

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|e| {
            EngineError::ToolError(format!(
                "{}: failed to start '{}': {}",
                self.kind, self.program, e
            ))
        })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| {
                EngineError::ToolError(format!("{}: failed to collect output: {}", self.kind, e))
            })?,
            Err(_) => {
                warn!(
                    "{} timed out after {} seconds",
                    self.kind,
                    self.timeout.as_secs()
                );
                return Err(EngineError::ToolTimeout {
                    tool: self.kind.as_str().to_string(),
                    secs: self.timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!("{} stdout: {}", self.kind, stdout.trim_end());
        }

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(EngineError::ToolError(format!(
                "{} exited with {}: {}",
                self.kind,
                output.status,
                tail(stderr.trim_end(), STDERR_TAIL_CHARS)
            )))
        }
    }
}

fn placeholder_values(request: &RunRequest, output: &std::path::Path) -> Vec<(&'static str, String)> {
    let brief = &request.brief;
    let tuning = &brief.tuning;
    vec![
        ("project", request.project.clone()),
        ("project_root", request.project_root.display().to_string()),
        ("render_dir", request.render_dir.display().to_string()),
        ("output", output.display().to_string()),
        ("prompt", brief.prompt.clone()),
        ("target_minutes", request.target_minutes.to_string()),
        ("temporal_expansion", brief.temporal_expansion.to_string()),
        ("temperature", tuning.temperature.to_string()),
        ("top_p", tuning.top_p.to_string()),
        ("repetition_penalty", tuning.repetition_penalty.to_string()),
        (
            "seed",
            tuning.seed.map(|s| s.to_string()).unwrap_or_default(),
        ),
        ("weight_coherence", brief.weights.coherence.to_string()),
        ("weight_novelty", brief.weights.novelty.to_string()),
        ("weight_emotion", brief.weights.emotion.to_string()),
        ("weight_pacing", brief.weights.pacing.to_string()),
    ]
}

static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();

fn placeholder() -> &'static Regex {
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{(\w+)\}").expect("Invalid placeholder pattern"))
}

/// Replace `{name}` occurrences in one pass; unknown names are left untouched.
///
/// Substituted values are never scanned again.
fn substitute(arg: &str, values: &[(&'static str, String)]) -> String {
    placeholder()
        .replace_all(arg, |caps: &Captures| {
            values
                .iter()
                .find(|(name, _)| *name == &caps[1])
                .map(|(_, value)| value.clone())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let start = text
        .char_indices()
        .nth(count - max_chars)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::{CreativeBrief, GenerationTuning, QualityWeights, RunMode};

    fn request() -> RunRequest {
        RunRequest {
            project: "harbor".to_string(),
            project_root: PathBuf::from("/projects/harbor"),
            render_dir: PathBuf::from("/renders"),
            brief: CreativeBrief {
                prompt: "quiet morning".to_string(),
                weights: QualityWeights {
                    coherence: 80,
                    novelty: 20,
                    emotion: 50,
                    pacing: 65,
                },
                temporal_expansion: 6,
                tuning: GenerationTuning {
                    seed: Some(7),
                    ..GenerationTuning::default()
                },
            },
            target_minutes: 3,
            mode: RunMode::Full,
        }
    }

    #[test]
    fn test_render_args_substitutes_placeholders() {
        let tool = ExternalTool::new(
            ToolKind::TrimToLength,
            "trim",
            vec![
                "--out={output}".to_string(),
                "{target_minutes}".to_string(),
                "--seed".to_string(),
                "{seed}".to_string(),
                "{weight_pacing}/{weight_coherence}".to_string(),
                "{unknown}".to_string(),
            ],
        );
        let args = tool.render_args(&request());
        assert_eq!(
            args,
            vec![
                "--out=/renders/harbor.trim.srt",
                "3",
                "--seed",
                "7",
                "65/80",
                "{unknown}"
            ]
        );
    }

    #[test]
    fn test_placeholders_inside_values_are_not_expanded() {
        let mut request = request();
        request.brief.prompt = "use {seed} and {output} literally".to_string();
        let tool = ExternalTool::new(
            ToolKind::Render,
            "render",
            vec!["{prompt}".to_string(), "{seed}{prompt}".to_string()],
        );
        assert_eq!(
            tool.render_args(&request),
            vec![
                "use {seed} and {output} literally",
                "7use {seed} and {output} literally"
            ]
        );
    }

    #[test]
    fn test_take_processing_output_is_transcripts_dir() {
        let tool = ExternalTool::new(ToolKind::TakeProcessing, "takes", vec!["{output}".into()]);
        assert_eq!(tool.render_args(&request()), vec!["/projects/harbor/transcripts"]);
    }

    #[test]
    fn test_tail_keeps_end() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("abc", 10), "abc");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_success_and_failure() {
        let ok = ExternalTool::new(ToolKind::Render, "true", vec![]);
        assert!(ok.execute(&request()).await.is_ok());

        let failing = ExternalTool::new(
            ToolKind::Render,
            "sh",
            vec!["-c".into(), "echo broken pipe >&2; exit 3".into()],
        );
        match failing.execute(&request()).await {
            Err(EngineError::ToolError(message)) => assert!(message.contains("broken pipe")),
            other => panic!("expected tool error, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_times_out() {
        let slow = ExternalTool::new(ToolKind::Render, "sleep", vec!["5".into()])
            .with_timeout(Duration::from_millis(100));
        assert!(matches!(
            slow.execute(&request()).await,
            Err(EngineError::ToolTimeout { secs: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_program_is_tool_error() {
        let missing = ExternalTool::new(ToolKind::Render, "montage-no-such-program", vec![]);
        assert!(matches!(
            missing.execute(&request()).await,
            Err(EngineError::ToolError(_))
        ));
    }
}
