//! Run request and pipeline tool types
//!
//! A `RunRequest` is the single input every pipeline tool receives. It names
//! the project, where its sources live, where renders go, and the creative
//! brief that steers every stage.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::errors::EngineError;

/// The nine pipeline stages, declared in canonical order.
///
/// The declaration order is the precedence relation: a stage may only run
/// after every stage declared before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Duplicate-take detection and transcript production
    TakeProcessing,
    /// Speaker and shot tagging
    SpeakerAnalysis,
    /// Transcript segment ranking
    TranscriptRanking,
    /// Ordering of ranked segments
    RankOrdering,
    /// Novelty re-ranking
    NoveltyRerank,
    /// Dialogue sequencing
    DialogueSequencing,
    /// Temporal expansion around selected segments
    TemporalExpansion,
    /// Trimming the script to the target length
    TrimToLength,
    /// Final render
    Render,
}

impl ToolKind {
    /// All tools in canonical order.
    pub const ALL: [ToolKind; 9] = [
        ToolKind::TakeProcessing,
        ToolKind::SpeakerAnalysis,
        ToolKind::TranscriptRanking,
        ToolKind::RankOrdering,
        ToolKind::NoveltyRerank,
        ToolKind::DialogueSequencing,
        ToolKind::TemporalExpansion,
        ToolKind::TrimToLength,
        ToolKind::Render,
    ];

    /// Registry name of the tool
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::TakeProcessing => "take_processing",
            ToolKind::SpeakerAnalysis => "speaker_analysis",
            ToolKind::TranscriptRanking => "transcript_ranking",
            ToolKind::RankOrdering => "rank_ordering",
            ToolKind::NoveltyRerank => "novelty_rerank",
            ToolKind::DialogueSequencing => "dialogue_sequencing",
            ToolKind::TemporalExpansion => "temporal_expansion",
            ToolKind::TrimToLength => "trim_to_length",
            ToolKind::Render => "render",
        }
    }

    /// Resolve an exact registry name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == name)
    }

    /// Position in the canonical order (0-based)
    pub fn canonical_index(&self) -> usize {
        *self as usize
    }

    /// Step identifier used when the tool is inserted into a plan.
    pub fn default_step_id(&self) -> &'static str {
        match self {
            ToolKind::TakeProcessing => "takes",
            ToolKind::SpeakerAnalysis => "speakers",
            ToolKind::TranscriptRanking => "ranking",
            ToolKind::RankOrdering => "ordering",
            ToolKind::NoveltyRerank => "novelty",
            ToolKind::DialogueSequencing => "dialogue",
            ToolKind::TemporalExpansion => "expansion",
            ToolKind::TrimToLength => "trim",
            ToolKind::Render => "render",
        }
    }

    /// File name suffix of the intermediate file this stage writes into the
    /// render directory, as `{project}.{suffix}`.
    ///
    /// Take processing writes transcripts under the project root and render
    /// writes the output video, so neither has a suffix.
    pub fn output_suffix(&self) -> Option<&'static str> {
        match self {
            ToolKind::TakeProcessing | ToolKind::Render => None,
            ToolKind::SpeakerAnalysis => Some("speaker.meta.json"),
            ToolKind::TranscriptRanking => Some("ranked.srt"),
            ToolKind::RankOrdering => Some("ordered.srt"),
            ToolKind::NoveltyRerank => Some("novelty.srt"),
            ToolKind::DialogueSequencing => Some("dialogue.srt"),
            ToolKind::TemporalExpansion => Some("expanded.srt"),
            ToolKind::TrimToLength => Some("trim.srt"),
        }
    }

    /// Manifest kind recorded for this stage's output.
    pub fn artifact_kind(&self) -> &'static str {
        match self {
            ToolKind::TakeProcessing => "transcripts",
            ToolKind::SpeakerAnalysis => "speaker_metadata",
            ToolKind::TranscriptRanking => "ranked_script",
            ToolKind::RankOrdering => "ordered_script",
            ToolKind::NoveltyRerank => "novelty_script",
            ToolKind::DialogueSequencing => "dialogue_script",
            ToolKind::TemporalExpansion => "expanded_script",
            ToolKind::TrimToLength => "trim_script",
            ToolKind::Render => "render_output",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| EngineError::ToolNotFound(s.to_string()))
    }
}

/// Four 0-100 quality weights steering the ranking stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityWeights {
    pub coherence: u8,
    pub novelty: u8,
    pub emotion: u8,
    pub pacing: u8,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            coherence: 50,
            novelty: 50,
            emotion: 50,
            pacing: 50,
        }
    }
}

/// Sampling parameters forwarded to generative stages
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationTuning {
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for GenerationTuning {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            repetition_penalty: default_repetition_penalty(),
            seed: None,
        }
    }
}

fn default_temperature() -> f32 {
    0.7
}

fn default_top_p() -> f32 {
    0.9
}

fn default_repetition_penalty() -> f32 {
    1.1
}

/// The creative brief for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreativeBrief {
    /// Free-text description of the desired video
    pub prompt: String,

    #[serde(default)]
    pub weights: QualityWeights,

    /// How many neighbouring lines temporal expansion pulls in around a pick
    #[serde(default = "default_temporal_expansion")]
    pub temporal_expansion: u32,

    #[serde(default)]
    pub tuning: GenerationTuning,
}

fn default_temporal_expansion() -> u32 {
    4
}

/// How a run picks its first step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunMode {
    /// Execute the whole plan
    #[default]
    Full,
    /// Continue from where the previous run stopped
    Resume,
    /// Start at the step with the given identifier
    ResumeFrom { step_id: String },
}

/// Per-run input handed to every pipeline tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Project name; used as the file stem of every render artifact
    pub project: String,

    /// Root directory of the project sources
    pub project_root: PathBuf,

    /// Directory receiving intermediate files, logs and the output video
    pub render_dir: PathBuf,

    pub brief: CreativeBrief,

    /// Desired output length in minutes
    pub target_minutes: u32,

    #[serde(default)]
    pub mode: RunMode,
}

impl RunRequest {
    /// Path of a `{project}.{suffix}` file in the render directory
    pub fn render_file(&self, suffix: &str) -> PathBuf {
        self.render_dir.join(format!("{}.{}", self.project, suffix))
    }

    /// Deterministic path of the final output video
    pub fn output_path(&self) -> PathBuf {
        self.render_file("final.mp4")
    }

    /// Directory where take processing writes its transcripts
    pub fn transcripts_dir(&self) -> PathBuf {
        self.project_root.join("transcripts")
    }

    /// Deterministic output path of a stage, if it has one
    pub fn stage_output(&self, tool: ToolKind) -> Option<PathBuf> {
        match tool {
            ToolKind::Render => Some(self.output_path()),
            other => other.output_suffix().map(|suffix| self.render_file(suffix)),
        }
    }

    /// Check field ranges before a run starts.
    pub fn validate(&self) -> Result<(), EngineError> {
        let project = self.project.trim();
        if project.is_empty() {
            return Err(EngineError::InvalidRequest(
                "project name must not be empty".to_string(),
            ));
        }
        if project.contains(['/', '\\']) || project == "." || project == ".." {
            return Err(EngineError::InvalidRequest(format!(
                "project name '{}' must not contain path separators",
                self.project
            )));
        }
        if self.target_minutes == 0 {
            return Err(EngineError::InvalidRequest(
                "target_minutes must be at least 1".to_string(),
            ));
        }

        let w = &self.brief.weights;
        for (name, value) in [
            ("coherence", w.coherence),
            ("novelty", w.novelty),
            ("emotion", w.emotion),
            ("pacing", w.pacing),
        ] {
            if value > 100 {
                return Err(EngineError::InvalidRequest(format!(
                    "weight '{}' must be between 0 and 100, got {}",
                    name, value
                )));
            }
        }

        let t = &self.brief.tuning;
        if !(0.0..=2.0).contains(&t.temperature) {
            return Err(EngineError::InvalidRequest(
                "temperature must be between 0.0 and 2.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&t.top_p) {
            return Err(EngineError::InvalidRequest(
                "top_p must be between 0.0 and 1.0".to_string(),
            ));
        }
        if t.repetition_penalty <= 0.0 {
            return Err(EngineError::InvalidRequest(
                "repetition_penalty must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Load a request from a JSON document on disk
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let contents = std::fs::read_to_string(path)?;
        let request: RunRequest = serde_json::from_str(&contents)?;
        request.validate()?;
        Ok(request)
    }
}
