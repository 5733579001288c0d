//! Conductor data model
//!
//! Plans, evaluation outcomes, run events and the documents persisted at the
//! end of a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use sdk::{GenerationTuning, QualityWeights, RunRequest, ToolKind};

/// Version written into every run report
pub const REPORT_VERSION: u32 = 1;

/// One step of a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,

    /// Tool name; only whitelisted names survive validation
    pub tool: String,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub inputs: Map<String, Value>,
}

impl PlanStep {
    pub fn new(id: impl Into<String>, tool: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tool: tool.into(),
            inputs: Map::new(),
        }
    }

    /// Step for `kind` using its default identifier
    pub fn canonical(kind: ToolKind) -> Self {
        Self::new(kind.default_step_id(), kind.as_str())
    }

    /// Whitelisted tool this step names, if any
    pub fn kind(&self) -> Option<ToolKind> {
        ToolKind::from_name(&self.tool)
    }
}

/// Where a proposed plan came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanSource {
    Model,
    Fallback,
}

/// A proposed, not yet validated, plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
    pub source: PlanSource,
}

impl Plan {
    /// The hard-coded nine step plan in canonical order
    pub fn canonical() -> Self {
        Self {
            steps: ToolKind::ALL.iter().copied().map(PlanStep::canonical).collect(),
            source: PlanSource::Fallback,
        }
    }
}

/// An executable plan plus the diagnostics gathered while producing it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedPlan {
    pub steps: Vec<PlanStep>,

    /// Human-readable notes about each change made to the draft
    pub repairs: Vec<String>,

    /// Non-empty when the validator fell back to canonical order
    pub errors: Vec<String>,

    pub repaired: bool,
}

impl ValidatedPlan {
    /// Index of the step with the given identifier
    pub fn position_of(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    /// Tool sequence of the plan
    pub fn tools(&self) -> Vec<ToolKind> {
        self.steps.iter().filter_map(PlanStep::kind).collect()
    }
}

/// Result of an evaluation check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationOutcome {
    pub passed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, Value>,
}

impl EvaluationOutcome {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
            metrics: BTreeMap::new(),
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metric(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metrics.insert(key.to_string(), value.into());
        self
    }
}

/// Kind of a durable run event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RunStart,
    PlanValidated,
    StepStart,
    StepComplete,
    StepError,
    EvaluationPass,
    EvaluationFail,
    ReplanStart,
    ReplanSuccess,
    ReplanFail,
    AlignmentEvaluated,
    RunAborted,
    RunComplete,
}

impl EventKind {
    /// Default severity of the event
    pub fn level(&self) -> EventLevel {
        match self {
            EventKind::StepError | EventKind::RunAborted => EventLevel::Error,
            EventKind::EvaluationFail | EventKind::ReplanStart | EventKind::ReplanFail => {
                EventLevel::Warn
            }
            _ => EventLevel::Info,
        }
    }
}

/// Severity of a run event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

/// One immutable record of the durable event log.
///
/// `seq` and `timestamp` are assigned by `RunMemory` when the event is
/// appended, which keeps the log strictly ordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub seq: u64,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub level: EventLevel,
    pub kind: EventKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Unsealed event handed to `RunMemory::record`
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub kind: EventKind,
    pub level: EventLevel,
    pub step: Option<usize>,
    pub message: Option<String>,
    pub data: Option<Value>,
}

impl EventDraft {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            level: kind.level(),
            step: None,
            message: None,
            data: None,
        }
    }

    pub fn step(mut self, index: usize) -> Self {
        self.step = Some(index);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Override the default severity of the kind
    pub fn level(mut self, level: EventLevel) -> Self {
        self.level = level;
        self
    }
}

/// Execution record of one tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub id: String,
    pub tool: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Repair attempt (1-3) this invocation belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repair_attempt: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationOutcome>,
}

/// A file the run is known to have produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub kind: String,
    pub path: PathBuf,
}

impl ArtifactRecord {
    pub fn new(kind: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            kind: kind.into(),
            path: path.into(),
        }
    }
}

/// Snapshot of the creative objectives a run started with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Objectives {
    pub prompt: String,
    pub weights: QualityWeights,
    pub temporal_expansion: u32,
    pub target_minutes: u32,
    pub tuning: GenerationTuning,
}

impl From<&RunRequest> for Objectives {
    fn from(request: &RunRequest) -> Self {
        Self {
            prompt: request.brief.prompt.clone(),
            weights: request.brief.weights,
            temporal_expansion: request.brief.temporal_expansion,
            target_minutes: request.target_minutes,
            tuning: request.brief.tuning,
        }
    }
}

/// Document written once when a run reaches a terminal state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub version: u32,
    pub run_id: String,
    pub project: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,

    pub objectives: Objectives,
    pub plan: Vec<PlanStep>,
    pub steps: Vec<StepRecord>,
    pub artifacts: Vec<ArtifactRecord>,

    #[serde(default)]
    pub errors: Vec<String>,

    /// Step a later `Resume` run should start from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_step: Option<String>,

    /// Tool of `resume_step`; stays valid when the next plan renames its steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_tool: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment: Option<EvaluationOutcome>,
}

/// Standalone artifact manifest document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub run_id: String,
    pub project: String,
    pub success: bool,
    pub artifacts: Vec<ArtifactRecord>,
}

/// What `Orchestrator::run` hands back to its caller
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub success: bool,
    pub output_path: Option<PathBuf>,
    pub errors: Vec<String>,
    pub report: RunReport,
}

/// Progress notification delivered synchronously to the caller
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub step_index: usize,
    pub total_steps: usize,
    /// Short text for a status line
    pub ui_text: String,
    /// Longer text for a log pane
    pub log_text: String,
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;
