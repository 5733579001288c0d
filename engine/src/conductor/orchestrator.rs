//! Orchestrator
//!
//! Drives one run: propose a plan, validate it, execute its steps strictly
//! one at a time, gate the trimmed script before render and repair it a
//! bounded number of times, then persist the run report and artifact
//! manifest. Every terminal path, success or failure, writes both documents
//! and a closing event before control returns to the caller.
//!
//! Tool faults are data, not errors: they end the run with `success = false`
//! in the returned outcome. `Err` is reserved for invalid requests and for
//! failures of the run's own persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::conductor::evaluator::Evaluator;
use crate::conductor::memory::{RunMemory, MANIFEST_KEY, PLAN_KEY, REPORT_KEY};
use crate::conductor::planner::Planner;
use crate::conductor::repair::{RepairSettings, RepairStrategy, TunablesGuard};
use crate::conductor::types::{
    ArtifactManifest, ArtifactRecord, EvaluationOutcome, EventDraft, EventKind, EventLevel,
    Objectives, Plan, PlanStep, ProgressCallback, ProgressUpdate, RunEvent, RunOutcome, RunReport,
    StepRecord, ValidatedPlan, REPORT_VERSION,
};
use crate::conductor::validator::PlanValidator;
use crate::llm::LLMProvider;
use crate::tools::ToolRegistry;
use sdk::{EngineError, RunMode, RunRequest, ToolKind};

/// Behaviour switches of the orchestrator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorSettings {
    pub repair: RepairSettings,

    /// Check every stage's output after it runs; only trim can fail the run
    pub gate_every_step: bool,

    /// Score prompt alignment after a successful run
    pub check_alignment: bool,
}

/// Result of a single tool invocation
enum Invocation {
    Completed,
    Failed(String),
}

/// Mutable bookkeeping of one run
struct RunState {
    memory: RunMemory,
    started_at: DateTime<Utc>,
    total_steps: usize,
    plan: Vec<PlanStep>,
    steps: Vec<StepRecord>,
    artifacts: Vec<ArtifactRecord>,
    errors: Vec<String>,
    resume_step: Option<String>,
    resume_tool: Option<String>,
    alignment: Option<EvaluationOutcome>,
}

impl RunState {
    async fn emit(&self, draft: EventDraft) -> Result<RunEvent, EngineError> {
        self.memory.record(draft).await
    }

    /// Add a manifest entry unless the same (kind, path) is already listed
    fn add_artifact(&mut self, record: ArtifactRecord) {
        if !self.artifacts.contains(&record) {
            self.artifacts.push(record);
        }
    }

    /// Record a failure and the step a later `Resume` starts from
    fn abort_at(&mut self, step: &PlanStep, reason: String) {
        self.errors.push(reason);
        self.resume_step = Some(step.id.clone());
        self.resume_tool = Some(step.tool.clone());
    }

    fn attach_evaluation(&mut self, outcome: &EvaluationOutcome) {
        if let Some(record) = self.steps.last_mut() {
            record.evaluation = Some(outcome.clone());
        }
    }
}

pub struct Orchestrator {
    registry: Arc<ToolRegistry>,
    planner: Planner,
    validator: PlanValidator,
    evaluator: Evaluator,
    settings: OrchestratorSettings,
    progress: Option<ProgressCallback>,
}

impl Orchestrator {
    /// Create an orchestrator; `llm` is shared by planning and alignment scoring.
    pub fn new(registry: Arc<ToolRegistry>, llm: Option<Arc<dyn LLMProvider>>) -> Self {
        Self {
            registry,
            planner: Planner::new(llm.clone()),
            validator: PlanValidator::new(),
            evaluator: Evaluator::new(llm),
            settings: OrchestratorSettings::default(),
            progress: None,
        }
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Receive a notification at the start and end of every tool invocation
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Propose and validate a plan without executing it
    pub async fn plan(&self, request: &RunRequest) -> (Plan, ValidatedPlan) {
        let draft = self.planner.propose(request).await;
        let validated = self.validator.validate(&draft);
        (draft, validated)
    }

    /// Execute one run.
    ///
    /// The request's temporal expansion factor and target length are the
    /// same on return as on entry.
    pub async fn run(&self, request: &mut RunRequest) -> Result<RunOutcome, EngineError> {
        request.validate()?;

        let run_id = Uuid::new_v4().to_string();
        let memory = RunMemory::open(&request.render_dir, &request.project, &run_id).await?;
        let previous = match request.mode {
            RunMode::Resume => match memory.load_report().await {
                Ok(report) => report,
                Err(e) => {
                    warn!("Previous run report is unreadable, starting over: {}", e);
                    None
                }
            },
            _ => None,
        };

        let mut state = RunState {
            memory,
            started_at: Utc::now(),
            total_steps: 0,
            plan: Vec::new(),
            steps: Vec::new(),
            artifacts: Vec::new(),
            errors: Vec::new(),
            resume_step: None,
            resume_tool: None,
            alignment: None,
        };
        state.add_artifact(ArtifactRecord::new(
            "event_log",
            state.memory.event_log_path(),
        ));

        info!("Starting run {} for project '{}'", run_id, request.project);
        state
            .emit(
                EventDraft::new(EventKind::RunStart)
                    .message(format!("run {} started", run_id))
                    .data(json!({
                        "project": request.project,
                        "mode": request.mode,
                        "target_minutes": request.target_minutes,
                        "temporal_expansion": request.brief.temporal_expansion,
                    })),
            )
            .await?;

        // Planning + validation
        let (draft, validated) = self.plan(request).await;
        let plan_path = state.memory.save_json(PLAN_KEY, &validated).await?;
        state.add_artifact(ArtifactRecord::new("plan", plan_path));
        state.plan = validated.steps.clone();
        state.total_steps = validated.steps.len();
        let ids: Vec<&str> = validated.steps.iter().map(|s| s.id.as_str()).collect();
        state
            .emit(
                EventDraft::new(EventKind::PlanValidated)
                    .message(format!("{} steps: {}", ids.len(), ids.join(", ")))
                    .data(json!({
                        "source": draft.source,
                        "steps": ids,
                        "repaired": validated.repaired,
                        "repairs": validated.repairs,
                        "errors": validated.errors,
                    })),
            )
            .await?;

        let start = match start_index(&request.mode, &validated, previous.as_ref()) {
            Ok(start) => start,
            Err(e) => {
                state.errors.push(e.to_string());
                return self.finish(state, request, false).await;
            }
        };
        if start > 0 {
            info!(
                "Resuming at step {} ('{}')",
                start + 1,
                validated.steps[start].id
            );
        }

        let trim_index = validated
            .steps
            .iter()
            .position(|s| s.kind() == Some(ToolKind::TrimToLength));
        let mut gate_passed = false;

        for index in start..validated.steps.len() {
            let step = &validated.steps[index];
            let kind = step.kind();

            // a run that starts past trim still gates the script left on disk
            if kind == Some(ToolKind::Render) && !gate_passed {
                let Some(trim_index) = trim_index else {
                    state.abort_at(step, "no 'trim_to_length' step in plan to gate render".to_string());
                    return self.finish(state, request, false).await;
                };
                info!("Checking the trimmed script before render");
                if let Err(reason) = self.gate(&mut state, trim_index, &validated, request).await? {
                    state.abort_at(&validated.steps[trim_index], reason);
                    return self.finish(state, request, false).await;
                }
                gate_passed = true;
            }

            if let Invocation::Failed(reason) =
                self.invoke(&mut state, index, step, request, None).await?
            {
                state.abort_at(
                    step,
                    format!("step '{}' ({}) failed: {}", step.id, step.tool, reason),
                );
                return self.finish(state, request, false).await;
            }

            if kind == Some(ToolKind::TrimToLength) {
                if let Err(reason) = self.gate(&mut state, index, &validated, request).await? {
                    state.abort_at(step, reason);
                    return self.finish(state, request, false).await;
                }
                gate_passed = true;
            } else if self.settings.gate_every_step {
                let outcome = self.evaluator.evaluate_step(&step.tool, request).await;
                self.record_evaluation(&mut state, index, &outcome).await?;
            }
        }

        self.finish(state, request, true).await
    }

    /// Invoke the tool of one step and record the result.
    async fn invoke(
        &self,
        state: &mut RunState,
        index: usize,
        step: &PlanStep,
        request: &RunRequest,
        repair_attempt: Option<u8>,
    ) -> Result<Invocation, EngineError> {
        let total = state.total_steps;
        let label = match repair_attempt {
            Some(attempt) => format!("{} (repair {})", step.tool, attempt),
            None => step.tool.clone(),
        };

        state
            .emit(
                EventDraft::new(EventKind::StepStart)
                    .step(index)
                    .message(format!("starting '{}' ({})", step.id, label))
                    .data(json!({
                        "id": step.id,
                        "tool": step.tool,
                        "repair_attempt": repair_attempt,
                    })),
            )
            .await?;
        self.notify(
            index,
            total,
            format!("[{}/{}] {}", index + 1, total, label),
            format!("Starting step '{}' with tool '{}'", step.id, label),
        );

        let started_at = Utc::now();
        let timer = Instant::now();
        let result = match self.registry.get(&step.tool) {
            Ok(tool) => tool.execute(request).await,
            Err(e) => Err(e),
        };
        let finished_at = Utc::now();
        let duration_ms = timer.elapsed().as_millis() as u64;

        let mut record = StepRecord {
            id: step.id.clone(),
            tool: step.tool.clone(),
            started_at,
            finished_at,
            duration_ms,
            success: result.is_ok(),
            error: None,
            repair_attempt,
            evaluation: None,
        };

        match result {
            Ok(()) => {
                state.steps.push(record);
                if let Some(kind) = step.kind() {
                    self.collect_artifact(state, kind, request).await;
                }
                state
                    .emit(
                        EventDraft::new(EventKind::StepComplete)
                            .step(index)
                            .message(format!("'{}' finished in {} ms", step.id, duration_ms))
                            .data(json!({ "duration_ms": duration_ms })),
                    )
                    .await?;
                self.notify(
                    index,
                    total,
                    format!("[{}/{}] {} done", index + 1, total, label),
                    format!("Step '{}' completed in {} ms", step.id, duration_ms),
                );
                Ok(Invocation::Completed)
            }
            Err(e) => {
                let reason = e.to_string();
                record.error = Some(reason.clone());
                state.steps.push(record);
                state
                    .emit(
                        EventDraft::new(EventKind::StepError)
                            .step(index)
                            .message(format!("'{}' failed: {}", step.id, reason))
                            .data(json!({
                                "duration_ms": duration_ms,
                                "recoverable": sdk::EngineErrorExt::is_recoverable(&e),
                            })),
                    )
                    .await?;
                self.notify(
                    index,
                    total,
                    format!("[{}/{}] {} failed", index + 1, total, label),
                    format!("Step '{}' failed after {} ms: {}", step.id, duration_ms, reason),
                );
                Ok(Invocation::Failed(reason))
            }
        }
    }

    /// Check the trimmed script and repair it when the check fails.
    ///
    /// The inner `Err` carries the reasons when the script could not be repaired.
    async fn gate(
        &self,
        state: &mut RunState,
        trim_index: usize,
        plan: &ValidatedPlan,
        request: &mut RunRequest,
    ) -> Result<Result<(), String>, EngineError> {
        let gate = self.evaluator.evaluate_gate(request).await;
        self.record_evaluation(state, trim_index, &gate).await?;
        if gate.passed {
            return Ok(Ok(()));
        }
        self.repair(state, trim_index, plan, request, &gate).await
    }

    /// Run the repair strategies in order until the gate passes.
    ///
    /// The inner `Err` carries the accumulated reasons when every attempt failed.
    async fn repair(
        &self,
        state: &mut RunState,
        trim_index: usize,
        plan: &ValidatedPlan,
        request: &mut RunRequest,
        gate: &EvaluationOutcome,
    ) -> Result<Result<(), String>, EngineError> {
        let mut reasons = vec![format!(
            "trim gate failed: {}",
            gate.reason.as_deref().unwrap_or("no reason given")
        )];

        for strategy in RepairStrategy::ORDER {
            let attempt = strategy.attempt();
            let mut guard = TunablesGuard::new(request);
            let adjustment = strategy.adjust(&mut guard, &self.settings.repair);

            info!(
                "Repair attempt {}/{} ({}): {}",
                attempt,
                RepairStrategy::ORDER.len(),
                strategy.as_str(),
                adjustment
            );
            state
                .emit(
                    EventDraft::new(EventKind::ReplanStart)
                        .step(trim_index)
                        .message(format!(
                            "repair attempt {} ({}): {}",
                            attempt,
                            strategy.as_str(),
                            adjustment
                        ))
                        .data(json!({
                            "attempt": attempt,
                            "strategy": strategy,
                            "temporal_expansion": guard.brief.temporal_expansion,
                            "target_minutes": guard.target_minutes,
                        })),
                )
                .await?;
            self.notify(
                trim_index,
                state.total_steps,
                format!("Repairing trim (attempt {})", attempt),
                format!("Repair attempt {} ({}): {}", attempt, strategy.as_str(), adjustment),
            );

            let mut fault = None;
            for &kind in strategy.tools() {
                let Some(index) = plan.steps.iter().position(|s| s.kind() == Some(kind)) else {
                    fault = Some(format!("no '{}' step in plan", kind));
                    break;
                };
                let step = &plan.steps[index];
                if let Invocation::Failed(reason) =
                    self.invoke(state, index, step, &guard, Some(attempt)).await?
                {
                    fault = Some(reason);
                    break;
                }
            }

            let outcome = match fault {
                Some(reason) => EvaluationOutcome::fail(reason),
                None => self.evaluator.evaluate_gate(&guard).await,
            };
            state.attach_evaluation(&outcome);
            drop(guard);

            if outcome.passed {
                info!("Repair attempt {} succeeded", attempt);
                state
                    .emit(
                        EventDraft::new(EventKind::ReplanSuccess)
                            .step(trim_index)
                            .message(format!("repair attempt {} passed the gate", attempt))
                            .data(json!({ "attempt": attempt, "strategy": strategy })),
                    )
                    .await?;
                return Ok(Ok(()));
            }

            let reason = outcome.reason.as_deref().unwrap_or("gate failed");
            warn!("Repair attempt {} failed: {}", attempt, reason);
            state
                .emit(
                    EventDraft::new(EventKind::ReplanFail)
                        .step(trim_index)
                        .message(format!("repair attempt {} failed: {}", attempt, reason))
                        .data(json!({ "attempt": attempt, "strategy": strategy })),
                )
                .await?;
            reasons.push(format!(
                "repair attempt {} ({}) failed: {}",
                attempt,
                strategy.as_str(),
                reason
            ));
        }

        Ok(Err(reasons.join("; ")))
    }

    async fn record_evaluation(
        &self,
        state: &mut RunState,
        index: usize,
        outcome: &EvaluationOutcome,
    ) -> Result<(), EngineError> {
        state.attach_evaluation(outcome);
        let (kind, message) = if outcome.passed {
            (EventKind::EvaluationPass, "evaluation passed".to_string())
        } else {
            (
                EventKind::EvaluationFail,
                format!(
                    "evaluation failed: {}",
                    outcome.reason.as_deref().unwrap_or("no reason given")
                ),
            )
        };
        state
            .emit(
                EventDraft::new(kind)
                    .step(index)
                    .message(message)
                    .data(serde_json::to_value(outcome)?),
            )
            .await?;
        Ok(())
    }

    /// Add the stage's output to the manifest when it exists on disk
    async fn collect_artifact(&self, state: &mut RunState, kind: ToolKind, request: &RunRequest) {
        let path = request
            .stage_output(kind)
            .unwrap_or_else(|| request.transcripts_dir());
        if fs::metadata(&path).await.is_ok() {
            state.add_artifact(ArtifactRecord::new(kind.artifact_kind(), path));
        } else {
            debug!("No output at {} after {}", path.display(), kind);
        }
    }

    /// Close the run: final event, report and manifest.
    async fn finish(
        &self,
        mut state: RunState,
        request: &RunRequest,
        success: bool,
    ) -> Result<RunOutcome, EngineError> {
        let output_path = success.then(|| request.output_path());

        if success {
            state.add_artifact(ArtifactRecord::new(
                ToolKind::Render.artifact_kind(),
                request.output_path(),
            ));

            if self.settings.check_alignment {
                let alignment = self.evaluator.evaluate_alignment(request).await;
                let level = if alignment.passed {
                    EventLevel::Info
                } else {
                    EventLevel::Warn
                };
                state
                    .emit(
                        EventDraft::new(EventKind::AlignmentEvaluated)
                            .level(level)
                            .message(format!(
                                "prompt alignment {}",
                                if alignment.passed { "passed" } else { "failed" }
                            ))
                            .data(serde_json::to_value(&alignment)?),
                    )
                    .await?;
                state.alignment = Some(alignment);
            }

            state
                .emit(
                    EventDraft::new(EventKind::RunComplete)
                        .message(format!("output written to {}", request.output_path().display()))
                        .data(json!({ "steps": state.steps.len() })),
                )
                .await?;
            info!(
                "Run {} completed: {}",
                state.memory.run_id(),
                request.output_path().display()
            );
        } else {
            state
                .emit(
                    EventDraft::new(EventKind::RunAborted)
                        .message(state.errors.join("; "))
                        .data(json!({
                            "resume_step": state.resume_step,
                            "resume_tool": state.resume_tool,
                        })),
                )
                .await?;
            warn!(
                "Run {} aborted: {}",
                state.memory.run_id(),
                state.errors.join("; ")
            );
        }

        state.add_artifact(ArtifactRecord::new(
            "report",
            state.memory.path_for(REPORT_KEY),
        ));
        state.add_artifact(ArtifactRecord::new(
            "manifest",
            state.memory.path_for(MANIFEST_KEY),
        ));

        let report = RunReport {
            version: REPORT_VERSION,
            run_id: state.memory.run_id().to_string(),
            project: request.project.clone(),
            started_at: state.started_at,
            finished_at: Utc::now(),
            success,
            output_path: output_path.clone(),
            objectives: Objectives::from(request),
            plan: state.plan,
            steps: state.steps,
            artifacts: state.artifacts,
            errors: state.errors,
            resume_step: state.resume_step,
            resume_tool: state.resume_tool,
            alignment: state.alignment,
        };
        let manifest = ArtifactManifest {
            run_id: report.run_id.clone(),
            project: report.project.clone(),
            success,
            artifacts: report.artifacts.clone(),
        };
        state.memory.save_json(REPORT_KEY, &report).await?;
        state.memory.save_json(MANIFEST_KEY, &manifest).await?;

        Ok(RunOutcome {
            success,
            output_path,
            errors: report.errors.clone(),
            report,
        })
    }

    fn notify(&self, step_index: usize, total_steps: usize, ui_text: String, log_text: String) {
        if let Some(callback) = &self.progress {
            callback(&ProgressUpdate {
                step_index,
                total_steps,
                ui_text,
                log_text,
            });
        }
    }
}

/// Index of the first step to execute for the run mode.
///
/// `Resume` locates the previous failure by tool, since a new plan may name
/// its steps differently; reports without a tool fall back to the step id.
fn start_index(
    mode: &RunMode,
    plan: &ValidatedPlan,
    previous: Option<&RunReport>,
) -> Result<usize, EngineError> {
    let locate = |step_id: &str| {
        plan.position_of(step_id)
            .ok_or_else(|| EngineError::StepNotFound(step_id.to_string()))
    };
    match mode {
        RunMode::Full => Ok(0),
        RunMode::ResumeFrom { step_id } => locate(step_id),
        RunMode::Resume => match previous {
            Some(report) if !report.success => {
                if let Some(tool) = &report.resume_tool {
                    if let Some(index) = plan.steps.iter().position(|s| &s.tool == tool) {
                        return Ok(index);
                    }
                }
                match &report.resume_step {
                    Some(step_id) => locate(step_id),
                    None => Ok(0),
                }
            }
            _ => Ok(0),
        },
    }
}
