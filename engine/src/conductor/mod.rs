//! Conductor System
//!
//! Plans, validates, executes, evaluates and repairs pipeline runs, and keeps
//! their durable event log.

pub mod evaluator;
pub mod memory;
pub mod orchestrator;
pub mod planner;
pub mod repair;
pub mod types;
pub mod validator;

pub use evaluator::Evaluator;
pub use memory::RunMemory;
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use planner::Planner;
pub use repair::{RepairSettings, RepairStrategy, TunablesGuard};
pub use types::{
    ArtifactManifest, ArtifactRecord, EvaluationOutcome, EventKind, EventLevel, Plan, PlanSource,
    PlanStep, ProgressCallback, ProgressUpdate, RunEvent, RunOutcome, RunReport, StepRecord,
    ValidatedPlan,
};
pub use validator::PlanValidator;
