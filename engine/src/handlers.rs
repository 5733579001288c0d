//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - run: Execute a run request
//! - plan: Propose and validate a plan
//! - evaluate: Check stage outputs and prompt alignment
//! - history: Show the most recent run events
//! - report: Show the last run report
//! - doctor: Validate configuration and check dependencies

use anyhow::{Context, Result};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::conductor::memory::{read_event_log, RunMemory, EVENTS_KEY};
use crate::conductor::{Evaluator, Orchestrator, ProgressCallback, ProgressUpdate};
use crate::config::Config;
use crate::llm::ollama::OllamaProvider;
use crate::llm::LLMProvider;
use crate::tools::ToolRegistry;
use sdk::{RunMode, RunRequest, ToolKind};

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Build the generative model collaborator, if enabled.
///
/// Sampling options follow the brief when a request is given.
pub fn build_llm(
    config: &Config,
    no_model: bool,
    request: Option<&RunRequest>,
) -> Option<Arc<dyn LLMProvider>> {
    if no_model || !config.llm.enabled {
        return None;
    }
    let ollama = &config.llm.ollama;
    let mut provider = OllamaProvider::with_timeout(
        ollama.base_url.clone(),
        ollama.model.clone(),
        Duration::from_secs(ollama.timeout_secs),
    );
    if let Some(request) = request {
        provider = provider.with_tuning(&request.brief.tuning);
    }
    Some(Arc::new(provider))
}

fn load_request(path: &Path) -> Result<RunRequest> {
    RunRequest::load(path)
        .with_context(|| format!("Failed to load run request {}", path.display()))
}

/// Execute a run request
///
/// Returns whether the run succeeded so the caller can set the exit status.
pub async fn handle_run(
    request_path: PathBuf,
    mode: Option<RunMode>,
    config: &Config,
    no_model: bool,
    format: OutputFormat,
) -> Result<bool> {
    let mut request = load_request(&request_path)?;
    if let Some(mode) = mode {
        request.mode = mode;
    }

    let registry = ToolRegistry::from_config(config);
    let missing = registry.missing();
    if !missing.is_empty() {
        let names: Vec<&str> = missing.iter().map(ToolKind::as_str).collect();
        tracing::warn!("No command configured for: {}", names.join(", "));
    }

    let llm = build_llm(config, no_model, Some(&request));
    let mut orchestrator = Orchestrator::new(Arc::new(registry), llm)
        .with_settings(config.orchestrator.settings());
    if let OutputFormat::Text = format {
        let progress: ProgressCallback = Arc::new(|update: &ProgressUpdate| {
            println!("{}", update.ui_text);
        });
        orchestrator = orchestrator.with_progress(progress);
    }

    let outcome = orchestrator
        .run(&mut request)
        .await
        .context("Run could not be executed")?;

    match format {
        OutputFormat::Text => {
            println!();
            if outcome.success {
                println!("Run {} succeeded", outcome.report.run_id);
                if let Some(path) = &outcome.output_path {
                    println!("  Output: {}", path.display());
                }
                if let Some(alignment) = &outcome.report.alignment {
                    println!(
                        "  Alignment: {}",
                        if alignment.passed { "passed" } else { "failed" }
                    );
                }
            } else {
                println!("Run {} failed", outcome.report.run_id);
                for error in &outcome.errors {
                    println!("  Error: {}", error);
                }
                if let Some(step) = &outcome.report.resume_step {
                    println!("  Resume with: montage run {} --resume", request_path.display());
                    println!("  (will restart at step '{}')", step);
                }
            }
            println!("  Steps executed: {}", outcome.report.steps.len());
            println!("  Artifacts: {}", outcome.report.artifacts.len());
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&outcome.report)?);
        }
    }

    Ok(outcome.success)
}

/// Propose and validate a plan
pub async fn handle_plan(
    request_path: PathBuf,
    config: &Config,
    no_model: bool,
    format: OutputFormat,
) -> Result<()> {
    let request = load_request(&request_path)?;
    let llm = build_llm(config, no_model, Some(&request));
    let orchestrator = Orchestrator::new(Arc::new(ToolRegistry::empty()), llm);
    let (draft, validated) = orchestrator.plan(&request).await;

    match format {
        OutputFormat::Text => {
            println!("Plan for '{}' (source: {:?}):", request.project, draft.source);
            for (i, step) in validated.steps.iter().enumerate() {
                println!("  {}. {} ({})", i + 1, step.id, step.tool);
            }
            if !validated.repairs.is_empty() {
                println!();
                println!("Repairs:");
                for repair in &validated.repairs {
                    println!("  - {}", repair);
                }
            }
            if !validated.errors.is_empty() {
                println!();
                println!("Errors:");
                for error in &validated.errors {
                    println!("  - {}", error);
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "draft": draft,
                "validated": validated,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Check stage outputs already in the render directory
pub async fn handle_evaluate(
    request_path: PathBuf,
    tool: Option<String>,
    alignment: bool,
    config: &Config,
    no_model: bool,
    format: OutputFormat,
) -> Result<()> {
    let request = load_request(&request_path)?;
    let tools: Vec<String> = match tool {
        Some(name) => vec![name],
        None => ToolKind::ALL.iter().map(|k| k.as_str().to_string()).collect(),
    };

    let llm = if alignment {
        build_llm(config, no_model, Some(&request))
    } else {
        None
    };
    let evaluator = Evaluator::new(llm);

    let mut results = Vec::new();
    for name in &tools {
        let outcome = evaluator.evaluate_step(name, &request).await;
        results.push((name.clone(), outcome));
    }
    let alignment = if alignment {
        Some(evaluator.evaluate_alignment(&request).await)
    } else {
        None
    };

    match format {
        OutputFormat::Text => {
            println!("Evaluation of '{}':", request.project);
            for (name, outcome) in &results {
                let status = if outcome.passed { "PASS" } else { "FAIL" };
                match &outcome.reason {
                    Some(reason) => println!("  [{}] {}: {}", status, name, reason),
                    None => println!("  [{}] {}", status, name),
                }
            }
            if let Some(outcome) = &alignment {
                let status = if outcome.passed { "PASS" } else { "FAIL" };
                println!("  [{}] prompt alignment", status);
                for (key, value) in &outcome.metrics {
                    println!("      {}: {}", key, value);
                }
            }
        }
        OutputFormat::Json => {
            let steps: Vec<_> = results
                .iter()
                .map(|(name, outcome)| json!({ "tool": name, "outcome": outcome }))
                .collect();
            let output = json!({
                "project": request.project,
                "steps": steps,
                "alignment": alignment,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Show the most recent run events
pub async fn handle_history(
    render_dir: PathBuf,
    project: String,
    limit: usize,
    format: OutputFormat,
) -> Result<()> {
    let log_path = render_dir.join(format!("{}.{}", project, EVENTS_KEY));
    let events = read_event_log(&log_path)
        .await
        .with_context(|| format!("Failed to read event log {}", log_path.display()))?;
    let skip = events.len().saturating_sub(limit);
    let recent = &events[skip..];

    match format {
        OutputFormat::Text => {
            if recent.is_empty() {
                println!("No events in history");
                return Ok(());
            }

            println!("Event History (last {} events):", recent.len());
            println!();

            for event in recent {
                let step = event
                    .step
                    .map(|s| format!(" step {}", s + 1))
                    .unwrap_or_default();
                println!(
                    "#{} {} [{:?}] {:?}{}",
                    event.seq,
                    event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    event.level,
                    event.kind,
                    step
                );
                if let Some(message) = &event.message {
                    println!("  {}", message);
                }
            }
        }
        OutputFormat::Json => {
            let output = json!({
                "events": recent,
                "count": recent.len(),
                "limit": limit
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Show the last run report
pub async fn handle_report(render_dir: PathBuf, project: String, format: OutputFormat) -> Result<()> {
    let memory = RunMemory::open(&render_dir, &project, "report-viewer")
        .await
        .context("Failed to open render directory")?;
    let Some(report) = memory
        .load_report()
        .await
        .context("Failed to read run report")?
    else {
        println!("No run report for '{}' in {}", project, render_dir.display());
        return Ok(());
    };

    match format {
        OutputFormat::Text => {
            println!("Run {} ({})", report.run_id, report.project);
            println!(
                "  Status: {}",
                if report.success { "succeeded" } else { "failed" }
            );
            println!(
                "  Started: {}",
                report.started_at.format("%Y-%m-%d %H:%M:%S")
            );
            println!(
                "  Finished: {}",
                report.finished_at.format("%Y-%m-%d %H:%M:%S")
            );
            if let Some(path) = &report.output_path {
                println!("  Output: {}", path.display());
            }
            println!();
            println!("Steps:");
            for step in &report.steps {
                let repair = step
                    .repair_attempt
                    .map(|a| format!(" (repair {})", a))
                    .unwrap_or_default();
                println!(
                    "  {} {} {}{} {}ms",
                    if step.success { "ok  " } else { "FAIL" },
                    step.id,
                    step.tool,
                    repair,
                    step.duration_ms
                );
                if let Some(error) = &step.error {
                    println!("       {}", error);
                }
            }
            if !report.errors.is_empty() {
                println!();
                println!("Errors:");
                for error in &report.errors {
                    println!("  - {}", error);
                }
            }
            println!();
            println!("Artifacts:");
            for artifact in &report.artifacts {
                println!("  {}: {}", artifact.kind, artifact.path.display());
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

/// Validate configuration and check dependencies
pub async fn handle_doctor(config: &Config, no_model: bool, format: OutputFormat) -> Result<()> {
    let mut issues = Vec::new();
    let mut checks: Vec<(String, String)> = Vec::new();

    // Config is already validated when loaded
    checks.push(("Configuration".to_string(), "Valid".to_string()));

    // Generative model
    match build_llm(config, no_model, None) {
        Some(llm) => {
            if llm.check_health().await {
                checks.push(("Ollama".to_string(), "Available".to_string()));
            } else {
                checks.push(("Ollama".to_string(), "Not available".to_string()));
                issues.push(
                    "Ollama is not reachable; plans fall back to the canonical order".to_string(),
                );
            }
        }
        None => checks.push(("Ollama".to_string(), "Disabled".to_string())),
    }

    // Pipeline tools
    for kind in ToolKind::ALL {
        match config.tool(kind) {
            Some(tool) => {
                let status = match which_program(&tool.program) {
                    Some(path) => format!("{} ({})", tool.program, path.display()),
                    None => {
                        issues.push(format!(
                            "Program '{}' for {} was not found",
                            tool.program, kind
                        ));
                        format!("{} (not found)", tool.program)
                    }
                };
                checks.push((kind.as_str().to_string(), status));
            }
            None => {
                checks.push((kind.as_str().to_string(), "Not configured".to_string()));
                issues.push(format!("No [tools.{}] section in config", kind));
            }
        }
    }

    match format {
        OutputFormat::Text => {
            println!("Montage diagnostics:");
            println!();
            for (name, status) in &checks {
                println!("  {:<22} {}", name, status);
            }
            if issues.is_empty() {
                println!();
                println!("No issues found.");
            } else {
                println!();
                println!("Issues:");
                for issue in &issues {
                    println!("  - {}", issue);
                }
            }
        }
        OutputFormat::Json => {
            let checks: Vec<_> = checks
                .iter()
                .map(|(name, status)| json!({ "check": name, "status": status }))
                .collect();
            let output = json!({
                "checks": checks,
                "issues": issues,
                "healthy": issues.is_empty(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
    }

    Ok(())
}

/// Resolve a program name the way the OS would when spawning it
fn which_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
}
