//! Conductor Planner
//!
//! Proposes the ordered list of pipeline steps for a run. When a generative
//! model is available it is asked for a plan; anything that goes wrong on
//! that path (no model, unhealthy model, undecodable reply, empty plan)
//! yields the canonical nine step plan instead. `propose` never fails.

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::conductor::types::{Plan, PlanSource, PlanStep};
use crate::llm::{self, LLMProvider};
use sdk::{RunRequest, ToolKind};

const PLANNER_SYSTEM_PROMPT: &str = "You are the planner of a video editing pipeline. \
Respond with ONLY a JSON object of the form \
{\"steps\": [{\"id\": \"string\", \"tool\": \"string\", \"inputs\": {}}]}. \
No markdown, no explanation, no text before or after the object.";

/// Keyword heuristics applied, in order, to tool names outside the whitelist.
///
/// Order matters: "novelty_rerank" and "rank_ordering" both contain "rank".
const TOOL_KEYWORDS: &[(&str, ToolKind)] = &[
    ("take", ToolKind::TakeProcessing),
    ("dup", ToolKind::TakeProcessing),
    ("speak", ToolKind::SpeakerAnalysis),
    ("novel", ToolKind::NoveltyRerank),
    ("order", ToolKind::RankOrdering),
    ("rank", ToolKind::TranscriptRanking),
    ("transcript", ToolKind::TranscriptRanking),
    ("dialog", ToolKind::DialogueSequencing),
    ("expan", ToolKind::TemporalExpansion),
    ("tempor", ToolKind::TemporalExpansion),
    ("trim", ToolKind::TrimToLength),
    ("length", ToolKind::TrimToLength),
];

/// Intermediate deserialization type for LLM JSON output
#[derive(Debug, Deserialize)]
struct RawPlan {
    steps: Vec<RawPlanStep>,
}

#[derive(Debug, Deserialize)]
struct RawPlanStep {
    id: Option<String>,
    #[serde(alias = "name")]
    tool: String,
    #[serde(default)]
    inputs: Map<String, Value>,
}

pub struct Planner {
    llm: Option<Arc<dyn LLMProvider>>,
}

impl Planner {
    pub fn new(llm: Option<Arc<dyn LLMProvider>>) -> Self {
        Self { llm }
    }

    /// Planner that always returns the canonical plan
    pub fn offline() -> Self {
        Self { llm: None }
    }

    /// Propose a plan for the request.
    pub async fn propose(&self, request: &RunRequest) -> Plan {
        let Some(llm) = &self.llm else {
            debug!("No generative model configured, using canonical plan");
            return Plan::canonical();
        };

        let prompt = task_prompt(request);
        let content = match llm::complete(llm.as_ref(), PLANNER_SYSTEM_PROMPT, &prompt).await {
            Ok(content) => content,
            Err(e) => {
                warn!("Planner model call failed ({}), using canonical plan", e);
                return Plan::canonical();
            }
        };

        match parse_steps(&content) {
            Ok(steps) if !steps.is_empty() => {
                info!("Model proposed a {}-step plan", steps.len());
                Plan {
                    steps,
                    source: PlanSource::Model,
                }
            }
            Ok(_) => {
                warn!("Model proposed an empty plan, using canonical plan");
                Plan::canonical()
            }
            Err(e) => {
                warn!("Failed to parse model plan output ({:#}), using canonical plan", e);
                Plan::canonical()
            }
        }
    }
}

fn task_prompt(request: &RunRequest) -> String {
    let tools: Vec<&str> = ToolKind::ALL.iter().map(ToolKind::as_str).collect();
    format!(
        "Plan the processing steps for a {}-minute video.\n\
        Creative brief: {}\n\
        Use only these tools, each exactly once: {}.\n\
        Return the JSON object now.",
        request.target_minutes,
        request.brief.prompt,
        tools.join(", ")
    )
}

/// Decode the first JSON object in a model reply into plan steps.
fn parse_steps(content: &str) -> Result<Vec<PlanStep>> {
    let fragment =
        llm::first_json_object(content).context("No JSON object found in planner output")?;
    let raw: RawPlan =
        serde_json::from_str(fragment).context("Failed to parse plan steps JSON")?;

    let steps = raw
        .steps
        .into_iter()
        .enumerate()
        .map(|(i, step)| {
            let kind = remap_tool(&step.tool);
            if kind.as_str() != step.tool {
                debug!("Remapped proposed tool '{}' to '{}'", step.tool, kind);
            }
            PlanStep {
                id: step.id.unwrap_or_else(|| format!("step_{}", i + 1)),
                tool: kind.as_str().to_string(),
                inputs: step.inputs,
            }
        })
        .collect();

    Ok(steps)
}

/// Map any proposed tool name onto the whitelist.
///
/// Exact names pass through; anything else goes through the keyword table
/// and finally defaults to render.
pub fn remap_tool(name: &str) -> ToolKind {
    if let Some(kind) = ToolKind::from_name(name) {
        return kind;
    }
    let lowered = name.to_lowercase();
    TOOL_KEYWORDS
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
        .map(|(_, kind)| *kind)
        .unwrap_or(ToolKind::Render)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_steps_valid_json() {
        let json = r#"{"steps": [
            {"id": "a", "tool": "take_processing"},
            {"id": "b", "tool": "speaker_analysis", "inputs": {"max_speakers": 3}},
            {"id": "c", "tool": "render"}
        ]}"#;

        let steps = parse_steps(json).unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].id, "a");
        assert_eq!(steps[1].tool, "speaker_analysis");
        assert_eq!(steps[1].inputs["max_speakers"], 3);
        assert_eq!(steps[2].kind(), Some(ToolKind::Render));
    }

    #[test]
    fn test_parse_steps_with_prose_wrapper() {
        let json = r#"Here is the plan:
        {"steps": [{"tool": "trim_to_length"}]}
        Hope this helps!"#;

        let steps = parse_steps(json).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].id, "step_1");
        assert_eq!(steps[0].tool, "trim_to_length");
    }

    #[test]
    fn test_parse_steps_rejects_garbage() {
        assert!(parse_steps("I cannot help with that").is_err());
        assert!(parse_steps(r#"{"plan": []}"#).is_err());
    }

    #[test]
    fn test_remap_tool_keywords() {
        assert_eq!(remap_tool("speaker_diarize"), ToolKind::SpeakerAnalysis);
        assert_eq!(remap_tool("dedupe_takes"), ToolKind::TakeProcessing);
        assert_eq!(remap_tool("novelty_rank"), ToolKind::NoveltyRerank);
        assert_eq!(remap_tool("order_by_rank"), ToolKind::RankOrdering);
        assert_eq!(remap_tool("Rank_Transcripts"), ToolKind::TranscriptRanking);
        assert_eq!(remap_tool("dialogue"), ToolKind::DialogueSequencing);
        assert_eq!(remap_tool("expand_context"), ToolKind::TemporalExpansion);
        assert_eq!(remap_tool("fit_length"), ToolKind::TrimToLength);
        assert_eq!(remap_tool("color_grade"), ToolKind::Render);
    }

    #[tokio::test]
    async fn test_offline_planner_returns_canonical() {
        let request: RunRequest = serde_json::from_str(
            r#"{"project": "p", "project_root": "/p", "render_dir": "/r",
                "brief": {"prompt": "x"}, "target_minutes": 2}"#,
        )
        .unwrap();
        let planner = Planner::offline();
        let first = planner.propose(&request).await;
        let second = planner.propose(&request).await;
        assert_eq!(first, Plan::canonical());
        assert_eq!(first, second);
    }
}
