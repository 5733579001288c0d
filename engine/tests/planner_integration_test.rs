//! Integration tests for planning against a mocked Ollama server
//!
//! Validates that:
//! - A model plan wrapped in prose is decoded and remapped onto the whitelist
//! - Every model failure mode yields the canonical plan
//! - Validation turns any proposal into the full nine step plan

mod common;

use std::sync::Arc;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use common::{mount_health, mount_ollama, ollama_at, request_in, temp_workspace};
use montage_engine::conductor::{Orchestrator, Plan, PlanSource, Planner};
use montage_engine::tools::ToolRegistry;
use sdk::ToolKind;

#[tokio::test]
async fn test_model_plan_is_decoded_and_remapped() {
    let server = MockServer::start().await;
    mount_ollama(
        &server,
        r#"Sure, here is a plan:
        {"steps": [
            {"id": "dedupe", "tool": "dedupe_takes"},
            {"id": "who", "tool": "speaker_analysis"},
            {"id": "cut", "tool": "fit_length", "inputs": {"tolerance": 0.05}},
            {"id": "out", "tool": "render"}
        ]}
        Let me know if you need anything else."#,
    )
    .await;
    let workspace = temp_workspace();
    let request = request_in(workspace.path());

    let plan = Planner::new(Some(ollama_at(&server))).propose(&request).await;

    assert_eq!(plan.source, PlanSource::Model);
    let tools: Vec<&str> = plan.steps.iter().map(|s| s.tool.as_str()).collect();
    assert_eq!(
        tools,
        vec!["take_processing", "speaker_analysis", "trim_to_length", "render"]
    );
    assert_eq!(plan.steps[2].id, "cut");
    assert_eq!(plan.steps[2].inputs["tolerance"], 0.05);
}

#[tokio::test]
async fn test_orchestrator_plan_fills_partial_model_plan() {
    let server = MockServer::start().await;
    mount_ollama(
        &server,
        r#"{"steps": [{"id": "out", "tool": "render"}, {"id": "cut", "tool": "trim_to_length"}]}"#,
    )
    .await;
    let workspace = temp_workspace();
    let request = request_in(workspace.path());
    let orchestrator = Orchestrator::new(Arc::new(ToolRegistry::empty()), Some(ollama_at(&server)));

    let (draft, validated) = orchestrator.plan(&request).await;

    assert_eq!(draft.steps.len(), 2);
    assert_eq!(validated.tools(), ToolKind::ALL.to_vec());
    assert!(validated.repaired);
    // model identifiers survive validation
    assert_eq!(validated.steps[7].id, "cut");
    assert_eq!(validated.steps[8].id, "out");
}

#[tokio::test]
async fn test_unhealthy_model_yields_canonical_plan() {
    let server = MockServer::start().await;
    mount_health(&server, 503).await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let workspace = temp_workspace();
    let request = request_in(workspace.path());

    let plan = Planner::new(Some(ollama_at(&server))).propose(&request).await;

    assert_eq!(plan, Plan::canonical());
}

#[tokio::test]
async fn test_garbage_reply_yields_canonical_plan() {
    let server = MockServer::start().await;
    mount_ollama(&server, "I would start with the takes, then maybe render?").await;
    let workspace = temp_workspace();
    let request = request_in(workspace.path());
    let planner = Planner::new(Some(ollama_at(&server)));

    let first = planner.propose(&request).await;
    let second = planner.propose(&request).await;

    assert_eq!(first, Plan::canonical());
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_empty_model_plan_yields_canonical_plan() {
    let server = MockServer::start().await;
    mount_ollama(&server, r#"{"steps": []}"#).await;
    let workspace = temp_workspace();
    let request = request_in(workspace.path());

    let plan = Planner::new(Some(ollama_at(&server))).propose(&request).await;

    assert_eq!(plan, Plan::canonical());
}

#[tokio::test]
async fn test_server_error_yields_canonical_plan() {
    let server = MockServer::start().await;
    mount_health(&server, 200).await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
        .mount(&server)
        .await;
    let workspace = temp_workspace();
    let request = request_in(workspace.path());

    let plan = Planner::new(Some(ollama_at(&server))).propose(&request).await;

    assert_eq!(plan.source, PlanSource::Fallback);
    assert_eq!(plan.steps.len(), 9);
}
