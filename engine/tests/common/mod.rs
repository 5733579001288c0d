//! Shared fixtures for engine integration tests
//!
//! `StageTool` stands in for a real pipeline stage: it records every call
//! and, depending on its behaviour, writes the file the evaluator looks for.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use montage_engine::llm::{ollama::OllamaProvider, LLMProvider};
use montage_engine::tools::ToolRegistry;
use sdk::{
    CreativeBrief, EngineError, GenerationTuning, PipelineTool, QualityWeights, RunMode,
    RunRequest, ToolKind,
};

pub type WritePredicate = Box<dyn Fn(&RunRequest) -> bool + Send + Sync>;

pub enum Behavior {
    /// Succeed and write the stage output
    Write,
    /// Succeed without writing anything
    Skip,
    /// Return a tool error
    Fail,
    /// Succeed, writing the output only when the predicate holds
    WriteWhen(WritePredicate),
}

/// Tunables observed by a tool at call time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observed {
    pub temporal_expansion: u32,
    pub target_minutes: u32,
}

pub struct StageTool {
    kind: ToolKind,
    behavior: Behavior,
    calls: Mutex<Vec<Observed>>,
}

impl StageTool {
    pub fn new(kind: ToolKind, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            kind,
            behavior,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<Observed> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PipelineTool for StageTool {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    async fn execute(&self, request: &RunRequest) -> Result<(), EngineError> {
        self.calls.lock().unwrap().push(Observed {
            temporal_expansion: request.brief.temporal_expansion,
            target_minutes: request.target_minutes,
        });

        let write = match &self.behavior {
            Behavior::Write => true,
            Behavior::Skip => false,
            Behavior::Fail => {
                return Err(EngineError::ToolError(format!(
                    "{} crashed",
                    self.kind
                )))
            }
            Behavior::WriteWhen(predicate) => predicate(request),
        };
        if write {
            write_stage_output(self.kind, request)?;
        }
        Ok(())
    }
}

/// Write the evidence a stage is expected to leave behind
pub fn write_stage_output(kind: ToolKind, request: &RunRequest) -> std::io::Result<()> {
    match kind {
        ToolKind::TakeProcessing => {
            let dir = request.transcripts_dir();
            std::fs::create_dir_all(&dir)?;
            std::fs::write(dir.join("take_01.srt"), subtitle(&request.brief.prompt))
        }
        ToolKind::Render => std::fs::write(request.output_path(), b"\x00\x00\x00\x18ftypmp42"),
        other => {
            let path = request
                .stage_output(other)
                .expect("every middle stage has an output file");
            std::fs::write(path, subtitle(&request.brief.prompt))
        }
    }
}

pub fn subtitle(text: &str) -> String {
    format!("1\n00:00:00,000 --> 00:00:04,000\n{}\n", text)
}

/// A request whose project root and render directory live under `dir`
pub fn request_in(dir: &Path) -> RunRequest {
    let project_root = dir.join("project");
    let render_dir = dir.join("render");
    std::fs::create_dir_all(&project_root).unwrap();
    std::fs::create_dir_all(&render_dir).unwrap();
    RunRequest {
        project: "harbor".to_string(),
        project_root,
        render_dir,
        brief: CreativeBrief {
            prompt: "Fishermen unloading the morning catch at the harbor".to_string(),
            weights: QualityWeights::default(),
            temporal_expansion: 4,
            tuning: GenerationTuning::default(),
        },
        target_minutes: 10,
        mode: RunMode::Full,
    }
}

/// Registry where every stage writes its output, except the overrides
pub fn registry_with(overrides: Vec<Arc<StageTool>>) -> ToolRegistry {
    let mut registry = ToolRegistry::empty();
    for kind in ToolKind::ALL {
        registry.register(StageTool::new(kind, Behavior::Write));
    }
    for tool in overrides {
        registry.register(tool);
    }
    registry
}

pub fn temp_workspace() -> TempDir {
    TempDir::new().unwrap()
}

/// Chat reply in the shape Ollama returns for a non-streaming request
pub fn chat_reply(content: &str) -> serde_json::Value {
    serde_json::json!({
        "model": "llama3.1:8b",
        "created_at": "2024-05-01T09:30:00.000000Z",
        "message": { "role": "assistant", "content": content },
        "done": true
    })
}

/// Mount a healthy `/api/tags` probe and a fixed `/api/chat` reply
pub async fn mount_ollama(server: &MockServer, content: &str) {
    mount_health(server, 200).await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply(content)))
        .mount(server)
        .await;
}

pub async fn mount_health(server: &MockServer, status: u16) {
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(status).set_body_json(serde_json::json!({ "models": [] })))
        .mount(server)
        .await;
}

pub fn ollama_at(server: &MockServer) -> Arc<dyn LLMProvider> {
    Arc::new(OllamaProvider::new(server.uri(), "llama3.1:8b"))
}
