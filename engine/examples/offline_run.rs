//! Example demonstrating a complete run without a model or external programs
//!
//! Every stage is an in-process tool that writes a placeholder file. The
//! trim stage produces nothing on its first call, so the run goes through
//! one repair attempt before it renders.
//!
//! Run with: cargo run --example offline_run

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use montage_engine::conductor::memory::read_event_log;
use montage_engine::conductor::{Orchestrator, ProgressUpdate};
use montage_engine::tools::ToolRegistry;
use sdk::{
    CreativeBrief, EngineError, GenerationTuning, PipelineTool, QualityWeights, RunMode,
    RunRequest, ToolKind,
};

struct PlaceholderStage {
    kind: ToolKind,
    calls: AtomicUsize,
}

#[async_trait]
impl PipelineTool for PlaceholderStage {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    async fn execute(&self, request: &RunRequest) -> Result<(), EngineError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let cue = format!(
            "1\n00:00:00,000 --> 00:00:03,000\n{}\n",
            request.brief.prompt
        );
        match self.kind {
            ToolKind::TakeProcessing => {
                let dir = request.transcripts_dir();
                std::fs::create_dir_all(&dir)?;
                std::fs::write(dir.join("take_01.srt"), cue)?;
            }
            // first trim leaves nothing behind
            ToolKind::TrimToLength if call == 0 => {}
            kind => {
                if let Some(path) = request.stage_output(kind) {
                    std::fs::write(path, cue)?;
                }
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let workspace = tempfile::tempdir()?;
    let mut request = RunRequest {
        project: "lighthouse".to_string(),
        project_root: workspace.path().join("sources"),
        render_dir: workspace.path().join("renders"),
        brief: CreativeBrief {
            prompt: "The keeper climbs the lighthouse at dusk".to_string(),
            weights: QualityWeights::default(),
            temporal_expansion: 4,
            tuning: GenerationTuning::default(),
        },
        target_minutes: 3,
        mode: RunMode::Full,
    };

    let mut registry = ToolRegistry::empty();
    for kind in ToolKind::ALL {
        registry.register(Arc::new(PlaceholderStage {
            kind,
            calls: AtomicUsize::new(0),
        }));
    }

    let orchestrator = Orchestrator::new(Arc::new(registry), None)
        .with_progress(Arc::new(|update: &ProgressUpdate| println!("{}", update.ui_text)));
    let outcome = orchestrator.run(&mut request).await?;

    println!("\nSuccess: {}", outcome.success);
    if let Some(path) = &outcome.output_path {
        println!("Output: {}", path.display());
    }

    println!("\nEvent log:");
    let events = read_event_log(&request.render_file("events.jsonl")).await?;
    for event in events {
        println!(
            "  #{:<3} {:?} {}",
            event.seq,
            event.kind,
            event.message.unwrap_or_default()
        );
    }

    Ok(())
}
