//! Example demonstrating the PipelineTool trait
//!
//! This example implements a trim stage that cuts a subtitle script down to
//! the number of cues that fit the request's target length, and writes the
//! result where the engine expects the trimmed script.
//!
//! Run with: cargo run -p sdk --example pipeline_tool_example

use async_trait::async_trait;
use sdk::{
    CreativeBrief, EngineError, EngineErrorExt, GenerationTuning, PipelineTool, QualityWeights,
    RunMode, RunRequest, ToolKind,
};

/// Seconds of screen time assumed per subtitle cue
const SECONDS_PER_CUE: u32 = 4;

struct CueTrimmer;

#[async_trait]
impl PipelineTool for CueTrimmer {
    fn name(&self) -> &str {
        ToolKind::TrimToLength.as_str()
    }

    async fn execute(&self, request: &RunRequest) -> Result<(), EngineError> {
        let input = request.render_file("expanded.srt");
        let output = request
            .stage_output(ToolKind::TrimToLength)
            .ok_or_else(|| EngineError::ToolError("trim has no output path".to_string()))?;

        let script = std::fs::read_to_string(&input)?;
        let budget = (request.target_minutes * 60 / SECONDS_PER_CUE) as usize;
        let cues: Vec<&str> = script
            .split("\n\n")
            .filter(|cue| !cue.trim().is_empty())
            .take(budget)
            .collect();

        println!(
            "Keeping {} cue(s) for a {} minute cut",
            cues.len(),
            request.target_minutes
        );
        std::fs::write(output, cues.join("\n\n"))?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let render_dir = std::env::temp_dir().join("montage-sdk-example");
    std::fs::create_dir_all(&render_dir)?;

    let request = RunRequest {
        project: "ferry".to_string(),
        project_root: render_dir.clone(),
        render_dir: render_dir.clone(),
        brief: CreativeBrief {
            prompt: "The last ferry crossing before the storm".to_string(),
            weights: QualityWeights::default(),
            temporal_expansion: 4,
            tuning: GenerationTuning::default(),
        },
        target_minutes: 1,
        mode: RunMode::Full,
    };
    request.validate()?;

    let mut script = String::new();
    for i in 0..30 {
        script.push_str(&format!(
            "{}\n00:00:{:02},000 --> 00:00:{:02},000\nLine {}\n\n",
            i + 1,
            i,
            i + 1,
            i + 1
        ));
    }
    std::fs::write(request.render_file("expanded.srt"), script)?;

    let tool = CueTrimmer;
    match tool.execute(&request).await {
        Ok(()) => println!(
            "Wrote {}",
            request
                .stage_output(ToolKind::TrimToLength)
                .unwrap_or_default()
                .display()
        ),
        Err(e) => {
            eprintln!("{} failed: {}", tool.name(), e);
            eprintln!("Hint: {}", e.user_hint());
        }
    }

    Ok(())
}
