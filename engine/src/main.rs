// Montage video pipeline orchestrator
// Main entry point for the montage binary

use clap::Parser;
use montage_engine::cli::{Cli, Command};
use montage_engine::config::Config;
use montage_engine::handlers::{
    handle_doctor, handle_evaluate, handle_history, handle_plan, handle_report, handle_run,
    OutputFormat,
};
use montage_engine::telemetry::{effective_level, init_telemetry_with_level};
use sdk::RunMode;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    // Load configuration (or use custom path if provided)
    let config = match &cli.config {
        Some(config_path) => Config::load_or_create_at(config_path)?,
        None => Config::load_or_create()?,
    };

    // RUST_LOG still wins over both
    init_telemetry_with_level(effective_level(cli.log.as_deref(), &config.core.log_level));

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");
    tracing::debug!("Montage v{} ({} - {})", version, commit, timestamp);

    // Handle commands
    match cli.command {
        Command::Run {
            request,
            resume,
            from_step,
        } => {
            let mode = match (resume, from_step) {
                (_, Some(step_id)) => Some(RunMode::ResumeFrom { step_id }),
                (true, None) => Some(RunMode::Resume),
                (false, None) => None,
            };
            tracing::info!("Executing run request: {}", request.display());
            let succeeded = handle_run(request, mode, &config, cli.no_model, format).await?;
            if !succeeded {
                std::process::exit(1);
            }
            Ok(())
        }

        Command::Plan { request } => handle_plan(request, &config, cli.no_model, format).await,

        Command::Evaluate {
            request,
            tool,
            alignment,
        } => handle_evaluate(request, tool, alignment, &config, cli.no_model, format).await,

        Command::History {
            render_dir,
            project,
            limit,
        } => handle_history(render_dir, project, limit, format).await,

        Command::Report {
            render_dir,
            project,
        } => handle_report(render_dir, project, format).await,

        Command::Doctor => {
            tracing::info!("Running diagnostics...");
            handle_doctor(&config, cli.no_model, format).await
        }
    }
}
