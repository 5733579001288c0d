//! CLI interface for Montage
//!
//! This module provides the command-line interface using clap's derive API.
//! It defines all commands and global flags.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Montage video pipeline orchestrator
///
/// Plans, runs, checks and repairs the stages that turn project footage and
/// a creative brief into a rendered video.
#[derive(Parser, Debug)]
#[command(name = "montage")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Never consult the generative model
    #[arg(long, global = true)]
    pub no_model: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Execute a run request
    Run {
        /// Path to the run request (JSON)
        request: PathBuf,

        /// Continue from where the previous run stopped
        #[arg(long, conflicts_with = "from_step")]
        resume: bool,

        /// Start at the step with this identifier
        #[arg(long, value_name = "ID")]
        from_step: Option<String>,
    },

    /// Propose and validate a plan without running it
    Plan {
        /// Path to the run request (JSON)
        request: PathBuf,
    },

    /// Check the outputs already present in the render directory
    Evaluate {
        /// Path to the run request (JSON)
        request: PathBuf,

        /// Only check this tool's output
        #[arg(long, value_name = "NAME")]
        tool: Option<String>,

        /// Also score prompt alignment of the trimmed script
        #[arg(long)]
        alignment: bool,
    },

    /// Show the most recent run events
    History {
        /// Render directory holding the event log
        render_dir: PathBuf,

        /// Project name
        #[arg(long)]
        project: String,

        /// Number of events to show (default: 20)
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show the last run report
    Report {
        /// Render directory holding the report
        render_dir: PathBuf,

        /// Project name
        #[arg(long)]
        project: String,
    },

    /// Run system diagnostics
    Doctor,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::parse_from(["montage", "--no-model", "run", "req.json", "--from-step", "trim"]);
        assert!(cli.no_model);
        match cli.command {
            Command::Run {
                request,
                resume,
                from_step,
            } => {
                assert_eq!(request, PathBuf::from("req.json"));
                assert!(!resume);
                assert_eq!(from_step.as_deref(), Some("trim"));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_resume_conflicts_with_from_step() {
        let result =
            Cli::try_parse_from(["montage", "run", "req.json", "--resume", "--from-step", "trim"]);
        assert!(result.is_err());
    }
}
