//! Error types and handling
//!
//! This module provides the error types used throughout the Montage engine
//! and by pipeline tool implementations. All errors implement the
//! `EngineErrorExt` trait which provides user-friendly hints and indicates
//! whether errors are recoverable.

use thiserror::Error;

/// Trait for engine error extensions
///
/// This trait provides additional context for errors, including user-friendly
/// hints and recoverability information. All engine errors implement this trait.
pub trait EngineErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether the error is recoverable
    ///
    /// Recoverable errors can be retried or worked around (for example by
    /// resuming the run). Non-recoverable errors require the operator to fix
    /// the installation or the configuration first.
    fn is_recoverable(&self) -> bool;
}

/// Main engine error type
///
/// # Error Categories
///
/// - **Configuration**: Invalid or missing configuration
/// - **Request**: Malformed run requests
/// - **LLM Provider**: Generative model failures
/// - **Tool**: Lookup, execution and timeout failures of pipeline stages
/// - **Persistence**: Serialization and file system failures
///
/// # Examples
///
/// ```
/// use sdk::errors::{EngineError, EngineErrorExt};
///
/// let error = EngineError::ToolError("render exited with status 1".to_string());
/// println!("Hint: {}", error.user_hint());
/// assert!(error.is_recoverable());
///
/// let fatal_error = EngineError::ToolNotFound("upscale".to_string());
/// assert!(!fatal_error.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum EngineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Request errors
    #[error("Invalid run request: {0}")]
    InvalidRequest(String),

    // LLM provider errors
    #[error("LLM provider error: {0}")]
    LLMProvider(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool error: {0}")]
    ToolError(String),

    #[error("Tool '{tool}' timed out after {secs} seconds")]
    ToolTimeout { tool: String, secs: u64 },

    // Plan errors
    #[error("Step not found in plan: {0}")]
    StepNotFound(String),

    // Persistence errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineErrorExt for EngineError {
    fn user_hint(&self) -> &str {
        match self {
            Self::Config(_) => "Check your config.toml file for errors",
            Self::InvalidRequest(_) => "Check the run request file for missing or invalid fields",
            Self::LLMProvider(_) => "Generative model unavailable. Is the model server running?",
            Self::ToolNotFound(_) => "The requested tool is not registered. Check [tools] in config",
            Self::ToolError(_) => "Pipeline stage failed. Inspect the event log and resume",
            Self::ToolTimeout { .. } => "Pipeline stage took too long. Raise its timeout_secs",
            Self::StepNotFound(_) => "Use a step id from the validated plan",
            Self::Serialization(_) => "A persisted document is malformed",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        match self {
            // Non-recoverable errors
            Self::Config(_) | Self::ToolNotFound(_) | Self::InvalidRequest(_) => false,

            // All other errors are potentially recoverable
            _ => true,
        }
    }
}
