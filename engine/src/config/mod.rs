//! Configuration management
//!
//! This module handles loading, validation, and management of the Montage configuration.
//! Configuration is stored in TOML format at ~/.montage/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level
//! - **llm**: Generative model settings (Ollama)
//! - **orchestrator**: Self-repair knobs and optional advisory checks
//! - **tools**: One `[tools.<name>]` section per configured pipeline stage
//!
//! # Path Expansion
//!
//! `~` in a tool's `working_dir` is expanded to the user's home directory.
//!
//! # Examples
//!
//! ```no_run
//! use montage_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration from default location
//! let config = Config::load_or_create()?;
//!
//! // Access configuration values
//! println!("Model: {}", config.llm.ollama.model);
//! println!("Configured tools: {}", config.tools.len());
//! # Ok(())
//! # }
//! ```

use sdk::errors::EngineError;
use sdk::ToolKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::conductor::{OrchestratorSettings, RepairSettings};

/// Main configuration structure
///
/// This structure represents the complete Montage configuration loaded from
/// ~/.montage/config.toml. Every section falls back to defaults when absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Core engine settings
    #[serde(default)]
    pub core: CoreConfig,

    /// Generative model configuration
    #[serde(default)]
    pub llm: LLMConfig,

    /// Orchestrator behaviour
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Pipeline stage commands, keyed by tool name
    #[serde(default)]
    pub tools: BTreeMap<String, ToolConfig>,
}

/// Core engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Generative model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    /// Use the model for planning and alignment scoring
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Ollama provider settings
    #[serde(default)]
    pub ollama: OllamaConfig,
}

/// Ollama provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Base URL for Ollama API
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,

    /// Model name
    #[serde(default = "default_ollama_model")]
    pub model: String,

    /// Request timeout (seconds)
    #[serde(default = "default_ollama_timeout")]
    pub timeout_secs: u64,
}

/// Orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Added to the temporal expansion factor by the second repair attempt
    #[serde(default = "default_expansion_increment")]
    pub expansion_increment: u32,

    /// Upper bound of the widened expansion factor
    #[serde(default = "default_expansion_cap")]
    pub expansion_cap: u32,

    /// Percentage cut from the target length by the third repair attempt (1-90)
    #[serde(default = "default_trim_reduction_percent")]
    pub trim_reduction_percent: u32,

    /// Check every stage's output, not only trim (advisory)
    #[serde(default)]
    pub gate_every_step: bool,

    /// Score prompt alignment after a successful run (advisory)
    #[serde(default)]
    pub check_alignment: bool,
}

/// Command backing one pipeline stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Executable to spawn
    pub program: String,

    /// Arguments; `{placeholders}` are filled from the run request
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory (supports ~ expansion)
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Kill the process after this many seconds
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
}

impl ToolConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_ollama_timeout() -> u64 {
    300
}

fn default_expansion_increment() -> u32 {
    2
}

fn default_expansion_cap() -> u32 {
    30
}

fn default_trim_reduction_percent() -> u32 {
    10
}

fn default_tool_timeout() -> u64 {
    3600
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ollama: OllamaConfig::default(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_base_url(),
            model: default_ollama_model(),
            timeout_secs: default_ollama_timeout(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            expansion_increment: default_expansion_increment(),
            expansion_cap: default_expansion_cap(),
            trim_reduction_percent: default_trim_reduction_percent(),
            gate_every_step: false,
            check_alignment: false,
        }
    }
}

impl OrchestratorConfig {
    /// Settings handed to the orchestrator
    pub fn settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            repair: RepairSettings {
                expansion_increment: self.expansion_increment,
                expansion_cap: self.expansion_cap,
                trim_reduction_percent: self.trim_reduction_percent,
            },
            gate_every_step: self.gate_every_step,
            check_alignment: self.check_alignment,
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.montage/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    /// Validates the configuration after loading and returns descriptive errors
    /// if validation fails.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, EngineError> {
        let config_path = Self::default_config_path()?;
        Self::load_or_create_at(&config_path)
    }

    /// Load configuration from `path`, writing defaults there first if it
    /// doesn't exist.
    pub fn load_or_create_at(path: &Path) -> Result<Self, EngineError> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            Self::create_default(path)
        }
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - File cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_from_path(path: &Path) -> Result<Self, EngineError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration text
    pub fn from_toml(contents: &str) -> Result<Self, EngineError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {}", e)))?;

        // Validate and process configuration
        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Directory creation fails
    /// - File write fails
    fn create_default(path: &Path) -> Result<Self, EngineError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default();
        config.validate_and_process()?;

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| EngineError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| EngineError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.montage/config.toml)
    pub fn default_config_path() -> Result<PathBuf, EngineError> {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".montage").join("config.toml"))
    }

    /// Tool configured for `kind`, if any
    pub fn tool(&self, kind: ToolKind) -> Option<&ToolConfig> {
        self.tools.get(kind.as_str())
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates the log level and orchestrator ranges
    /// - Rejects tool sections outside the nine pipeline stages
    /// - Rejects tool sections with an empty program or zero timeout
    /// - Expands ~ in tool working directories
    fn validate_and_process(&mut self) -> Result<(), EngineError> {
        // Validate log level
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(EngineError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        // Validate orchestrator knobs
        if self.orchestrator.expansion_cap == 0 {
            return Err(EngineError::Config(
                "expansion_cap must be at least 1".to_string(),
            ));
        }
        if !(1..=90).contains(&self.orchestrator.trim_reduction_percent) {
            return Err(EngineError::Config(
                "trim_reduction_percent must be between 1 and 90".to_string(),
            ));
        }

        if self.llm.ollama.timeout_secs == 0 {
            return Err(EngineError::Config(
                "llm.ollama.timeout_secs must be at least 1".to_string(),
            ));
        }

        // Validate tool sections
        for (name, tool) in self.tools.iter_mut() {
            if ToolKind::from_name(name).is_none() {
                let known: Vec<&str> = ToolKind::ALL.iter().map(ToolKind::as_str).collect();
                return Err(EngineError::Config(format!(
                    "Unknown tool section '{}'. Must be one of: {}",
                    name,
                    known.join(", ")
                )));
            }
            if tool.program.trim().is_empty() {
                return Err(EngineError::Config(format!(
                    "tools.{}.program must not be empty",
                    name
                )));
            }
            if tool.timeout_secs == 0 {
                return Err(EngineError::Config(format!(
                    "tools.{}.timeout_secs must be at least 1",
                    name
                )));
            }
            if let Some(dir) = &tool.working_dir {
                tool.working_dir = Some(expand_path(dir)?);
            }
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, EngineError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| EngineError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| EngineError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
