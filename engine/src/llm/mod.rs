//! LLM Provider Abstraction Layer
//!
//! This module provides the common interface the planner and the evaluator use
//! to talk to a generative text model. The model is an optional collaborator:
//! every caller must degrade to a deterministic default when it is absent,
//! unhealthy, or answers with something that cannot be decoded.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod ollama;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Message in a prompt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender (user, assistant, system)
    pub role: MessageRole,

    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User message
    User,

    /// Assistant message
    Assistant,

    /// System message
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

/// LLM Provider trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "ollama")
    fn name(&self) -> &str;

    /// Generate a completion for the conversation and return its text
    async fn generate(&self, messages: &[Message]) -> Result<String>;

    /// Check if the provider is currently healthy and loaded.
    /// Default implementation returns true.
    async fn check_health(&self) -> bool {
        true
    }
}

/// Send one system instruction and one user prompt, returning the reply text.
///
/// Returns `ProviderUnavailable` without sending anything when the provider
/// reports itself unhealthy.
pub async fn complete(provider: &dyn LLMProvider, system: &str, prompt: &str) -> Result<String> {
    if !provider.check_health().await {
        return Err(LLMError::ProviderUnavailable(format!(
            "{} is not loaded",
            provider.name()
        )));
    }
    provider
        .generate(&[Message::system(system), Message::user(prompt)])
        .await
}

/// Find the first balanced `{ ... }` fragment anywhere in `content`.
///
/// Counts brace depth while respecting string literals and escapes, so a
/// reply with prose around the object still yields the object.
pub fn first_json_object(content: &str) -> Option<&str> {
    let mut search_from = 0;
    while let Some(rel) = content[search_from..].find('{') {
        let start = search_from + rel;
        if let Some(fragment) = extract_balanced_json(&content[start..]) {
            return Some(fragment);
        }
        search_from = start + 1;
    }
    None
}

/// Extract a balanced JSON object starting at position 0 of `s`.
///
/// Counts `{` / `}` depth, respecting string literals, to find the
/// matching close brace.
fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
