//! Montage Engine Library
//!
//! This library provides the core functionality of the Montage orchestrator.
//! It is used by both the main binary and integration tests.

/// Configuration management module
pub mod config;

/// Generative model abstraction layer
pub mod llm;

/// Plan, execute, evaluate and repair pipeline runs
pub mod conductor;

/// Pipeline tool registry and subprocess-backed tools
pub mod tools;

/// Telemetry and Observability
pub mod telemetry;

/// CLI interface module
pub mod cli;

/// Command handlers module
pub mod handlers;
