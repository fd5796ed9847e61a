//! Error types for the expense agent orchestrator

use thiserror::Error;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

#[derive(Error, Debug)]
pub enum OrchestrationError {

    // =============================
    // Discovery & Binding Errors
    // =============================

    #[error("Invalid agent card: {0}")]
    InvalidAgentCard(String),

    #[error("Discovery incomplete: no binding for capabilities [{0}]")]
    DiscoveryIncomplete(String),

    // =============================
    // Pipeline Errors
    // =============================

    #[error("Pipeline error: {0}")]
    PipelineError(String),

    #[error("Run already terminal: {0}")]
    RunAlreadyTerminal(String),

    // =============================
    // Agent Runtime Errors
    // =============================

    #[error("Invalid task content: {0}")]
    InvalidTaskContent(String),

    #[error("Agent runtime error: {0}")]
    AgentError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
