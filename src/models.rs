//! Core data models for agent discovery and pipeline orchestration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::error::OrchestrationError;
use crate::Result;

/// Well-known path at which every agent runtime publishes its card
pub const WELL_KNOWN_CARD_PATH: &str = "/.well-known/agent.json";

/// Path at which an agent runtime accepts task invocations
pub const TASK_PATH: &str = "/tasks";

//
// ================= Agent Card =================
//

/// Self-published descriptor of one agent runtime.
///
/// Fetched by the discovery client and cached until the next discovery
/// pass; never mutated in place once fetched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentCard {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub endpoint: String,
    pub capabilities: Vec<String>,
}

impl AgentCard {
    /// A card is valid iff `name` and `endpoint` are non-empty and it
    /// advertises at least one capability.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(OrchestrationError::InvalidAgentCard(
                "card has empty name".to_string(),
            ));
        }
        if self.endpoint.trim().is_empty() {
            return Err(OrchestrationError::InvalidAgentCard(format!(
                "card '{}' has empty endpoint",
                self.name
            )));
        }
        if self.capabilities.is_empty() {
            return Err(OrchestrationError::InvalidAgentCard(format!(
                "card '{}' advertises no capabilities",
                self.name
            )));
        }
        Ok(())
    }
}

//
// ================= Capability Binding =================
//

/// Discovery result: one callable capability on one agent endpoint.
/// Owned by the registry; immutable; rebuilt wholesale on re-discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityBinding {
    pub capability_id: String,
    pub agent_name: String,
    pub agent_endpoint: String,
    pub timeout: Duration,
}

/// Recorded when an endpoint is excluded during discovery
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveryWarning {
    pub endpoint: String,
    pub reason: String,
}

//
// ================= Task I/O =================
//

/// Single-use invocation payload sent to an agent runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRequest {
    /// Caller-generated token, propagated unchanged through every stage
    pub correlation_id: String,
    /// Opaque payload: free text or a structured encoding
    pub content: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    Timeout,
    Unreachable,
    ProtocolError,
    Cancelled,
    /// The agent answered with a well-formed failure of its own
    TaskFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
}

/// Single-use invocation result. Invocation failures are always carried
/// here as typed values, never raised past the invoker boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResponse {
    pub status: TaskStatus,
    pub content: Option<serde_json::Value>,
    pub error: Option<TaskError>,
}

impl TaskResponse {
    pub fn success(content: serde_json::Value) -> Self {
        Self {
            status: TaskStatus::Success,
            content: Some(content),
            error: None,
        }
    }

    pub fn failure(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failure,
            content: None,
            error: Some(TaskError {
                kind,
                message: message.into(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}

//
// ================= Pipeline Run =================
//

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Pending,
    Running(usize),
    Completed,
    Failed(usize),
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed(_))
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Pending => write!(f, "pending"),
            RunStatus::Running(i) => write!(f, "running(stage {})", i),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed(i) => write!(f, "failed(stage {})", i),
        }
    }
}

/// State of one end-to-end pipeline execution.
///
/// Owned exclusively by the orchestration engine for the duration of the
/// run; never reused after reaching a terminal state.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub correlation_id: String,
    pub stages: Vec<String>,
    pub current_stage: usize,
    pub stage_outputs: Vec<TaskResponse>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
}

//
// ================= Pipeline Report =================
//

/// Content a completed stage produced, keyed by its capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutput {
    pub capability: String,
    pub content: serde_json::Value,
}

/// User-visible result of one run: either the final stage's content, or
/// the failing stage plus everything that completed before it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub correlation_id: String,
    pub completed: bool,
    pub failed_stage: Option<usize>,
    pub error: Option<TaskError>,
    pub stage_outputs: Vec<StageOutput>,
    pub final_content: Option<serde_json::Value>,
    pub elapsed_ms: u64,
}

impl fmt::Display for TaskErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskErrorKind::Timeout => "timeout",
            TaskErrorKind::Unreachable => "unreachable",
            TaskErrorKind::ProtocolError => "protocol_error",
            TaskErrorKind::Cancelled => "cancelled",
            TaskErrorKind::TaskFailed => "task_failed",
        };
        write!(f, "{}", s)
    }
}
