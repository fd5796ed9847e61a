//! Expense Agent Orchestrator
//!
//! Coordinates independent, network-addressable task agents through a fixed
//! expense pipeline:
//! - Each agent publishes a machine-readable agent card at a well-known path
//! - A discovery client fetches cards and binds advertised capabilities
//! - A capability invoker turns a binding into one bounded network call
//! - An orchestration engine drives parse → analyze → advise, relaying each
//!   stage's output into the next and reporting partial failure
//!
//! PIPELINE:
//! raw text → parse → analyze → advise → combined result

pub mod agent;
pub mod api;
pub mod discovery;
pub mod error;
pub mod invoker;
pub mod models;
pub mod pipeline;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use pipeline::{PipelineEngine, PIPELINE_STAGES};
