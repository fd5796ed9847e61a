//! Orchestration engine - drives the fixed expense pipeline
//!
//! State machine over one PipelineRun:
//! Pending → Running(stage i) → { Running(i+1) | Failed(i) | Completed }
//!
//! Stages run strictly sequentially; each stage's input is the previous
//! stage's output, so there is no parallelism opportunity within a run.
//! Invocation failures arrive as typed TaskResponse errors and become the
//! terminal Failed(i) state; they never propagate as faults.

use crate::discovery::Registry;
use crate::error::OrchestrationError;
use crate::invoker::CapabilityInvoker;
use crate::models::{
    PipelineReport, PipelineRun, RunStatus, StageOutput, TaskError, TaskErrorKind, TaskRequest,
};
use crate::Result;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Required capabilities, in execution order. The ordering is data
/// consumed by the engine, not instructional text.
pub const PIPELINE_STAGES: [&str; 3] = ["parse", "analyze", "advise"];

//
// ================= Cancellation =================
//

/// Cooperative cancellation for a run in flight.
///
/// Checked between stages only, never mid-invocation, so an in-flight
/// remote call is never interrupted.
#[derive(Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

//
// ================= Engine =================
//

/// Drives pipeline runs against a fixed registry snapshot.
///
/// The registry is shared read-only across concurrent runs; each run
/// owns its own PipelineRun state.
pub struct PipelineEngine {
    registry: Arc<Registry>,
    invoker: Arc<dyn CapabilityInvoker>,
}

impl PipelineEngine {
    pub fn new(registry: Arc<Registry>, invoker: Arc<dyn CapabilityInvoker>) -> Self {
        Self { registry, invoker }
    }

    /// Create a run, failing fast if any required capability has no
    /// binding. No invocation happens here.
    pub fn create_run(&self) -> Result<PipelineRun> {
        self.registry.require_all(&PIPELINE_STAGES)?;

        Ok(PipelineRun {
            run_id: Uuid::new_v4(),
            correlation_id: Uuid::new_v4().to_string(),
            stages: PIPELINE_STAGES.iter().map(|s| s.to_string()).collect(),
            current_stage: 0,
            stage_outputs: Vec::with_capacity(PIPELINE_STAGES.len()),
            status: RunStatus::Pending,
            started_at: Utc::now(),
        })
    }

    /// Convenience entry point: create and execute a fresh run
    pub async fn run(&self, input: serde_json::Value) -> Result<PipelineReport> {
        let mut run = self.create_run()?;
        self.execute(&mut run, input, &CancelHandle::new()).await
    }

    /// Execute a run to a terminal state, relaying each stage's output
    /// into the next stage's request.
    pub async fn execute(
        &self,
        run: &mut PipelineRun,
        input: serde_json::Value,
        cancel: &CancelHandle,
    ) -> Result<PipelineReport> {
        if run.status.is_terminal() {
            return Err(OrchestrationError::RunAlreadyTerminal(format!(
                "run {} already {}",
                run.run_id, run.status
            )));
        }

        let start = Instant::now();
        let stages = run.stages.clone();
        let mut stage_input = input;

        info!(
            run_id = %run.run_id,
            correlation_id = %run.correlation_id,
            stages = ?stages,
            "Pipeline run starting"
        );

        for (i, capability) in stages.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(run_id = %run.run_id, stage = i, "Run cancelled between stages");
                run.status = RunStatus::Failed(i);
                return Ok(self.report(
                    run,
                    Some(TaskError {
                        kind: TaskErrorKind::Cancelled,
                        message: format!("run cancelled before stage {} ({})", i, capability),
                    }),
                    start,
                ));
            }

            run.current_stage = i;
            run.status = RunStatus::Running(i);

            // create_run guarantees a binding exists; the registry snapshot
            // is immutable for the lifetime of this engine.
            let binding = self.registry.resolve(capability).ok_or_else(|| {
                OrchestrationError::PipelineError(format!(
                    "binding for '{}' vanished from registry",
                    capability
                ))
            })?;

            let request = TaskRequest {
                correlation_id: run.correlation_id.clone(),
                content: stage_input.clone(),
            };

            debug!(
                run_id = %run.run_id,
                stage = i,
                capability = %capability,
                agent = %binding.agent_name,
                "Executing stage"
            );

            let mut response = self.invoker.invoke(binding, &request).await;

            // A success with no content cannot feed the next stage
            if response.is_success() && response.content.is_none() {
                response = crate::models::TaskResponse::failure(
                    TaskErrorKind::ProtocolError,
                    format!("'{}' returned success without content", capability),
                );
            }

            if response.is_success() {
                stage_input = response
                    .content
                    .clone()
                    .unwrap_or(serde_json::Value::Null);
                run.stage_outputs.push(response);
            } else {
                let error = response.error.clone().unwrap_or(TaskError {
                    kind: TaskErrorKind::ProtocolError,
                    message: "failure response without error detail".to_string(),
                });

                warn!(
                    run_id = %run.run_id,
                    stage = i,
                    capability = %capability,
                    kind = %error.kind,
                    "Stage failed - run terminal"
                );

                run.status = RunStatus::Failed(i);
                return Ok(self.report(run, Some(error), start));
            }
        }

        run.status = RunStatus::Completed;

        info!(
            run_id = %run.run_id,
            stages = run.stage_outputs.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Pipeline run completed"
        );

        Ok(self.report(run, None, start))
    }

    /// Assemble the user-visible report: the failing stage and error kind
    /// when failed, plus the outputs of every stage that completed.
    fn report(&self, run: &PipelineRun, error: Option<TaskError>, start: Instant) -> PipelineReport {
        let stage_outputs: Vec<StageOutput> = run
            .stages
            .iter()
            .zip(run.stage_outputs.iter())
            .map(|(capability, response)| StageOutput {
                capability: capability.clone(),
                content: response.content.clone().unwrap_or(serde_json::Value::Null),
            })
            .collect();

        let completed = run.status == RunStatus::Completed;
        let failed_stage = match run.status {
            RunStatus::Failed(i) => Some(i),
            _ => None,
        };
        let final_content = if completed {
            stage_outputs.last().map(|o| o.content.clone())
        } else {
            None
        };

        PipelineReport {
            run_id: run.run_id,
            correlation_id: run.correlation_id.clone(),
            completed,
            failed_stage,
            error,
            stage_outputs,
            final_content,
            elapsed_ms: start.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CapabilityBinding, TaskResponse};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Invoker that replays a script of responses and records every call
    struct ScriptedInvoker {
        responses: Mutex<VecDeque<TaskResponse>>,
        calls: Mutex<Vec<(String, TaskRequest)>>,
    }

    impl ScriptedInvoker {
        fn new(responses: Vec<TaskResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(String, TaskRequest)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl CapabilityInvoker for ScriptedInvoker {
        async fn invoke(
            &self,
            binding: &CapabilityBinding,
            request: &TaskRequest,
        ) -> TaskResponse {
            self.calls
                .lock()
                .unwrap()
                .push((binding.capability_id.clone(), request.clone()));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| {
                    TaskResponse::failure(TaskErrorKind::ProtocolError, "script exhausted")
                })
        }
    }

    fn full_registry() -> Arc<Registry> {
        Arc::new(Registry::with_bindings(PIPELINE_STAGES.iter().map(
            |capability| CapabilityBinding {
                capability_id: capability.to_string(),
                agent_name: format!("{}_agent", capability),
                agent_endpoint: "http://127.0.0.1:1".to_string(),
                timeout: Duration::from_secs(5),
            },
        )))
    }

    #[tokio::test]
    async fn test_create_run_rejects_incomplete_registry() {
        let registry = Arc::new(Registry::with_bindings(vec![
            CapabilityBinding {
                capability_id: "parse".to_string(),
                agent_name: "expense_parser".to_string(),
                agent_endpoint: "http://127.0.0.1:1".to_string(),
                timeout: Duration::from_secs(5),
            },
            CapabilityBinding {
                capability_id: "advise".to_string(),
                agent_name: "financial_advisor".to_string(),
                agent_endpoint: "http://127.0.0.1:1".to_string(),
                timeout: Duration::from_secs(5),
            },
        ]));
        let invoker = ScriptedInvoker::new(vec![]);
        let engine = PipelineEngine::new(registry, invoker.clone());

        let err = engine.create_run().unwrap_err();
        assert!(matches!(err, OrchestrationError::DiscoveryIncomplete(_)));
        assert!(err.to_string().contains("analyze"));

        // Fail fast: no invocation occurred
        assert!(invoker.calls().is_empty());
    }

    #[tokio::test]
    async fn test_three_stage_success() {
        let parsed = json!([{"category": "groceries", "amount": 500.0}]);
        let analysis = json!({"total_spend": 500.0});
        let advice = json!({"advisory": "Build an emergency fund."});

        let invoker = ScriptedInvoker::new(vec![
            TaskResponse::success(parsed.clone()),
            TaskResponse::success(analysis.clone()),
            TaskResponse::success(advice.clone()),
        ]);
        let engine = PipelineEngine::new(full_registry(), invoker.clone());

        let report = engine.run(json!("Spent 500 on groceries")).await.unwrap();

        assert!(report.completed);
        assert_eq!(report.failed_stage, None);
        assert_eq!(report.stage_outputs.len(), 3);
        assert_eq!(report.final_content, Some(advice));

        // Each stage received the previous stage's output, and the
        // correlation id propagated unchanged.
        let calls = invoker.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].0, "parse");
        assert_eq!(calls[0].1.content, json!("Spent 500 on groceries"));
        assert_eq!(calls[1].0, "analyze");
        assert_eq!(calls[1].1.content, parsed);
        assert_eq!(calls[2].0, "advise");
        assert_eq!(calls[2].1.content, analysis);
        assert!(calls
            .iter()
            .all(|(_, r)| r.correlation_id == calls[0].1.correlation_id));
    }

    #[tokio::test]
    async fn test_stage_two_timeout_halts_run() {
        let parsed = json!([{"category": "groceries", "amount": 500.0}]);
        let invoker = ScriptedInvoker::new(vec![
            TaskResponse::success(parsed.clone()),
            TaskResponse::failure(TaskErrorKind::Timeout, "no response in 5s"),
        ]);
        let engine = PipelineEngine::new(full_registry(), invoker.clone());

        let mut run = engine.create_run().unwrap();
        let report = engine
            .execute(&mut run, json!("Spent 500 on groceries"), &CancelHandle::new())
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Failed(1));
        assert!(!report.completed);
        assert_eq!(report.failed_stage, Some(1));
        assert_eq!(report.error.as_ref().unwrap().kind, TaskErrorKind::Timeout);

        // Only stage 0's output recorded; stage 2 never invoked
        assert_eq!(report.stage_outputs.len(), 1);
        assert_eq!(report.stage_outputs[0].capability, "parse");
        assert_eq!(report.stage_outputs[0].content, parsed);
        let calls = invoker.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|(cap, _)| cap != "advise"));
    }

    #[tokio::test]
    async fn test_cancellation_before_first_stage() {
        let invoker = ScriptedInvoker::new(vec![]);
        let engine = PipelineEngine::new(full_registry(), invoker.clone());

        let cancel = CancelHandle::new();
        cancel.cancel();

        let mut run = engine.create_run().unwrap();
        let report = engine
            .execute(&mut run, json!("irrelevant"), &cancel)
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Failed(0));
        assert_eq!(report.error.unwrap().kind, TaskErrorKind::Cancelled);
        assert!(invoker.calls().is_empty());
    }

    #[tokio::test]
    async fn test_terminal_run_is_never_reused() {
        let invoker = ScriptedInvoker::new(vec![TaskResponse::failure(
            TaskErrorKind::Unreachable,
            "connection refused",
        )]);
        let engine = PipelineEngine::new(full_registry(), invoker);

        let mut run = engine.create_run().unwrap();
        let _ = engine
            .execute(&mut run, json!("input"), &CancelHandle::new())
            .await
            .unwrap();
        assert!(run.status.is_terminal());

        let err = engine
            .execute(&mut run, json!("input"), &CancelHandle::new())
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestrationError::RunAlreadyTerminal(_)));
    }

    #[tokio::test]
    async fn test_end_to_end_over_live_agents() {
        use crate::agent;
        use crate::agent::handlers::{ExpenseAnalyzer, ExpenseParser, FinancialAdvisor};
        use crate::discovery::DiscoveryClient;
        use crate::invoker::HttpInvoker;

        let mut endpoints = Vec::new();
        let (addr, _) = agent::spawn(Arc::new(ExpenseParser)).await.unwrap();
        endpoints.push(format!("http://{}", addr));
        let (addr, _) = agent::spawn(Arc::new(ExpenseAnalyzer)).await.unwrap();
        endpoints.push(format!("http://{}", addr));
        let (addr, _) = agent::spawn(Arc::new(FinancialAdvisor)).await.unwrap();
        endpoints.push(format!("http://{}", addr));

        let registry = DiscoveryClient::new().discover(&endpoints).await;
        let engine = PipelineEngine::new(Arc::new(registry), Arc::new(HttpInvoker::new()));

        let report = engine.run(json!("Spent 500 on groceries")).await.unwrap();

        assert!(report.completed);
        assert_eq!(report.stage_outputs.len(), 3);

        // The advisory text is derived from the structured analysis
        let advisory = report.final_content.unwrap()["advisory"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(advisory.contains("500"));
    }

    #[tokio::test]
    async fn test_missing_analyzer_fails_before_any_task_invocation() {
        use crate::agent;
        use crate::agent::handlers::{ExpenseParser, FinancialAdvisor};
        use crate::discovery::DiscoveryClient;
        use crate::invoker::HttpInvoker;

        // Analyzer endpoint unreachable during discovery
        let mut endpoints = Vec::new();
        let (addr, _) = agent::spawn(Arc::new(ExpenseParser)).await.unwrap();
        endpoints.push(format!("http://{}", addr));
        endpoints.push("http://127.0.0.1:9".to_string());
        let (addr, _) = agent::spawn(Arc::new(FinancialAdvisor)).await.unwrap();
        endpoints.push(format!("http://{}", addr));

        let registry = DiscoveryClient::new().discover(&endpoints).await;
        assert_eq!(registry.warnings().len(), 1);

        let engine = PipelineEngine::new(Arc::new(registry), Arc::new(HttpInvoker::new()));
        let err = engine.create_run().unwrap_err();
        assert!(matches!(err, OrchestrationError::DiscoveryIncomplete(_)));
    }

    #[tokio::test]
    async fn test_success_without_content_is_protocol_error() {
        let invoker = ScriptedInvoker::new(vec![TaskResponse {
            status: crate::models::TaskStatus::Success,
            content: None,
            error: None,
        }]);
        let engine = PipelineEngine::new(full_registry(), invoker);

        let report = engine.run(json!("input")).await.unwrap();

        assert_eq!(report.failed_stage, Some(0));
        assert_eq!(report.error.unwrap().kind, TaskErrorKind::ProtocolError);
    }
}
