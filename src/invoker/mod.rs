//! Capability invoker: one binding, one bounded network call
//!
//! The invoker is a simple, predictable primitive: exactly one outbound
//! delivery attempt per call, no internal retry, and every failure folded
//! into a typed `TaskResponse` so the orchestration engine can inspect
//! and react. Nothing here raises past its own boundary.

use crate::models::{CapabilityBinding, TaskRequest, TaskResponse, TaskErrorKind, TASK_PATH};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Trait seam so the engine can be driven by scripted invokers in tests
#[async_trait::async_trait]
pub trait CapabilityInvoker: Send + Sync {
    async fn invoke(&self, binding: &CapabilityBinding, request: &TaskRequest) -> TaskResponse;
}

/// HTTP-backed invoker (connection-pooled, stateless between calls)
pub struct HttpInvoker {
    client: Client,
}

impl HttpInvoker {
    pub fn new() -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .build()
            .expect("Failed to build HTTP client");

        Self { client }
    }
}

impl Default for HttpInvoker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CapabilityInvoker for HttpInvoker {
    async fn invoke(&self, binding: &CapabilityBinding, request: &TaskRequest) -> TaskResponse {
        let url = format!(
            "{}{}",
            binding.agent_endpoint.trim_end_matches('/'),
            TASK_PATH
        );

        debug!(
            capability = %binding.capability_id,
            agent = %binding.agent_name,
            correlation_id = %request.correlation_id,
            "Invoking capability"
        );

        let sent = self
            .client
            .post(&url)
            .timeout(binding.timeout)
            .json(request)
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                warn!(capability = %binding.capability_id, "Invocation timed out");
                return TaskResponse::failure(
                    TaskErrorKind::Timeout,
                    format!("no response from {} within {:?}", url, binding.timeout),
                );
            }
            Err(e) => {
                warn!(capability = %binding.capability_id, error = %e, "Endpoint unreachable");
                return TaskResponse::failure(
                    TaskErrorKind::Unreachable,
                    format!("transport failure calling {}: {}", url, e),
                );
            }
        };

        let status = response.status();
        if !status.is_success() {
            return TaskResponse::failure(
                TaskErrorKind::ProtocolError,
                format!("{} returned {}", url, status),
            );
        }

        // Agent-level failures arrive as well-formed failure responses and
        // pass through untouched; only an unparsable body is a protocol error.
        match response.json::<TaskResponse>().await {
            Ok(task_response) => task_response,
            Err(e) => TaskResponse::failure(
                TaskErrorKind::ProtocolError,
                format!("malformed task response from {}: {}", url, e),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent;
    use crate::agent::handlers::ExpenseParser;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn binding_for(endpoint: String, timeout: Duration) -> CapabilityBinding {
        CapabilityBinding {
            capability_id: "parse".to_string(),
            agent_name: "expense_parser".to_string(),
            agent_endpoint: endpoint,
            timeout,
        }
    }

    fn request() -> TaskRequest {
        TaskRequest {
            correlation_id: "test-run".to_string(),
            content: json!("Spent 500 on groceries"),
        }
    }

    #[tokio::test]
    async fn test_invoke_success_against_live_agent() {
        let (addr, _) = agent::spawn(Arc::new(ExpenseParser)).await.unwrap();
        let binding = binding_for(format!("http://{}", addr), Duration::from_secs(5));

        let response = HttpInvoker::new().invoke(&binding, &request()).await;

        assert!(response.is_success());
        assert!(response.content.unwrap().is_array());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_yields_typed_failure() {
        let binding = binding_for("http://127.0.0.1:9".to_string(), Duration::from_secs(2));

        let response = HttpInvoker::new().invoke(&binding, &request()).await;

        assert!(!response.is_success());
        assert_eq!(response.error.unwrap().kind, TaskErrorKind::Unreachable);
    }

    #[tokio::test]
    async fn test_timeout_yields_typed_failure() {
        // Accepts connections but never responds
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            loop {
                if let Ok((socket, _)) = listener.accept().await {
                    held.push(socket);
                }
            }
        });

        let binding = binding_for(format!("http://{}", addr), Duration::from_millis(200));
        let response = HttpInvoker::new().invoke(&binding, &request()).await;

        assert!(!response.is_success());
        assert_eq!(response.error.unwrap().kind, TaskErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_malformed_response_is_protocol_error() {
        use axum::{routing::post, Router};

        let router = Router::new().route(TASK_PATH, post(|| async { "not a task response" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let binding = binding_for(format!("http://{}", addr), Duration::from_secs(2));
        let response = HttpInvoker::new().invoke(&binding, &request()).await;

        assert!(!response.is_success());
        assert_eq!(response.error.unwrap().kind, TaskErrorKind::ProtocolError);
    }

    #[tokio::test]
    async fn test_exactly_one_outbound_call_per_invoke() {
        use axum::{extract::State, http::StatusCode, routing::post, Router};

        let calls = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route(
                TASK_PATH,
                post(|State(calls): State<Arc<AtomicUsize>>| async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    StatusCode::INTERNAL_SERVER_ERROR
                }),
            )
            .with_state(calls.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let binding = binding_for(format!("http://{}", addr), Duration::from_secs(2));
        let response = HttpInvoker::new().invoke(&binding, &request()).await;

        assert!(!response.is_success());
        assert_eq!(response.error.unwrap().kind, TaskErrorKind::ProtocolError);
        // No internal retry: the failing endpoint saw exactly one call
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
