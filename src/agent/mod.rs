//! Agent runtime - hosts one task handler behind a network endpoint
//!
//! Publishes the agent card at the well-known path and accepts task
//! invocations at /tasks. The card is published only once the runtime is
//! bound and ready; until then the well-known path answers "not ready"
//! rather than a malformed card. Each invocation yields exactly one
//! TaskResponse.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::models::{AgentCard, TaskErrorKind, TaskRequest, TaskResponse, TASK_PATH, WELL_KNOWN_CARD_PATH};
use crate::Result;

pub mod handlers;

/// One task-performing unit. The runtime derives the agent card from the
/// handler's identity and delegates every task invocation to it.
#[async_trait::async_trait]
pub trait TaskHandler: Send + Sync {
    fn agent_name(&self) -> &'static str;
    fn capability(&self) -> &'static str;
    fn description(&self) -> &'static str;
    async fn handle(&self, request: &TaskRequest) -> Result<serde_json::Value>;
}

#[derive(Clone)]
struct AgentState {
    handler: Arc<dyn TaskHandler>,
    card: Arc<RwLock<Option<AgentCard>>>,
}

/// Card fetch: idempotent, side-effect-free; 503 until the card exists
async fn agent_card(State(state): State<AgentState>) -> (StatusCode, Json<serde_json::Value>) {
    match state.card.read().await.as_ref() {
        Some(card) => (
            StatusCode::OK,
            Json(serde_json::to_value(card).unwrap_or_default()),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "not_ready" })),
        ),
    }
}

/// Task invocation: handler errors become well-formed failure responses
async fn handle_task(
    State(state): State<AgentState>,
    Json(request): Json<TaskRequest>,
) -> Json<TaskResponse> {
    info!(
        agent = state.handler.agent_name(),
        correlation_id = %request.correlation_id,
        "Task received"
    );

    let response = match state.handler.handle(&request).await {
        Ok(content) => TaskResponse::success(content),
        Err(e) => TaskResponse::failure(TaskErrorKind::TaskFailed, e.to_string()),
    };

    Json(response)
}

/// Hosts one handler; card publication is deferred until bind time
pub struct AgentRuntime {
    handler: Arc<dyn TaskHandler>,
    card: Arc<RwLock<Option<AgentCard>>>,
}

impl AgentRuntime {
    pub fn new(handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            handler,
            card: Arc::new(RwLock::new(None)),
        }
    }

    pub fn router(&self) -> Router {
        let state = AgentState {
            handler: self.handler.clone(),
            card: self.card.clone(),
        };

        Router::new()
            .route(WELL_KNOWN_CARD_PATH, get(agent_card))
            .route(TASK_PATH, post(handle_task))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
    }

    /// Build and publish the card for the bound endpoint
    pub async fn publish(&self, endpoint: String) {
        let card = AgentCard {
            name: self.handler.agent_name().to_string(),
            description: self.handler.description().to_string(),
            endpoint,
            capabilities: vec![self.handler.capability().to_string()],
        };

        info!(
            agent = %card.name,
            endpoint = %card.endpoint,
            "Agent card published"
        );

        *self.card.write().await = Some(card);
    }

    /// Bind to an ephemeral local port and serve in the background.
    /// Used by tests and the self-contained demo binary.
    pub async fn spawn(self) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        self.publish(format!("http://{}", addr)).await;
        let router = self.router();

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                tracing::error!(error = %e, "Agent server stopped");
            }
        });

        Ok((addr, handle))
    }

    /// Bind to a fixed port and serve until shutdown
    pub async fn serve(self, port: u16) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

        self.publish(format!("http://127.0.0.1:{}", port)).await;
        let router = self.router();

        info!(
            agent = self.handler.agent_name(),
            port, "Agent server listening"
        );

        axum::serve(listener, router).await?;
        Ok(())
    }
}

/// Spawn a handler on an ephemeral port
pub async fn spawn(
    handler: Arc<dyn TaskHandler>,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>)> {
    AgentRuntime::new(handler).spawn().await
}
