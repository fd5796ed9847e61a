//! REST API server for the expense agent orchestrator
//!
//! Exposes the orchestrator entry point over HTTP: raw input content and
//! candidate agent endpoints in, final pipeline content or a structured
//! failure report out.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::discovery::DiscoveryClient;
use crate::error::OrchestrationError;
use crate::invoker::CapabilityInvoker;
use crate::pipeline::PipelineEngine;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PipelineRequest {
    pub input: String,
    /// Candidate agent endpoints; falls back to the configured set
    pub endpoints: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DiscoverRequest {
    pub endpoints: Vec<String>,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub discovery: Arc<DiscoveryClient>,
    pub invoker: Arc<dyn CapabilityInvoker>,
    pub default_endpoints: Vec<String>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Pipeline Endpoint
/// =============================

async fn run_pipeline(
    State(state): State<ApiState>,
    Json(req): Json<PipelineRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let endpoints = req
        .endpoints
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| state.default_endpoints.clone());

    if endpoints.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(
                "no agent endpoints provided or configured".to_string(),
            )),
        );
    }

    info!(endpoints = endpoints.len(), "Pipeline request received");

    let registry = state.discovery.discover(&endpoints).await;
    let engine = PipelineEngine::new(Arc::new(registry), state.invoker.clone());

    match engine.run(serde_json::Value::String(req.input)).await {
        // A failed run is still a well-formed report: the failing stage,
        // the error kind, and every completed stage's output.
        Ok(report) => (StatusCode::OK, Json(ApiResponse::success(report))),
        Err(e @ OrchestrationError::DiscoveryIncomplete(_)) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(e.to_string())),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiResponse::error(format!("Pipeline failed: {}", e))),
        ),
    }
}

/// =============================
/// Discovery Endpoint
/// =============================

async fn discover(
    State(state): State<ApiState>,
    Json(req): Json<DiscoverRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let registry = state.discovery.discover(&req.endpoints).await;

    (
        StatusCode::OK,
        Json(ApiResponse::success(serde_json::json!({
            "capabilities": registry.capabilities(),
            "warnings": registry.warnings(),
        }))),
    )
}

/// =============================
/// Router
/// =============================

pub fn create_router(state: ApiState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health))
        .route("/api/pipeline", post(run_pipeline))
        .route("/api/discover", post(discover))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    state: ApiState,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent;
    use crate::agent::handlers::{ExpenseAnalyzer, ExpenseParser, FinancialAdvisor};
    use crate::invoker::HttpInvoker;
    use crate::models::PipelineReport;
    use serde_json::json;

    async fn spawn_api(default_endpoints: Vec<String>) -> String {
        let state = ApiState {
            discovery: Arc::new(DiscoveryClient::new()),
            invoker: Arc::new(HttpInvoker::new()),
            default_endpoints,
        };
        let router = create_router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_pipeline_endpoint_end_to_end() {
        let mut endpoints = Vec::new();
        let (addr, _) = agent::spawn(Arc::new(ExpenseParser)).await.unwrap();
        endpoints.push(format!("http://{}", addr));
        let (addr, _) = agent::spawn(Arc::new(ExpenseAnalyzer)).await.unwrap();
        endpoints.push(format!("http://{}", addr));
        let (addr, _) = agent::spawn(Arc::new(FinancialAdvisor)).await.unwrap();
        endpoints.push(format!("http://{}", addr));

        let api = spawn_api(endpoints).await;

        let response = reqwest::Client::new()
            .post(format!("{}/api/pipeline", api))
            .json(&json!({ "input": "Spent 500 on groceries" }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);

        let body: ApiResponse = response.json().await.unwrap();
        assert!(body.success);

        let report: PipelineReport = serde_json::from_value(body.data.unwrap()).unwrap();
        assert!(report.completed);
        assert_eq!(report.stage_outputs.len(), 3);
        assert!(report.final_content.unwrap()["advisory"]
            .as_str()
            .unwrap()
            .contains("500"));
    }

    #[tokio::test]
    async fn test_pipeline_endpoint_rejects_missing_capability() {
        // Only a parser is running; analyze and advise are missing
        let (addr, _) = agent::spawn(Arc::new(ExpenseParser)).await.unwrap();
        let api = spawn_api(vec![format!("http://{}", addr)]).await;

        let response = reqwest::Client::new()
            .post(format!("{}/api/pipeline", api))
            .json(&json!({ "input": "Spent 500 on groceries" }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: ApiResponse = response.json().await.unwrap();
        assert!(!body.success);
        assert!(body.error.unwrap().contains("analyze"));
    }

    #[tokio::test]
    async fn test_pipeline_endpoint_requires_endpoints() {
        let api = spawn_api(vec![]).await;

        let response = reqwest::Client::new()
            .post(format!("{}/api/pipeline", api))
            .json(&json!({ "input": "Spent 500 on groceries" }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_discover_endpoint_reports_warnings() {
        let (addr, _) = agent::spawn(Arc::new(ExpenseParser)).await.unwrap();
        let api = spawn_api(vec![]).await;

        let response = reqwest::Client::new()
            .post(format!("{}/api/discover", api))
            .json(&json!({
                "endpoints": [format!("http://{}", addr), "http://127.0.0.1:9"]
            }))
            .send()
            .await
            .unwrap();

        let body: ApiResponse = response.json().await.unwrap();
        assert!(body.success);
        let data = body.data.unwrap();
        assert_eq!(data["capabilities"], json!(["parse"]));
        assert_eq!(data["warnings"].as_array().unwrap().len(), 1);
    }
}
