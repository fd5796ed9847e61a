use expense_agent_orchestrator::api::{start_server, ApiState};
use expense_agent_orchestrator::discovery::DiscoveryClient;
use expense_agent_orchestrator::invoker::HttpInvoker;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

fn timeout_from_env(key: &str, default_ms: u64) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(default_ms))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    dotenv::dotenv().ok();

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    let default_endpoints: Vec<String> = std::env::var("AGENT_ENDPOINTS")
        .unwrap_or_else(|_| {
            "http://127.0.0.1:8001,http://127.0.0.1:8002,http://127.0.0.1:8003".to_string()
        })
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let card_timeout = timeout_from_env("CARD_TIMEOUT_MS", 5_000);
    let task_timeout = timeout_from_env("TASK_TIMEOUT_MS", 30_000);

    info!("Expense Agent Orchestrator - API Server");
    info!(port = api_port, agents = ?default_endpoints, "Configuration loaded");

    let state = ApiState {
        discovery: Arc::new(DiscoveryClient::with_timeouts(card_timeout, task_timeout)),
        invoker: Arc::new(HttpInvoker::new()),
        default_endpoints,
    };

    start_server(state, api_port).await?;

    Ok(())
}
