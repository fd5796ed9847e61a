use expense_agent_orchestrator::agent::handlers::{
    ExpenseAnalyzer, ExpenseParser, FinancialAdvisor,
};
use expense_agent_orchestrator::agent::{AgentRuntime, TaskHandler};
use std::sync::Arc;
use tracing::info;

fn handler_for_role(role: &str) -> Option<(Arc<dyn TaskHandler>, u16)> {
    match role {
        "parser" => Some((Arc::new(ExpenseParser) as Arc<dyn TaskHandler>, 8001)),
        "analyzer" => Some((Arc::new(ExpenseAnalyzer) as Arc<dyn TaskHandler>, 8002)),
        "advisor" => Some((Arc::new(FinancialAdvisor) as Arc<dyn TaskHandler>, 8003)),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    dotenv::dotenv().ok();

    let role = std::env::var("AGENT_ROLE").unwrap_or_else(|_| "parser".to_string());

    let Some((handler, default_port)) = handler_for_role(&role) else {
        eprintln!(
            "Unknown AGENT_ROLE '{}' (expected parser, analyzer, or advisor)",
            role
        );
        std::process::exit(1);
    };

    let port: u16 = std::env::var("PORT")
        .unwrap_or_else(|_| default_port.to_string())
        .parse()?;

    info!(role = %role, port, "Starting agent server");

    AgentRuntime::new(handler).serve(port).await?;

    Ok(())
}
