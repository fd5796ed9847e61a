use expense_agent_orchestrator::{
    agent,
    agent::handlers::{ExpenseAnalyzer, ExpenseParser, FinancialAdvisor},
    discovery::DiscoveryClient,
    invoker::HttpInvoker,
    pipeline::PipelineEngine,
};
use std::sync::Arc;
use tracing::info;

const SAMPLE_EXPENSES: &str = "\
Paid 12000 rent via upi
Spent 3500 on groceries with card
Uber rides for 1200
Dinner at a restaurant 800 cash
Netflix subscription 650
Electricity bill 1400 via upi";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    dotenv::dotenv().ok();

    info!("Expense Agent Orchestrator - self-contained demo");

    // Spawn the three agent runtimes on ephemeral local ports
    let mut endpoints = Vec::new();
    let (addr, _) = agent::spawn(Arc::new(ExpenseParser)).await?;
    endpoints.push(format!("http://{}", addr));
    let (addr, _) = agent::spawn(Arc::new(ExpenseAnalyzer)).await?;
    endpoints.push(format!("http://{}", addr));
    let (addr, _) = agent::spawn(Arc::new(FinancialAdvisor)).await?;
    endpoints.push(format!("http://{}", addr));

    info!(?endpoints, "Agent runtimes started");

    // Discover capabilities from the published agent cards
    let discovery = DiscoveryClient::new();
    let registry = discovery.discover(&endpoints).await;

    println!("\n=== DISCOVERED CAPABILITIES ===");
    for capability in registry.capabilities() {
        println!("  {}", capability);
    }
    for warning in registry.warnings() {
        println!("  warning: {} ({})", warning.endpoint, warning.reason);
    }

    // Input: expense text from a file if configured, else the sample
    let input = match std::env::var("EXPENSE_FILE") {
        Ok(path) => std::fs::read_to_string(path)?,
        Err(_) => SAMPLE_EXPENSES.to_string(),
    };

    // Run the pipeline
    let engine = PipelineEngine::new(Arc::new(registry), Arc::new(HttpInvoker::new()));
    let report = engine.run(serde_json::Value::String(input)).await?;

    println!("\n=== PIPELINE REPORT ===");
    println!("Run ID:         {}", report.run_id);
    println!("Correlation ID: {}", report.correlation_id);
    println!("Elapsed:        {} ms", report.elapsed_ms);

    for output in &report.stage_outputs {
        println!("\n--- stage: {} ---", output.capability);
        println!("{}", serde_json::to_string_pretty(&output.content)?);
    }

    match (&report.failed_stage, &report.error) {
        (Some(stage), Some(error)) => {
            eprintln!(
                "\nPipeline failed at stage {} ({}): {}",
                stage, error.kind, error.message
            );
            std::process::exit(1);
        }
        _ => {
            if let Some(advisory) = report
                .final_content
                .as_ref()
                .and_then(|c| c.get("advisory"))
                .and_then(|v| v.as_str())
            {
                println!("\n=== ADVISORY ===");
                println!("{}", advisory);
            }
            Ok(())
        }
    }
}
