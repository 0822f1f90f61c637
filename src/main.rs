use anyhow::Context;
use quota_gate::{config::AppConfig, init_server, observability::init_tracing};
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Get config file path from command line or use default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "config/quota-gate.yaml".to_string());

    // Load configuration
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path))?;

    init_tracing(&config.logging)?;

    init_server(config).await.context("Quota gate error")?;

    Ok(())
}
