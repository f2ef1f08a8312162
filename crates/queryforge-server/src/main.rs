//! QueryForge MCP server with OpenAI integration
//!
//! Model Context Protocol server that accepts natural language questions with a
//! schema description, has OpenAI write the query, and returns it only after
//! the safety validator accepts it. Nothing is executed.

use anyhow::Context;
use queryforge_core::QueryGenerator;
use rust_mcp_sdk::mcp_server::{hyper_server, HyperServerOptions};
use std::sync::Arc;
use tracing::info;

mod config;
mod llm;
mod logging;
mod mcp;

use config::Config;

const CONFIG_PATH_VAR: &str = "QUERYFORGE_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Secrets and overrides
    dotenvy::dotenv().ok();

    let config_path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| "config.yaml".to_string());
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading configuration from {config_path}"))?;
    logging::init(&config.logging).context("initializing logging")?;
    config.validate()?;

    let api_key = Config::get_openai_api_key()?;
    info!(model = %config.generation.model, config = %config_path, "Configuration loaded");

    let openai_config = async_openai::config::OpenAIConfig::new().with_api_key(api_key);
    let openai_client = async_openai::Client::with_config(openai_config);
    let client = llm::OpenAiClient::new(openai_client, &config.generation);

    let generator = QueryGenerator::new(Arc::new(client), config.generator_settings());
    let handler = mcp::QueryForgeServerHandler::new(generator, config.generation.model.clone());
    let server_info = mcp::QueryForgeServerHandler::server_info();

    info!(
        host = %config.server.host,
        port = config.server.port,
        dialects = ?config.dialects.enabled(),
        "Starting QueryForge MCP server"
    );

    let server = hyper_server::create_server(
        server_info,
        handler,
        HyperServerOptions {
            host: config.server.host.clone(),
            port: config.server.port,
            sse_support: true,
            ..Default::default()
        },
    );

    server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("MCP server stopped: {e}"))?;

    Ok(())
}
