mod chunks;
mod configuration;
mod error;
mod routes;
mod state;

use anyhow::Context;
use configuration::Settings;
use parley::agent::{Agent, AgentConfig};
use parley::files::{DialFileStorage, FileStorage};
use parley::mcp::McpClient;
use parley::prompt_template::SYSTEM_PROMPT;
use parley::providers::base::Provider;
use parley::providers::dial::DialProvider;
use parley::rag::cache::DocumentCache;
use parley::rag::embeddings::DialEmbedder;
use parley::rag::splitter::RecursiveCharacterTextSplitter;
use parley::tools::code_interpreter::CodeInterpreterTool;
use parley::tools::rag::{RagTool, RagToolConfig};
use parley::tools::ToolRegistry;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "parley=info,parley_server=info,tower_http=info";

/// Wire the agent and its tools from the settings. The returned MCP client, if
/// any, must be closed on shutdown.
async fn build_agent(settings: &Settings) -> anyhow::Result<(Agent, Option<Arc<McpClient>>)> {
    let provider_config = settings.dial.provider_config();
    let provider: Arc<dyn Provider> = Arc::new(DialProvider::new(provider_config.clone())?);
    let storage: Arc<dyn FileStorage> = Arc::new(DialFileStorage::new(settings.dial.endpoint.clone())?);
    let embedder = Arc::new(DialEmbedder::new(
        provider_config,
        settings.rag.embeddings_deployment.clone(),
    )?);

    let rag = RagTool::new(
        provider.clone(),
        embedder,
        storage.clone(),
        Arc::new(DocumentCache::new()),
        RagToolConfig {
            deployment: settings
                .rag
                .deployment
                .clone()
                .unwrap_or_else(|| settings.dial.deployment.clone()),
            top_k: settings.rag.top_k,
        },
    )
    .with_splitter(RecursiveCharacterTextSplitter::new(
        settings.rag.chunk_size,
        settings.rag.chunk_overlap,
    )?);
    let mut registry = ToolRegistry::new().with_tool(Arc::new(rag))?;

    let mut mcp = None;
    if let Some(interpreter) = &settings.code_interpreter {
        let client = Arc::new(
            McpClient::connect(interpreter.mcp_url.clone())
                .await
                .with_context(|| format!("connecting to code interpreter at {}", interpreter.mcp_url))?,
        );
        let tool = CodeInterpreterTool::new(client.clone(), storage, &interpreter.tool_name).await?;
        registry.register(Arc::new(tool))?;
        mcp = Some(client);
    } else {
        info!("no code interpreter configured, code execution is disabled");
    }

    let system_prompt = match &settings.agent.system_prompt_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading system prompt from {}", path.display()))?,
        None => SYSTEM_PROMPT.to_string(),
    };
    let config = AgentConfig::new(settings.dial.deployment.clone())
        .with_system_prompt(system_prompt)
        .with_max_iterations(settings.agent.max_iterations);

    Ok((Agent::new(provider, registry, config)?, mcp))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .init();

    let settings = Settings::new()?;
    let (agent, mcp) = build_agent(&settings).await?;
    info!(
        deployment = %settings.dial.deployment,
        tools = agent.registry().len(),
        "agent ready"
    );

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::configure(state::AppState::new(agent))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let listener = tokio::net::TcpListener::bind(settings.server.socket_addr()?).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(client) = mcp {
        client.close().await;
    }
    Ok(())
}
