//! Procurement assistant
//!
//! Serves a conversational assistant that answers restaurant operators by
//! driving a generation model and a set of inventory, supplier and order
//! tools, streaming each reply as it is produced.

mod api;
mod config;
mod db;
mod history;
mod llm;
mod runtime;
mod state_machine;
mod system_prompt;
mod tools;

use api::{create_router, AppState};
use config::AppConfig;
use db::Database;
use llm::LlmConfig;
use runtime::RuntimeManager;
use std::net::SocketAddr;
use std::sync::Arc;
use tools::ToolRegistry;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "procurement_assistant=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env();

    // Ensure database directory exists
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    tracing::info!(path = %config.db_path.display(), "Opening database");
    let db = Database::open(&config.db_path)?;

    let llm_config = LlmConfig::from_env();
    let llm = llm_config.connect(config.runtime.generation_timeout);
    if llm.is_some() {
        tracing::info!(model = %llm_config.model(), "Generation service configured");
    } else {
        tracing::warn!("No generation service configured. Set ANTHROPIC_API_KEY or LLM_GATEWAY.");
    }

    let tools = Arc::new(ToolRegistry::procurement(&db));
    let runtime = RuntimeManager::new(db, llm, tools, config.runtime.clone());
    let state = AppState::new(runtime);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Procurement assistant listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
