mod config;
mod db;
mod errors;
mod interview;
mod llm_client;
mod routes;
mod state;
mod template;

use anyhow::Result;
use std::net::SocketAddr;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use std::sync::Arc;

use crate::config::Config;
use crate::db::create_pool;
use crate::interview::extractor::KeywordExtractor;
use crate::interview::service::InterviewService;
use crate::llm_client::{LlmClient, LlmGateway};
use crate::routes::build_router;
use crate::state::AppState;
use crate::template::catalog::TemplateCatalog;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on malformed env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("screener_api={},tower_http=info", &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Screener API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize SQLite
    let db = create_pool(&config.database_url).await?;

    // Initialize LLM client (optional: without a key every reply is the scripted question)
    let llm: Option<Arc<dyn LlmGateway>> = match config.anthropic_api_key.clone() {
        Some(key) => {
            let client = LlmClient::new(key)?;
            info!("LLM client initialized (model: {})", llm_client::MODEL);
            Some(Arc::new(client))
        }
        None => {
            warn!("ANTHROPIC_API_KEY not set, running in scripted fallback mode");
            None
        }
    };

    let interview_config = Arc::new(config.interview.clone());
    let extractor = Arc::new(KeywordExtractor::new(config.interview.clone()));
    let interview = InterviewService::new(db.clone(), llm, interview_config, extractor);

    let templates = Arc::new(TemplateCatalog::load(
        &config.interview,
        config.template_dir.as_deref(),
    ));

    // Build app state
    let state = AppState {
        db,
        interview,
        templates,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: restrict origins once the recruiter UI has a fixed host

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
