//! HTTP surface for the snapfix pipeline.
//!
//! A single shared conversation per server process, matching the
//! one-user-one-device deployment model. All state lives in the
//! [`ConversationLog`] inside the pipeline; handlers are thin adapters
//! between JSON/multipart requests and pipeline calls.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use snapfix_core::config::Config;
use snapfix_core::conversation::ConversationLog;
use snapfix_core::gateway::{GeminiConfig, GeminiGateway};
use snapfix_core::pipeline::Pipeline;
use snapfix_core::search::DuckDuckGoSearcher;
use snapfix_core::upload::AnonymousImageHost;
use tower_http::trace::TraceLayer;

mod routes;

/// Base64 image payloads routinely exceed axum's 2 MB default.
const MAX_BODY_BYTES: usize = 24 * 1024 * 1024;

type AppPipeline = Pipeline<GeminiGateway, DuckDuckGoSearcher, AnonymousImageHost>;

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<AppPipeline>,
}

impl AppState {
    pub fn from_config(config: &Config) -> Result<Self> {
        let gateway = GeminiGateway::new(GeminiConfig::from_config(config)?);
        let searcher = DuckDuckGoSearcher::new(config.search_timeout());
        let uploader = AnonymousImageHost::new(config.upload_timeout());
        let pipeline = Pipeline::new(
            Arc::new(ConversationLog::new()),
            gateway,
            searcher,
            uploader,
            config.context_window,
        );
        Ok(Self {
            pipeline: Arc::new(pipeline),
        })
    }
}

pub fn router(state: AppState) -> Router {
    routes::router()
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds the configured address and serves until ctrl-c.
pub async fn run(config: Config) -> Result<()> {
    let state = AppState::from_config(&config)?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, model = %config.model, "snapfix listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to install ctrl-c handler");
        return;
    }
    tracing::info!("Shutting down");
}
