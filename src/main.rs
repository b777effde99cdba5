mod agent;
mod config;
mod conversation;
mod errors;
mod models;
mod render;
mod routes;
mod service;

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::agent::GeminiAgentService;
use crate::config::AppConfig;
use crate::conversation::ControllerSettings;
use crate::render::MarkdownRenderer;
use crate::routes::api_routes::health_handler;
use crate::routes::ws_routes::ws_chat_handler;
use crate::service::chat_service::ChatService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    // Initialise tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gemini_chat=debug,tower_http=debug".into()),
        )
        .init();

    // ── Configuration, resolved once ──────────────────────────────────────────
    let config = AppConfig::from_env()?;
    info!(
        model = %config.gemini_model,
        timeout_secs = config.request_timeout.as_secs(),
        regenerate_failures = ?config.regenerate_failure_policy,
        "configuration loaded"
    );

    // ── Dependency wiring ─────────────────────────────────────────────────────
    let agent = GeminiAgentService::new(&config)?;
    let model = agent.model().to_string();
    let settings = ControllerSettings {
        request_timeout: config.request_timeout,
        regenerate_failure_policy: config.regenerate_failure_policy,
    };
    let chat_service = ChatService::new(
        Arc::new(agent),
        Arc::new(MarkdownRenderer::new()),
        settings,
        model,
    );

    // ── Router ────────────────────────────────────────────────────────────────
    let app = Router::new()
        .route("/ws/chat", get(ws_chat_handler))
        .route("/api/health", get(health_handler))
        .layer(TraceLayer::new_for_http())
        // The widget is served by its own dev server during development.
        .layer(CorsLayer::permissive())
        .with_state(chat_service);

    // ── Listen ────────────────────────────────────────────────────────────────
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening on http://{addr}/");

    axum::serve(listener, app).await?;
    Ok(())
}
