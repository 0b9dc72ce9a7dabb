//! CareLine Chat Server Library
//!
//! Room-scoped real-time chat with typing presence and an AI assistant
//! relay, served over a WebSocket event channel.

pub mod ai;
pub mod config;
pub mod error;
pub mod gateway;
pub mod log;
pub mod models;
pub mod presence;
pub mod protocol;
pub mod rooms;
pub mod ws;

use axum::{extract::State, routing::get, Json, Router};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use ai::health::{spawn_probe, ProviderHealth};
use ai::provider::{HttpProvider, InferenceProvider};
use ai::AiRelay;
use config::{AppState, ChatServerConfig};
use gateway::ChatService;
use rooms::{RoomRegistry, RoomSummary};
use ws::ws_handler;

pub async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // Already set, ignore
    }

    info!("=== CareLine Chat Server ===");

    let config = ChatServerConfig::from_env();

    let registry = Arc::new(RoomRegistry::new(config.history_retained));

    // Assistant relay with its independent health probe
    let relay = if config.ai.enabled {
        let provider: Arc<dyn InferenceProvider> = Arc::new(HttpProvider::new(
            &config.ai.base_url,
            config.ai.request_timeout,
        )?);
        let health = Arc::new(ProviderHealth::new());
        // Probe runs for the process lifetime; the handle is not kept.
        let _ = spawn_probe(
            health.clone(),
            provider.clone(),
            config.ai.probe_interval,
            config.ai.model.clone(),
        );

        info!(
            "[{}] assistant relay initialized (provider {}, model {})",
            config.ai.assistant_name, config.ai.base_url, config.ai.model
        );
        Some(Arc::new(AiRelay::new(config.ai.clone(), provider, health)))
    } else {
        info!("assistant relay disabled");
        None
    };

    let service = Arc::new(ChatService::new(config.clone(), registry.clone(), relay));

    let app_state = AppState {
        service,
        registry: registry.clone(),
    };

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/rooms", get(list_rooms))
        .route("/health", get(health_check))
        .with_state(app_state)
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(tower_http::trace::TraceLayer::new_for_http());

    info!("listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// GET /rooms
async fn list_rooms(State(state): State<AppState>) -> Json<Vec<RoomSummary>> {
    Json(state.registry.summaries().await)
}

async fn health_check() -> &'static str {
    "OK - CareLine Chat Server"
}
