//! Chat server configuration

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::ai::AiConfig;
use crate::gateway::ChatService;
use crate::rooms::RoomRegistry;

/// Configuration for the CareLine chat server
#[derive(Clone, Debug)]
pub struct ChatServerConfig {
    /// Address the server listens on
    pub bind_addr: SocketAddr,
    /// Messages retained per room; older ones are dropped from replay
    pub history_retained: usize,
    /// Server-side typing expiry window. Must exceed the client's
    /// quiescence interval (clients stop signaling after ~1s).
    pub typing_ttl: Duration,
    /// Remove rooms when their last member leaves
    pub reap_empty_rooms: bool,
    /// Assistant relay settings
    pub ai: AiConfig,
}

impl Default for ChatServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            history_retained: 500,
            typing_ttl: Duration::from_secs(4),
            reap_empty_rooms: true,
            ai: AiConfig::default(),
        }
    }
}

impl ChatServerConfig {
    /// Default configuration with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("CARELINE_ADDR") {
            match addr.parse() {
                Ok(addr) => config.bind_addr = addr,
                Err(_) => tracing::warn!("ignoring unparseable CARELINE_ADDR {:?}", addr),
            }
        }
        if let Ok(url) = std::env::var("CARELINE_AI_URL") {
            config.ai.base_url = url.trim_end_matches('/').to_string();
        }
        if let Ok(model) = std::env::var("CARELINE_AI_MODEL") {
            config.ai.model = model;
        }
        if std::env::var("DISABLE_AI").is_ok() {
            config.ai.enabled = false;
        }

        config
    }
}

/// App state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ChatService>,
    pub registry: Arc<RoomRegistry>,
}
