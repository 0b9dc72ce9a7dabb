//! Provider health, refreshed by a periodic background probe.
//!
//! `ProviderHealth` is the only state shared across rooms. It is written
//! exclusively by the probe task and read everywhere else, so a plain
//! read-write lock around a small snapshot is all the synchronization
//! needed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::provider::{InferenceProvider, ProviderError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// No probe has completed yet.
    Checking,
    Online,
    Offline,
    Error,
}

#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub models: Vec<String>,
    pub checked_at: Option<DateTime<Utc>>,
}

pub struct ProviderHealth {
    state: RwLock<HealthSnapshot>,
}

impl ProviderHealth {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(HealthSnapshot {
                status: HealthStatus::Checking,
                models: Vec::new(),
                checked_at: None,
            }),
        }
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        self.state.read().clone()
    }

    pub fn is_online(&self) -> bool {
        self.state.read().status == HealthStatus::Online
    }

    pub fn record(&self, status: HealthStatus, models: Vec<String>) {
        let mut state = self.state.write();
        if state.status != status {
            info!("provider health: {:?} -> {:?}", state.status, status);
        }
        state.status = status;
        state.models = models;
        state.checked_at = Some(Utc::now());
    }
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn the periodic status probe. The first tick fires immediately so the
/// relay is not gated on `Checking` for a full interval after startup. The
/// task runs for the process lifetime.
pub fn spawn_probe(
    health: Arc<ProviderHealth>,
    provider: Arc<dyn InferenceProvider>,
    interval: Duration,
    model: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let (status, models) = match provider.status().await {
                Ok(status) if status.online => {
                    let models: Vec<String> =
                        status.models.into_iter().map(|m| m.name).collect();
                    if !model.is_empty() && !models.iter().any(|name| *name == model) {
                        warn!("configured model {} not offered by provider", model);
                    }
                    (HealthStatus::Online, models)
                }
                Ok(_) => (HealthStatus::Offline, Vec::new()),
                Err(ProviderError::Unreachable(err)) => {
                    warn!("provider status probe unreachable: {}", err);
                    (HealthStatus::Offline, Vec::new())
                }
                Err(err) => {
                    warn!("provider status probe failed: {}", err);
                    (HealthStatus::Error, Vec::new())
                }
            };

            health.record(status, models);
        }
    })
}
