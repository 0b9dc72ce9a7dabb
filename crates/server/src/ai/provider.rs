//! HTTP client for the inference collaborator.
//!
//! The provider exposes three endpoints:
//!   GET  {base}/status        -> {online, models: [{name}]}
//!   POST {base}/chat          -> {success, message}
//!   POST {base}/chat/context  -> {message}
//!
//! The relay treats every failure shape the same way, so the error variants
//! here exist mostly for probe classification and logs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderStatus {
    pub online: bool,
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}

/// One turn of conversational context, oldest first.
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http client init failed: {0}")]
    Init(String),

    #[error("provider unreachable: {0}")]
    Unreachable(String),

    #[error("provider returned HTTP {0}")]
    Status(u16),

    #[error("provider response malformed: {0}")]
    Malformed(String),

    #[error("provider rejected request: {0}")]
    Rejected(String),
}

/// Boundary to the inference collaborator. Tests substitute a stub.
#[async_trait]
pub trait InferenceProvider: Send + Sync {
    async fn status(&self) -> Result<ProviderStatus, ProviderError>;

    async fn chat(
        &self,
        model: &str,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<String, ProviderError>;

    async fn chat_with_context(
        &self,
        model: &str,
        messages: &[ChatTurn],
        system: Option<&str>,
    ) -> Result<String, ProviderError>;
}

pub struct HttpProvider {
    base_url: String,
    client: reqwest::Client,
}

impl HttpProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Init(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post_json(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, ProviderError> {
        let url = format!("{}/{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ProviderError::Status(resp.status().as_u16()));
        }

        resp.json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl InferenceProvider for HttpProvider {
    async fn status(&self) -> Result<ProviderStatus, ProviderError> {
        let url = format!("{}/status", self.base_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::Unreachable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(ProviderError::Status(resp.status().as_u16()));
        }

        resp.json::<ProviderStatus>()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))
    }

    async fn chat(
        &self,
        model: &str,
        prompt: &str,
        system: Option<&str>,
    ) -> Result<String, ProviderError> {
        let mut body = json!({ "model": model, "prompt": prompt });
        if let Some(system) = system {
            body["system"] = json!(system);
        }

        let reply = self.post_json("chat", body).await?;
        let success = reply["success"].as_bool().unwrap_or(false);
        let message = reply["message"]
            .as_str()
            .ok_or_else(|| ProviderError::Malformed("missing message field".into()))?
            .to_string();

        if !success {
            return Err(ProviderError::Rejected(message));
        }
        Ok(message)
    }

    async fn chat_with_context(
        &self,
        model: &str,
        messages: &[ChatTurn],
        system: Option<&str>,
    ) -> Result<String, ProviderError> {
        let mut body = json!({ "model": model, "messages": messages });
        if let Some(system) = system {
            body["system"] = json!(system);
        }

        let reply = self.post_json("chat/context", body).await?;
        reply["message"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Malformed("missing message field".into()))
    }
}
