//! OpenAI-compatible chat completion backend.
//!
//! `POST {api_base}/chat/completions` with the peer's history as `messages`. Redirects
//! are not followed and the whole request is bounded by `timeout_secs`. A non-2xx
//! response becomes `UpstreamError { status, detail: <body> }`; transport and decoding
//! problems become `UpstreamError { status: None, .. }`.
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::errors::UpstreamError;
use crate::relay::context::ChatMessage;

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, history: &[ChatMessage]) -> Result<String, UpstreamError>;
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

pub struct OpenAiBackend {
    config: GenerationConfig,
    client: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(config: GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self { config, client })
    }

    pub fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    async fn generate(&self, history: &[ChatMessage]) -> Result<String, UpstreamError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: history,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };
        let mut request = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = self.config.api_key.as_deref().filter(|k| !k.is_empty()) {
            request = request.bearer_auth(key);
        }

        debug!(
            "Generation request: model={} messages={}",
            self.config.model,
            history.len()
        );
        let response = request
            .send()
            .await
            .map_err(|e| UpstreamError::other(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default().trim().to_string();
            warn!("Generation backend returned {}", status);
            return Err(UpstreamError::http(status.as_u16(), detail));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::other(format!("invalid completion response: {}", e)))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| UpstreamError::other("completion had no choices"))
    }
}
