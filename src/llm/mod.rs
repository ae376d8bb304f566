//! LLM Gateway
//!
//! Providers turn a prompt into the model's reply parsed as JSON. The gateway
//! wraps one provider chosen at construction time, bounds concurrent calls and
//! owns the "answer with JSON only" re-prompt.

pub mod anthropic;
pub mod openai;
pub mod prompts;

use crate::config::{LlmProviderKind, Settings};
use crate::error::{Nl2SqlError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{info, warn};

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

pub const TEMPERATURE: f32 = 0.1;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Send `prompt` and return the reply parsed as JSON. A reply that is not
    /// JSON is `Nl2SqlError::ModelFormat`; transport and HTTP failures are
    /// `Nl2SqlError::Llm`.
    async fn complete(&self, prompt: &str) -> Result<Value>;
}

/// Build the configured provider. Missing credentials fail here, not on first use.
pub fn provider_from_settings(settings: &Settings) -> Result<Arc<dyn LlmProvider>> {
    info!(
        "Using {} provider with model {}",
        settings.llm_provider, settings.llm_model
    );
    let provider: Arc<dyn LlmProvider> = match settings.llm_provider {
        LlmProviderKind::OpenAi => Arc::new(OpenAiProvider::new(
            settings.openai_api_key.clone(),
            settings.llm_model.clone(),
            settings.openai_base_url.clone(),
            settings.llm_timeout,
        )?),
        LlmProviderKind::Anthropic => Arc::new(AnthropicProvider::new(
            settings.anthropic_api_key.clone(),
            settings.llm_model.clone(),
            settings.anthropic_base_url.clone(),
            settings.llm_timeout,
        )?),
    };
    Ok(provider)
}

pub struct LlmGateway {
    provider: Arc<dyn LlmProvider>,
    permits: Semaphore,
}

impl LlmGateway {
    pub fn new(provider: Arc<dyn LlmProvider>, max_concurrent: usize) -> Self {
        Self {
            provider,
            permits: Semaphore::new(max_concurrent.max(1)),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub async fn complete(&self, prompt: &str) -> Result<Value> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| Nl2SqlError::Llm("LLM limiter closed".to_string()))?;
        self.provider.complete(prompt).await
    }

    /// `complete`, re-prompting once with `reminder` appended when the first
    /// reply is not JSON. A second non-JSON reply is returned as the error.
    pub async fn complete_json(&self, prompt: &str, reminder: &str) -> Result<Value> {
        match self.complete(prompt).await {
            Err(Nl2SqlError::ModelFormat(reason)) => {
                warn!(
                    "{} reply was not JSON ({}), re-prompting for JSON only",
                    self.provider.name(),
                    reason
                );
                self.complete(&format!("{}\n{}", prompt, reminder)).await
            }
            other => other,
        }
    }
}

pub(crate) fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Nl2SqlError::Config(format!("Failed to create LLM HTTP client: {}", e)))
}

/// POST a JSON body and return the JSON envelope, failing on non-success status.
pub(crate) async fn send_json(request: reqwest::RequestBuilder, provider: &str) -> Result<Value> {
    let response = request
        .send()
        .await
        .map_err(|e| Nl2SqlError::Llm(format!("{} API call failed: {}", provider, e)))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(Nl2SqlError::Llm(format!(
            "{} API returned status {}: {}",
            provider, status, text
        )));
    }

    response
        .json()
        .await
        .map_err(|e| Nl2SqlError::Llm(format!("Failed to parse {} response envelope: {}", provider, e)))
}

/// Parse the model's text as JSON, tolerating a surrounding markdown fence.
pub fn parse_model_json(content: &str) -> Result<Value> {
    let trimmed = strip_code_fence(content.trim());
    serde_json::from_str(trimmed).map_err(|e| {
        Nl2SqlError::ModelFormat(format!("Model reply is not valid JSON: {}. Reply: {}", e, content))
    })
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
