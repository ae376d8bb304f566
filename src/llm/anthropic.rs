//! Anthropic messages provider.

use crate::error::{Nl2SqlError, Result};
use crate::llm::{http_client, parse_model_json, send_json, LlmProvider, TEMPERATURE};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 800;

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [Message<'a>; 1],
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

impl AnthropicProvider {
    pub fn new(
        api_key: Option<String>,
        model: String,
        base_url: String,
        timeout: Duration,
    ) -> Result<Self> {
        let api_key = api_key
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| Nl2SqlError::Config("ANTHROPIC_API_KEY is not configured".to_string()))?;

        Ok(Self {
            client: http_client(timeout)?,
            api_key,
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request_body<'a>(&'a self, prompt: &'a str) -> MessagesRequest<'a> {
        MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            messages: [Message {
                role: "user",
                content: prompt,
            }],
            temperature: TEMPERATURE,
        }
    }
}

/// Concatenate the text blocks of a messages response.
fn extract_content(envelope: Value) -> Result<String> {
    let response: MessagesResponse = serde_json::from_value(envelope)
        .map_err(|e| Nl2SqlError::Llm(format!("Unexpected Anthropic response shape: {}", e)))?;
    Ok(response
        .content
        .into_iter()
        .filter_map(|block| block.text)
        .collect())
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(&self, prompt: &str) -> Result<Value> {
        debug!("Calling Anthropic model {} ({} prompt chars)", self.model, prompt.len());
        let request = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&self.request_body(prompt));

        let envelope = send_json(request, self.name()).await?;
        parse_model_json(&extract_content(envelope)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_key_fails_fast() {
        let result = AnthropicProvider::new(None, "m".into(), DEFAULT_BASE_URL.into(), Duration::from_secs(1));
        assert!(matches!(result, Err(Nl2SqlError::Config(msg)) if msg.contains("ANTHROPIC_API_KEY")));
    }

    #[test]
    fn test_request_body_shape() {
        let provider = AnthropicProvider::new(
            Some("key".into()),
            "claude-test".into(),
            DEFAULT_BASE_URL.into(),
            Duration::from_secs(1),
        )
        .unwrap();
        let body = serde_json::to_value(provider.request_body("q")).unwrap();
        assert_eq!(body["model"], "claude-test");
        assert_eq!(body["max_tokens"], 800);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "q");
    }

    #[test]
    fn test_extract_content_joins_text_blocks() {
        let envelope = json!({"content": [
            {"type": "text", "text": "{\"sql\": "},
            {"type": "text", "text": "\"SELECT 1\"}"}
        ]});
        let text = extract_content(envelope).unwrap();
        assert_eq!(parse_model_json(&text).unwrap()["sql"], "SELECT 1");
    }
}
