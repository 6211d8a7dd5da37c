//! OpenAI-compatible provider implementation.
//!
//! Works with: OpenAI, DeepSeek, and any endpoint exposing
//! `/chat/completions` with bearer authentication.
//!
//! System messages travel inline in the message array, so order is kept
//! exactly as given. Structured calls request `response_format: json_object`.

use async_trait::async_trait;
use kindred_core::error::ProviderError;
use kindred_core::message::Message;
use kindred_core::provider::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::wire;

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self::new("openai", OPENAI_BASE_URL, api_key)
    }

    /// Create a DeepSeek provider (convenience constructor).
    pub fn deepseek(api_key: impl Into<String>) -> Self {
        Self::new("deepseek", DEEPSEEK_BASE_URL, api_key)
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().into(),
                content: m.content.clone(),
            })
            .collect()
    }

    fn build_body(request: &ProviderRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": false,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if request.json_output {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }

        body
    }

    fn parse_response(
        name: &str,
        api_response: ApiResponse,
        json_output: bool,
    ) -> Result<ProviderResponse, ProviderError> {
        let content = api_response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| wire::malformed(name, "no message content in choices"))?;

        let usage = api_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        Ok(ProviderResponse {
            content: wire::finish_text(&content, json_output),
            model: api_response.model,
            usage,
        })
    }
}

#[async_trait]
impl kindred_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::build_body(&request);

        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            request_bytes = request.content_bytes(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(wire::network_error)?;

        let response = wire::check_status(&self.name, response).await?;

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| wire::malformed(&self.name, e))?;

        let parsed = Self::parse_response(&self.name, api_response, request.json_output)?;
        debug!(
            provider = %self.name,
            model = %parsed.model,
            response_bytes = parsed.content.len(),
            "Completion received"
        );
        Ok(parsed)
    }
}

// --- OpenAI API types ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
