//! Provider trait — the abstraction over LLM backends.
//!
//! A Provider knows how to send a conversation to one vendor's API and get
//! plain text back. The dispatch router owns one provider per vendor and
//! picks among them by model name.
//!
//! Implementations: OpenAI-compatible (OpenAI, DeepSeek), Anthropic, Gemini.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The vendor model identifier (already normalized by the router)
    pub model: String,

    /// The conversation messages, in order
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// The caller wants a bare JSON document back.
    ///
    /// Adapters ask the vendor for JSON mode where it exists and strip any
    /// Markdown code fence from the reply.
    #[serde(default)]
    pub json_output: bool,
}

fn default_temperature() -> f32 {
    0.7
}

impl ProviderRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: default_temperature(),
            max_tokens: None,
            json_output: false,
        }
    }

    /// Total bytes of message content, for size logging.
    pub fn content_bytes(&self) -> usize {
        self.messages.iter().map(|m| m.content.len()).sum()
    }
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated text, trimmed
    pub content: String,

    /// Which model actually responded (may differ from requested)
    pub model: String,

    /// Token usage statistics
    pub usage: Option<Usage>,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// The core Provider trait.
///
/// Every vendor adapter implements this trait. The router calls `complete()`
/// without knowing which wire format sits behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError>;
}

/// The model entry point used by the memory pipeline.
///
/// `summarize` sends a single prompt with an injected system instruction:
/// strict JSON when `expect_json` is set, a free-text summary otherwise.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(
        &self,
        prompt: &str,
        expect_json: bool,
        model_override: Option<&str>,
    ) -> Result<String, ProviderError>;
}
