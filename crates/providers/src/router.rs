//! Dispatch router — normalizes a model name, picks the vendor adapter, and
//! runs the call inside the retry envelope.
//!
//! Vendor selection is an explicit ordered lookup table of case-insensitive
//! substrings; the first hit wins and OpenAI is the baseline. There is no
//! fallback between vendors: a failed call surfaces its last error.

use async_trait::async_trait;
use kindred_core::error::ProviderError;
use kindred_core::message::Message;
use kindred_core::provider::{Provider, ProviderRequest, Summarizer};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::anthropic::AnthropicProvider;
use crate::gemini::GeminiProvider;
use crate::openai_compat::{DEEPSEEK_BASE_URL, OPENAI_BASE_URL, OpenAiCompatProvider};
use crate::retry::{RetryPolicy, with_retry};

/// The language-model vendors the router can dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vendor {
    OpenAi,
    Anthropic,
    DeepSeek,
    Gemini,
}

/// Substring markers in priority order.
const VENDOR_MARKERS: &[(&str, Vendor)] = &[
    ("claude", Vendor::Anthropic),
    ("deepseek", Vendor::DeepSeek),
    ("gemini", Vendor::Gemini),
];

/// Short names mapped to the versioned identifiers vendors expect.
const MODEL_ALIASES: &[(&str, &str)] = &[
    ("claude-3-5-sonnet", "claude-3-5-sonnet-20241022"),
    ("claude-3-5-haiku", "claude-3-5-haiku-20241022"),
    ("claude-3-opus", "claude-3-opus-20240229"),
    ("claude-sonnet-4", "claude-sonnet-4-20250514"),
    ("claude-opus-4", "claude-opus-4-20250514"),
    ("gemini-pro", "gemini-1.5-pro"),
    ("gemini-flash", "gemini-1.5-flash"),
    ("deepseek", "deepseek-chat"),
];

const JSON_SYSTEM_PROMPT: &str = "You are a precise analysis engine. Respond with a single valid JSON object and nothing else: no prose, no explanations, no Markdown code fences.";

const TEXT_SYSTEM_PROMPT: &str = "You are a thoughtful analyst. Respond with a clear, concise plain-text summary of your observations.";

impl Vendor {
    /// Pick the vendor for an (already normalized) model identifier.
    pub fn for_model(model: &str) -> Self {
        let lower = model.to_ascii_lowercase();
        VENDOR_MARKERS
            .iter()
            .find(|(marker, _)| lower.contains(marker))
            .map(|(_, vendor)| *vendor)
            .unwrap_or(Vendor::OpenAi)
    }

    /// The config key for this vendor.
    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::OpenAi => "openai",
            Vendor::Anthropic => "anthropic",
            Vendor::DeepSeek => "deepseek",
            Vendor::Gemini => "gemini",
        }
    }

    pub const ALL: [Vendor; 4] = [
        Vendor::OpenAi,
        Vendor::Anthropic,
        Vendor::DeepSeek,
        Vendor::Gemini,
    ];
}

impl std::fmt::Display for Vendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Expand a legacy alias to its canonical identifier; anything else passes
/// through unchanged.
pub fn normalize_model(model: &str) -> String {
    let trimmed = model.trim();
    MODEL_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(trimmed))
        .map(|(_, canonical)| (*canonical).to_string())
        .unwrap_or_else(|| trimmed.to_string())
}

/// Routes LLM requests to the correct vendor adapter.
pub struct DispatchRouter {
    adapters: HashMap<Vendor, Arc<dyn Provider>>,
    retry: RetryPolicy,
    chat_model: String,
    summary_model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl DispatchRouter {
    /// Create a router with no adapters registered.
    pub fn new(chat_model: impl Into<String>, summary_model: impl Into<String>) -> Self {
        Self {
            adapters: HashMap::new(),
            retry: RetryPolicy::default(),
            chat_model: chat_model.into(),
            summary_model: summary_model.into(),
            temperature: 0.7,
            max_tokens: None,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Register the adapter for a vendor, replacing any previous one.
    pub fn register(&mut self, vendor: Vendor, provider: Arc<dyn Provider>) {
        self.adapters.insert(vendor, provider);
    }

    /// Vendors with an adapter.
    pub fn vendors(&self) -> Vec<Vendor> {
        Vendor::ALL
            .into_iter()
            .filter(|v| self.adapters.contains_key(v))
            .collect()
    }

    pub fn chat_model(&self) -> &str {
        &self.chat_model
    }

    pub fn summary_model(&self) -> &str {
        &self.summary_model
    }

    /// Normalize the model and find its adapter.
    pub fn resolve(&self, model: &str) -> Result<(Arc<dyn Provider>, String), ProviderError> {
        let model = normalize_model(model);
        let vendor = Vendor::for_model(&model);
        let provider = self.adapters.get(&vendor).cloned().ok_or_else(|| {
            ProviderError::NotConfigured(format!(
                "no {vendor} adapter registered for model '{model}'"
            ))
        })?;
        Ok((provider, model))
    }

    /// One conversational turn.
    pub async fn converse(
        &self,
        messages: Vec<Message>,
        model_override: Option<&str>,
    ) -> Result<String, ProviderError> {
        let model = model_override.unwrap_or(&self.chat_model);
        self.dispatch(messages, model, false).await
    }

    /// A single-prompt structured or free-text summarization call.
    pub async fn summarize(
        &self,
        prompt: &str,
        expect_json: bool,
        model_override: Option<&str>,
    ) -> Result<String, ProviderError> {
        let system = if expect_json {
            JSON_SYSTEM_PROMPT
        } else {
            TEXT_SYSTEM_PROMPT
        };
        let messages = vec![Message::system(system), Message::user(prompt)];
        let model = model_override.unwrap_or(&self.summary_model);
        self.dispatch(messages, model, expect_json).await
    }

    async fn dispatch(
        &self,
        messages: Vec<Message>,
        model: &str,
        json_output: bool,
    ) -> Result<String, ProviderError> {
        let (provider, model) = self.resolve(model)?;

        let request = ProviderRequest {
            model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            json_output,
        };

        debug!(
            provider = provider.name(),
            model = %request.model,
            json_output,
            "Dispatching request"
        );

        let label = format!("{}:{}", provider.name(), request.model);
        let response = with_retry(&self.retry, &label, || provider.complete(request.clone())).await?;
        Ok(response.content)
    }
}

#[async_trait]
impl Summarizer for DispatchRouter {
    async fn summarize(
        &self,
        prompt: &str,
        expect_json: bool,
        model_override: Option<&str>,
    ) -> Result<String, ProviderError> {
        DispatchRouter::summarize(self, prompt, expect_json, model_override).await
    }
}

/// Build the router and one adapter per vendor that has an API key.
pub fn build_from_config(config: &kindred_config::AppConfig) -> DispatchRouter {
    let mut router = DispatchRouter::new(&config.chat_model, &config.summary_model)
        .with_retry_policy(RetryPolicy::from_config(&config.retry))
        .with_temperature(config.temperature)
        .with_max_tokens(config.max_tokens);

    for vendor in Vendor::ALL {
        let Some(api_key) = config.api_key(vendor.as_str()) else {
            continue;
        };
        let api_url = config
            .providers
            .get(vendor.as_str())
            .and_then(|p| p.api_url.as_deref());

        let provider: Arc<dyn Provider> = match vendor {
            Vendor::OpenAi => Arc::new(OpenAiCompatProvider::new(
                "openai",
                api_url.unwrap_or(OPENAI_BASE_URL),
                api_key,
            )),
            Vendor::DeepSeek => Arc::new(OpenAiCompatProvider::new(
                "deepseek",
                api_url.unwrap_or(DEEPSEEK_BASE_URL),
                api_key,
            )),
            Vendor::Anthropic => {
                let mut p = AnthropicProvider::new(api_key);
                if let Some(url) = api_url {
                    p = p.with_base_url(url);
                }
                Arc::new(p)
            }
            Vendor::Gemini => {
                let mut p = GeminiProvider::new(api_key);
                if let Some(url) = api_url {
                    p = p.with_base_url(url);
                }
                Arc::new(p)
            }
        };

        router.register(vendor, provider);
    }

    router
}
