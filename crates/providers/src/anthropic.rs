//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly.
//!
//! Wire differences from the OpenAI format:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as a top-level field, not a message
//! - Reply arrives as a list of typed content blocks

use async_trait::async_trait;
use kindred_core::error::ProviderError;
use kindred_core::message::{Message, Role};
use kindred_core::provider::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::wire;

const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(180))
            .build()
            .unwrap_or_default();

        Self {
            name: "anthropic".into(),
            base_url: ANTHROPIC_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Pull a single leading system message out of the turn list.
    ///
    /// A system message anywhere else has no slot in the Messages API, so it
    /// stays in place as a user turn.
    fn split_system(messages: &[Message]) -> (Option<String>, Vec<AnthropicMessage>) {
        let (system, rest) = match messages.split_first() {
            Some((first, rest)) if first.role == Role::System => {
                (Some(first.content.clone()), rest)
            }
            _ => (None, messages),
        };

        let turns = rest
            .iter()
            .map(|m| AnthropicMessage {
                role: match m.role {
                    Role::Assistant => "assistant".into(),
                    Role::User | Role::System => "user".into(),
                },
                content: m.content.clone(),
            })
            .collect();

        (system, turns)
    }

    fn build_body(request: &ProviderRequest) -> serde_json::Value {
        let (system, messages) = Self::split_system(&request.messages);

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
        });

        if let Some(sys) = system {
            body["system"] = serde_json::json!(sys);
        }

        body
    }

    /// Convert Anthropic API response to our ProviderResponse.
    fn parse_response(
        resp: AnthropicResponse,
        json_output: bool,
    ) -> Result<ProviderResponse, ProviderError> {
        let texts: Vec<&str> = resp
            .content
            .iter()
            .filter_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(text.as_str()),
                ResponseContentBlock::Other => None,
            })
            .collect();

        if texts.is_empty() {
            return Err(wire::malformed("anthropic", "no text block in response"));
        }

        let usage = resp.usage.map(|u| Usage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        });

        Ok(ProviderResponse {
            content: wire::finish_text(&texts.join("\n"), json_output),
            model: resp.model,
            usage,
        })
    }
}

#[async_trait]
impl kindred_core::Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = Self::build_body(&request);

        debug!(
            provider = "anthropic",
            model = %request.model,
            messages = request.messages.len(),
            request_bytes = request.content_bytes(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(wire::network_error)?;

        let response = wire::check_status(&self.name, response).await?;

        let api_resp: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| wire::malformed(&self.name, e))?;

        let parsed = Self::parse_response(api_resp, request.json_output)?;
        debug!(
            provider = "anthropic",
            model = %parsed.model,
            response_bytes = parsed.content.len(),
            "Completion received"
        );
        Ok(parsed)
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    model: String,
    content: Vec<ResponseContentBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ResponseContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindred_core::Provider;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_provider(server: &MockServer) -> AnthropicProvider {
        AnthropicProvider::new("test-key").with_base_url(server.uri())
    }

    fn hello_request() -> ProviderRequest {
        ProviderRequest::new(
            "claude-3-5-haiku-20241022",
            vec![Message::system("sys"), Message::user("Hello")],
        )
    }

    #[test]
    fn constructor() {
        let provider = AnthropicProvider::new("sk-ant-test");
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.base_url, ANTHROPIC_BASE_URL);
    }

    #[test]
    fn constructor_with_base_url() {
        let provider =
            AnthropicProvider::new("sk-ant-test").with_base_url("https://custom.proxy.com/");
        assert_eq!(provider.base_url, "https://custom.proxy.com");
    }

    #[test]
    fn leading_system_is_extracted() {
        let messages = vec![
            Message::system("You are warm"),
            Message::user("Hello"),
            Message::assistant("Hi!"),
        ];

        let (system, turns) = AnthropicProvider::split_system(&messages);
        assert_eq!(system.as_deref(), Some("You are warm"));
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, "user");
        assert_eq!(turns[1].role, "assistant");
    }

    #[test]
    fn later_system_stays_in_place_as_user_turn() {
        let messages = vec![
            Message::user("Hello"),
            Message::system("Remember to be brief"),
            Message::assistant("Ok"),
        ];
        let (system, turns) = AnthropicProvider::split_system(&messages);
        assert!(system.is_none());
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[1].role, "user");
        assert_eq!(turns[1].content, "Remember to be brief");
    }

    #[test]
    fn body_carries_top_level_system() {
        let req = ProviderRequest::new(
            "claude-3-5-sonnet-20241022",
            vec![Message::system("sys"), Message::user("hi")],
        );
        let body = AnthropicProvider::build_body(&req);
        assert_eq!(body["system"], "sys");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn parse_text_response() {
        let resp: AnthropicResponse = serde_json::from_str(
            r#"{
                "id": "msg_01",
                "model": "claude-sonnet-4-20250514",
                "content": [{"type": "text", "text": "Hello!  "}],
                "usage": {"input_tokens": 10, "output_tokens": 5},
                "stop_reason": "end_turn"
            }"#,
        )
        .unwrap();

        let pr = AnthropicProvider::parse_response(resp, false).unwrap();
        assert_eq!(pr.content, "Hello!");
        assert_eq!(pr.usage.unwrap().total_tokens, 15);
        assert_eq!(pr.model, "claude-sonnet-4-20250514");
    }

    #[test]
    fn parse_skips_non_text_blocks_and_strips_fence() {
        let resp: AnthropicResponse = serde_json::from_str(
            r#"{
                "model": "claude-sonnet-4-20250514",
                "content": [
                    {"type": "thinking", "thinking": "hmm"},
                    {"type": "text", "text": "```json\n{\"ok\": true}\n```"}
                ]
            }"#,
        )
        .unwrap();
        let pr = AnthropicProvider::parse_response(resp, true).unwrap();
        assert_eq!(pr.content, "{\"ok\": true}");
    }

    #[test]
    fn response_without_text_is_malformed() {
        let resp: AnthropicResponse =
            serde_json::from_str(r#"{"model": "m", "content": []}"#).unwrap();
        assert!(matches!(
            AnthropicProvider::parse_response(resp, false),
            Err(ProviderError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn complete_sends_key_and_version_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(serde_json::json!({"system": "sys"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg_01",
                "model": "claude-3-5-haiku-20241022",
                "content": [{"type": "text", "text": "Hello back"}],
                "usage": {"input_tokens": 8, "output_tokens": 3}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resp = test_provider(&server).complete(hello_request()).await.unwrap();
        assert_eq!(resp.content, "Hello back");
        assert_eq!(resp.usage.unwrap().total_tokens, 11);
    }

    #[tokio::test]
    async fn rate_limit_without_header_uses_default_wait() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "type": "error",
                "error": {"type": "rate_limit_error", "message": "slow down"}
            })))
            .mount(&server)
            .await;

        let err = test_provider(&server).complete(hello_request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { retry_after_secs: 5 }));
    }

    #[tokio::test]
    async fn overloaded_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = test_provider(&server).complete(hello_request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::ApiError { status_code: 529, .. }));
    }

    #[tokio::test]
    async fn forbidden_is_authentication_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = test_provider(&server).complete(hello_request()).await.unwrap_err();
        match err {
            ProviderError::AuthenticationFailed(msg) => assert!(msg.contains("403")),
            other => panic!("expected AuthenticationFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn garbage_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json at all"))
            .mount(&server)
            .await;

        let err = test_provider(&server).complete(hello_request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse(_)));
    }
}
