//! Google Gemini provider implementation.
//!
//! Uses the `generateContent` REST endpoint. The model name is part of the
//! URL path, the leading system message becomes `systemInstruction`, and the
//! assistant role is called `model` on the wire.

use async_trait::async_trait;
use kindred_core::error::ProviderError;
use kindred_core::message::{Message, Role};
use kindred_core::provider::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::wire;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Gemini `generateContent` provider.
pub struct GeminiProvider {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();

        Self {
            name: "gemini".into(),
            base_url: GEMINI_BASE_URL.into(),
            api_key: api_key.into(),
            client,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn split_system(messages: &[Message]) -> (Option<GeminiContent>, Vec<GeminiContent>) {
        let (system, rest) = match messages.split_first() {
            Some((first, rest)) if first.role == Role::System => (
                Some(GeminiContent {
                    role: None,
                    parts: vec![GeminiPart {
                        text: first.content.clone(),
                    }],
                }),
                rest,
            ),
            _ => (None, messages),
        };

        let contents = rest
            .iter()
            .map(|m| GeminiContent {
                role: Some(
                    match m.role {
                        Role::Assistant => "model",
                        Role::User | Role::System => "user",
                    }
                    .into(),
                ),
                parts: vec![GeminiPart {
                    text: m.content.clone(),
                }],
            })
            .collect();

        (system, contents)
    }

    fn build_body(request: &ProviderRequest) -> serde_json::Value {
        let (system, contents) = Self::split_system(&request.messages);

        let mut generation_config = serde_json::json!({
            "temperature": request.temperature,
        });
        if let Some(max_tokens) = request.max_tokens {
            generation_config["maxOutputTokens"] = serde_json::json!(max_tokens);
        }
        if request.json_output {
            generation_config["responseMimeType"] = serde_json::json!("application/json");
        }

        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": generation_config,
        });

        if let Some(sys) = system {
            body["systemInstruction"] = serde_json::json!(sys);
        }

        body
    }

    fn parse_response(
        resp: GeminiResponse,
        requested_model: &str,
        json_output: bool,
    ) -> Result<ProviderResponse, ProviderError> {
        let candidate = resp
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| wire::malformed("gemini", "no candidates in response"))?;

        let parts = candidate
            .content
            .map(|c| c.parts)
            .filter(|parts| !parts.is_empty())
            .ok_or_else(|| wire::malformed("gemini", "candidate has no content parts"))?;

        let text: String = parts.into_iter().map(|p| p.text).collect();

        let usage = resp.usage_metadata.map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        });

        Ok(ProviderResponse {
            content: wire::finish_text(&text, json_output),
            model: resp
                .model_version
                .unwrap_or_else(|| requested_model.to_string()),
            usage,
        })
    }
}

#[async_trait]
impl kindred_core::Provider for GeminiProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, request.model
        );
        let body = Self::build_body(&request);

        debug!(
            provider = "gemini",
            model = %request.model,
            messages = request.messages.len(),
            request_bytes = request.content_bytes(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(wire::network_error)?;

        let response = wire::check_status(&self.name, response).await?;

        let api_resp: GeminiResponse = response
            .json()
            .await
            .map_err(|e| wire::malformed(&self.name, e))?;

        let parsed = Self::parse_response(api_resp, &request.model, request.json_output)?;
        debug!(
            provider = "gemini",
            model = %parsed.model,
            response_bytes = parsed.content.len(),
            "Completion received"
        );
        Ok(parsed)
    }
}

// --- Gemini API types ---

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsage>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindred_core::Provider;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const GENERATE_PATH: &str = "/v1beta/models/gemini-1.5-flash:generateContent";

    fn test_provider(server: &MockServer) -> GeminiProvider {
        GeminiProvider::new("test-key").with_base_url(server.uri())
    }

    fn hello_request() -> ProviderRequest {
        ProviderRequest::new("gemini-1.5-flash", vec![Message::user("Hello")])
    }

    #[test]
    fn system_becomes_instruction_and_assistant_becomes_model() {
        let req = ProviderRequest::new(
            "gemini-1.5-pro",
            vec![
                Message::system("Be gentle"),
                Message::user("Hi"),
                Message::assistant("Hello"),
            ],
        );
        let body = GeminiProvider::build_body(&req);
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be gentle");
        assert!(body["systemInstruction"].get("role").is_none());
        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
    }

    #[test]
    fn json_mode_sets_mime_type() {
        let mut req = ProviderRequest::new("gemini-1.5-pro", vec![Message::user("x")]);
        req.json_output = true;
        req.max_tokens = Some(100);
        let body = GeminiProvider::build_body(&req);
        assert_eq!(body["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 100);
    }

    #[test]
    fn parse_joins_parts() {
        let resp: GeminiResponse = serde_json::from_str(
            r#"{
                "candidates": [{"content": {"role": "model", "parts": [{"text": "Hel"}, {"text": "lo "}]}}],
                "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 2, "totalTokenCount": 6},
                "modelVersion": "gemini-1.5-pro-002"
            }"#,
        )
        .unwrap();
        let pr = GeminiProvider::parse_response(resp, "gemini-1.5-pro", false).unwrap();
        assert_eq!(pr.content, "Hello");
        assert_eq!(pr.model, "gemini-1.5-pro-002");
        assert_eq!(pr.usage.unwrap().total_tokens, 6);
    }

    #[test]
    fn missing_candidates_is_malformed() {
        let resp: GeminiResponse = serde_json::from_str(r#"{"candidates": []}"#).unwrap();
        assert!(matches!(
            GeminiProvider::parse_response(resp, "gemini-1.5-pro", false),
            Err(ProviderError::MalformedResponse(_))
        ));
    }

    #[test]
    fn falls_back_to_requested_model_name() {
        let resp: GeminiResponse = serde_json::from_str(
            r#"{"candidates": [{"content": {"parts": [{"text": "ok"}]}}]}"#,
        )
        .unwrap();
        let pr = GeminiProvider::parse_response(resp, "gemini-1.5-flash", false).unwrap();
        assert_eq!(pr.model, "gemini-1.5-flash");
        assert!(pr.usage.is_none());
    }

    #[tokio::test]
    async fn complete_puts_model_in_path_and_key_in_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{"content": {"role": "model", "parts": [{"text": "Hi!"}]}}],
                "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 1, "totalTokenCount": 4}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let resp = test_provider(&server).complete(hello_request()).await.unwrap();
        assert_eq!(resp.content, "Hi!");
        assert_eq!(resp.model, "gemini-1.5-flash");
        assert_eq!(resp.usage.unwrap().total_tokens, 4);
    }

    #[tokio::test]
    async fn rate_limit_reads_retry_after_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "30"))
            .mount(&server)
            .await;

        let err = test_provider(&server).complete(hello_request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { retry_after_secs: 30 }));
    }

    #[tokio::test]
    async fn server_error_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
            .mount(&server)
            .await;

        let err = test_provider(&server).complete(hello_request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::ApiError { status_code: 500, .. }));
    }

    #[tokio::test]
    async fn rejected_key_is_authentication_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = test_provider(&server).complete(hello_request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn garbage_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GENERATE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("{ truncated"))
            .mount(&server)
            .await;

        let err = test_provider(&server).complete(hello_request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse(_)));
    }
}
