//! HTTP plumbing shared by every adapter: status mapping and reply cleanup.

use kindred_core::error::ProviderError;
use kindred_core::text::strip_code_fence;
use tracing::warn;

const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// Map a non-2xx response to the matching `ProviderError`.
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    if response.status().is_success() {
        return Ok(response);
    }

    let status = response.status().as_u16();

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(format!(
            "{provider} rejected the API key (status {status})"
        )));
    }

    let error_body = response.text().await.unwrap_or_default();
    warn!(provider, status, body_bytes = error_body.len(), "Provider returned error");
    Err(ProviderError::ApiError {
        status_code: status,
        message: error_body,
    })
}

/// Trim the reply and, for structured calls, drop a Markdown code fence.
pub(crate) fn finish_text(raw: &str, json_output: bool) -> String {
    if json_output {
        strip_code_fence(raw).to_string()
    } else {
        raw.trim().to_string()
    }
}

/// Wrap a transport failure.
pub(crate) fn network_error(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(err.to_string())
    } else {
        ProviderError::Network(err.to_string())
    }
}

/// Wrap a body that could not be decoded.
pub(crate) fn malformed(provider: &str, err: impl std::fmt::Display) -> ProviderError {
    ProviderError::MalformedResponse(format!("{provider}: {err}"))
}
