//! Small text helpers shared by adapters and the integration stage.

/// Strip a Markdown code fence wrapping the whole reply.
///
/// Handles ```` ```json ```` and bare ```` ``` ```` fences. Text without a
/// leading fence is returned trimmed but otherwise untouched.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Skip the info string (e.g. "json") up to the first newline.
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => rest,
    };

    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}
