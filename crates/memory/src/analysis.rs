//! Pattern analysis stage.
//!
//! The first of the two model calls: a raw transcript goes in, free-text
//! behavioral observations come out. Nothing is validated beyond making sure
//! the integration stage always receives a non-empty string.

use kindred_core::error::ProviderError;
use kindred_core::message::{Message, Role};
use kindred_core::provider::Summarizer;
use tracing::{debug, warn};

/// Substituted when the model returns nothing.
pub const EMPTY_ANALYSIS_PLACEHOLDER: &str = "No notable patterns observed in this conversation.";

const ANALYSIS_PROMPT: &str = r#"You are observing a conversation between a user and their AI companion. Describe what this conversation reveals about the user as a person.

Focus on qualitative observations:
1. Personality signals (temperament, curiosity, humor, openness)
2. Communication style and any shift in it (length, tone, directness)
3. Changes in trust or engagement toward the companion
4. Recurring behaviors that seem characteristic of the user

Do NOT restate literal facts, names, dates, or event details from the conversation.
Write a few short paragraphs of plain prose. Do not use JSON.

Conversation:
"#;

/// Render messages as `User: …` / `Assistant: …` lines.
///
/// System messages carry instructions, not user behavior, and are skipped.
pub fn build_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .filter_map(|m| match m.role {
            Role::User => Some(format!("User: {}", m.content.trim())),
            Role::Assistant => Some(format!("Assistant: {}", m.content.trim())),
            Role::System => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Run the pattern analysis call over a transcript.
pub async fn analyze_patterns(
    summarizer: &dyn Summarizer,
    transcript: &str,
    model: Option<&str>,
) -> Result<String, ProviderError> {
    let prompt = format!("{ANALYSIS_PROMPT}{transcript}");
    let analysis = summarizer.summarize(&prompt, false, model).await?;
    let analysis = analysis.trim();

    if analysis.is_empty() {
        warn!("Pattern analysis returned empty output; using placeholder");
        return Ok(EMPTY_ANALYSIS_PLACEHOLDER.to_string());
    }

    debug!(analysis_len = analysis.len(), "Pattern analysis complete");
    Ok(analysis.to_string())
}
