//! Integration stage.
//!
//! The second model call folds the pattern analysis into the previous
//! structured summary and asks for the new summary as JSON. Malformed output
//! never fails the run: it degrades to [`IntegrationOutcome::Unparseable`],
//! which the pipeline treats as "nothing learned". Provider errors propagate.

use kindred_core::context::{ExtractionResult, UserContext};
use kindred_core::error::ProviderError;
use kindred_core::provider::Summarizer;
use kindred_core::text::strip_code_fence;
use serde_json::Value;
use tracing::{debug, warn};

const INTEGRATION_PROMPT: &str = r#"You maintain a long-term understanding of a user for their AI companion.

Below is the current understanding and a new analysis of a recent conversation.
Produce an updated understanding that integrates the new analysis:
- Keep descriptive fields stable unless the analysis clearly refines them; leave a field as "" when there is nothing new to say.
- "recent_observations": what stood out in this conversation only.
- "consistent_patterns": behaviors confirmed again in this conversation.
- "changing_patterns": shifts compared to the current understanding.

Respond with a single JSON object exactly matching this schema:
{
  "core_understanding": {
    "personality": "string",
    "current_journey": "string",
    "communication_style": "string"
  },
  "relationship_patterns": {
    "interaction_style": "string",
    "trust_development": "string",
    "engagement_patterns": "string"
  },
  "evolving_insights": {
    "recent_observations": ["string"],
    "consistent_patterns": ["string"],
    "changing_patterns": ["string"]
  }
}
"#;

/// What the integration call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrationOutcome {
    /// The model returned a JSON object; missing fields were defaulted.
    Extracted(ExtractionResult),
    /// The model's reply could not be read as a JSON object.
    Unparseable,
}

impl IntegrationOutcome {
    /// The extraction, or the all-empty extraction when unparseable.
    pub fn into_extraction(self) -> ExtractionResult {
        match self {
            IntegrationOutcome::Extracted(extraction) => extraction,
            IntegrationOutcome::Unparseable => ExtractionResult::empty(),
        }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, IntegrationOutcome::Extracted(_))
    }
}

/// Read a model reply as an extraction.
///
/// Strips a Markdown code fence, then requires a JSON object. Field-level
/// shape problems are absorbed by the lenient deserializers.
pub fn parse_extraction(raw: &str) -> Option<ExtractionResult> {
    let body = strip_code_fence(raw);
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            let preview: String = body.chars().take(200).collect();
            warn!(error = %e, content_preview = %preview, "Integration output is not valid JSON");
            return None;
        }
    };

    if !value.is_object() {
        warn!("Integration output is JSON but not an object");
        return None;
    }

    serde_json::from_value(value)
        .map_err(|e| warn!(error = %e, "Integration output did not match the context shape"))
        .ok()
}

fn build_prompt(analysis: &str, current: &UserContext) -> String {
    let snapshot = ExtractionResult {
        core_understanding: current.core_understanding.clone(),
        relationship_patterns: current.relationship_patterns.clone(),
        evolving_insights: current.evolving_insights.clone(),
    };
    // Serializing plain strings and lists cannot fail.
    let current_json = serde_json::to_string_pretty(&snapshot).unwrap_or_else(|_| "{}".into());

    format!(
        "{INTEGRATION_PROMPT}\nCurrent understanding:\n{current_json}\n\nNew analysis:\n{analysis}\n"
    )
}

/// Run the integration call.
pub async fn integrate(
    summarizer: &dyn Summarizer,
    analysis: &str,
    current: &UserContext,
    model: Option<&str>,
) -> Result<IntegrationOutcome, ProviderError> {
    let prompt = build_prompt(analysis, current);
    let raw = summarizer.summarize(&prompt, true, model).await?;

    match parse_extraction(&raw) {
        Some(extraction) => {
            debug!("Integration output parsed");
            Ok(IntegrationOutcome::Extracted(extraction))
        }
        None => Ok(IntegrationOutcome::Unparseable),
    }
}
