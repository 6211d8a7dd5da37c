//! Render a user context for injection into a conversational system prompt.

use kindred_core::context::UserContext;

pub const USER_CONTEXT_START: &str = "USER_CONTEXT_START";
pub const USER_CONTEXT_END: &str = "USER_CONTEXT_END";

/// Returned instead of a block when there is nothing to say yet.
pub const NO_CONTEXT_SENTINEL: &str =
    "No prior context is available for this user yet. Get to know them naturally.";

/// A narrative block between `USER_CONTEXT_START` / `USER_CONTEXT_END`
/// lines listing only the non-empty fields, or [`NO_CONTEXT_SENTINEL`].
pub fn format_context_for_prompt(context: Option<&UserContext>) -> String {
    let Some(context) = context.filter(|c| !c.is_empty()) else {
        return NO_CONTEXT_SENTINEL.to_string();
    };

    let core = &context.core_understanding;
    let rel = &context.relationship_patterns;
    let insights = &context.evolving_insights;

    let mut lines = vec![USER_CONTEXT_START.to_string()];
    let mut line = |label: &str, value: &str| {
        let value = value.trim();
        if !value.is_empty() {
            lines.push(format!("{label}: {value}"));
        }
    };

    line("Personality", &core.personality);
    line("Current journey", &core.current_journey);
    line("Communication style", &core.communication_style);
    line("Interaction style", &rel.interaction_style);
    line("Trust development", &rel.trust_development);
    line("Engagement patterns", &rel.engagement_patterns);
    line("Recently observed", &insights.recent_observations.join("; "));
    line("Consistent patterns", &insights.consistent_patterns.join("; "));
    line("Changing patterns", &insights.changing_patterns.join("; "));

    lines.push(USER_CONTEXT_END.to_string());
    lines.join("\n")
}
