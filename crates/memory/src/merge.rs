//! Merge & migration engine — deterministic rules applied after the
//! integration stage, plus the legacy-shape migration applied on load.
//!
//! Merge rules, in order:
//! 1. each descriptive string field is replaced only by a non-empty value;
//! 2. `recent_observations` and `changing_patterns` are replaced wholesale;
//! 3. `consistent_patterns` accumulates: existing then extracted, exact
//!    duplicates collapsed to their most recent position, capped at the
//!    newest [`CONSISTENT_PATTERN_CAP`] entries;
//! 4. `last_update` is set unconditionally.

use chrono::{DateTime, Utc};
use kindred_core::context::{ExtractionResult, UserContext};
use serde_json::Value;
use std::collections::HashSet;
use tracing::info;

/// Maximum number of accumulated consistent patterns.
pub const CONSISTENT_PATTERN_CAP: usize = 20;

/// Merge an extraction into the existing context, stamped with `Utc::now()`.
pub fn merge(existing: &UserContext, extracted: &ExtractionResult) -> UserContext {
    merge_at(existing, extracted, Utc::now())
}

/// Merge an extraction into the existing context, stamped with `now`.
pub fn merge_at(
    existing: &UserContext,
    extracted: &ExtractionResult,
    now: DateTime<Utc>,
) -> UserContext {
    let mut merged = existing.clone();

    let core = &mut merged.core_understanding;
    let new_core = &extracted.core_understanding;
    replace_if_present(&mut core.personality, &new_core.personality);
    replace_if_present(&mut core.current_journey, &new_core.current_journey);
    replace_if_present(&mut core.communication_style, &new_core.communication_style);

    let rel = &mut merged.relationship_patterns;
    let new_rel = &extracted.relationship_patterns;
    replace_if_present(&mut rel.interaction_style, &new_rel.interaction_style);
    replace_if_present(&mut rel.trust_development, &new_rel.trust_development);
    replace_if_present(&mut rel.engagement_patterns, &new_rel.engagement_patterns);

    let insights = &mut merged.evolving_insights;
    let new_insights = &extracted.evolving_insights;
    insights.recent_observations = new_insights.recent_observations.clone();
    insights.changing_patterns = new_insights.changing_patterns.clone();
    insights.consistent_patterns = accumulate(
        &existing.evolving_insights.consistent_patterns,
        &new_insights.consistent_patterns,
        CONSISTENT_PATTERN_CAP,
    );

    merged.last_update = Some(now);
    merged
}

/// The degraded update: nothing new was learned, only the timestamp moves.
///
/// Used when the integration stage could not parse the model's output, so
/// a bad turn never wipes the per-update lists.
pub fn touch(existing: &UserContext, now: DateTime<Utc>) -> UserContext {
    let mut touched = existing.clone();
    touched.last_update = Some(now);
    touched
}

fn replace_if_present(target: &mut String, candidate: &str) {
    let candidate = candidate.trim();
    if !candidate.is_empty() {
        *target = candidate.to_string();
    }
}

/// Append `incoming` to `existing`, collapse exact duplicates to their last
/// position, drop blanks, and keep only the newest `cap` entries.
pub fn accumulate(existing: &[String], incoming: &[String], cap: usize) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut newest_first: Vec<String> = Vec::new();

    for item in existing.iter().chain(incoming).rev() {
        if item.trim().is_empty() {
            continue;
        }
        if seen.insert(item.as_str()) {
            newest_first.push(item.clone());
        }
    }

    newest_first.truncate(cap);
    newest_first.reverse();
    newest_first
}

/// A stored value in the pre-structured shape: flat `preferences`/`facts`
/// lists and no `core_understanding` group.
pub fn is_legacy(value: &Value) -> bool {
    value.as_object().is_some_and(|obj| {
        !obj.contains_key("core_understanding")
            && (obj.contains_key("preferences") || obj.contains_key("facts"))
    })
}

/// Rebuild a legacy value in the current shape.
///
/// `preferences` seed `recent_observations`, `facts` seed
/// `consistent_patterns`; every other group starts empty.
pub fn migrate_legacy(value: &Value) -> UserContext {
    let strings = |key: &str| -> Vec<String> {
        value
            .get(key)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    };

    let mut context = UserContext::default();
    context.evolving_insights.recent_observations = strings("preferences");
    context.evolving_insights.consistent_patterns =
        accumulate(&[], &strings("facts"), CONSISTENT_PATTERN_CAP);
    context.last_update = value
        .get("last_update")
        .or_else(|| value.get("lastUpdated"))
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));
    context
}

/// Turn whatever the store holds into a fully-shaped context.
pub fn from_stored(value: Value) -> UserContext {
    if is_legacy(&value) {
        info!("Migrating legacy user context shape");
        migrate_legacy(&value)
    } else {
        UserContext::from_value(value)
    }
}
