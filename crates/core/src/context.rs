//! The long-term user context model.
//!
//! A `UserContext` is the structured natural-language summary the memory
//! pipeline maintains for each user. Every group and field always exists:
//! deserialization backfills missing keys, reads `null` as empty, and treats
//! a non-array under a list field as an empty list. Consumers never have to
//! null-check.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who the user is, in a few sentences per facet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreUnderstanding {
    #[serde(deserialize_with = "lenient::string")]
    pub personality: String,
    #[serde(deserialize_with = "lenient::string")]
    pub current_journey: String,
    #[serde(deserialize_with = "lenient::string")]
    pub communication_style: String,
}

/// How the user relates to the companion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationshipPatterns {
    #[serde(deserialize_with = "lenient::string")]
    pub interaction_style: String,
    #[serde(deserialize_with = "lenient::string")]
    pub trust_development: String,
    #[serde(deserialize_with = "lenient::string")]
    pub engagement_patterns: String,
}

/// Observations that change over time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolvingInsights {
    /// What stood out in the latest update. Replaced wholesale.
    #[serde(deserialize_with = "lenient::list")]
    pub recent_observations: Vec<String>,
    /// Accumulated, de-duplicated, capped.
    #[serde(deserialize_with = "lenient::list")]
    pub consistent_patterns: Vec<String>,
    /// Shifts noticed in the latest update. Replaced wholesale.
    #[serde(deserialize_with = "lenient::list")]
    pub changing_patterns: Vec<String>,
}

/// The persisted per-user summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserContext {
    #[serde(deserialize_with = "lenient::group")]
    pub core_understanding: CoreUnderstanding,
    #[serde(deserialize_with = "lenient::group")]
    pub relationship_patterns: RelationshipPatterns,
    #[serde(deserialize_with = "lenient::group")]
    pub evolving_insights: EvolvingInsights,
    /// Set on every successful update; `None` for a never-updated context.
    #[serde(deserialize_with = "lenient::timestamp")]
    pub last_update: Option<DateTime<Utc>>,
}

impl UserContext {
    /// Read a stored or model-produced JSON value into a fully-shaped context.
    ///
    /// Anything that is not a JSON object yields the default context.
    pub fn from_value(value: serde_json::Value) -> Self {
        serde_json::from_value(value).unwrap_or_default()
    }

    /// True when no field carries any content yet.
    pub fn is_empty(&self) -> bool {
        let c = &self.core_understanding;
        let r = &self.relationship_patterns;
        let e = &self.evolving_insights;
        [
            &c.personality,
            &c.current_journey,
            &c.communication_style,
            &r.interaction_style,
            &r.trust_development,
            &r.engagement_patterns,
        ]
        .iter()
        .all(|s| s.trim().is_empty())
            && e.recent_observations.is_empty()
            && e.consistent_patterns.is_empty()
            && e.changing_patterns.is_empty()
    }
}

/// The integration stage's structured output before merge rules apply.
///
/// Mirrors `UserContext` without the timestamp.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionResult {
    #[serde(deserialize_with = "lenient::group")]
    pub core_understanding: CoreUnderstanding,
    #[serde(deserialize_with = "lenient::group")]
    pub relationship_patterns: RelationshipPatterns,
    #[serde(deserialize_with = "lenient::group")]
    pub evolving_insights: EvolvingInsights,
}

impl ExtractionResult {
    /// The all-empty extraction: every string `""`, every list `[]`.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Field deserializers that never fail on shape mismatches.
mod lenient {
    use chrono::{DateTime, Utc};
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn string<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => String::new(),
        })
    }

    pub fn list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        })
    }

    pub fn group<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned + Default,
    {
        Ok(match Value::deserialize(deserializer)? {
            value @ Value::Object(_) => T::deserialize(value).unwrap_or_default(),
            _ => T::default(),
        })
    }

    pub fn timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::String(s) => DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok(),
            _ => None,
        })
    }
}
