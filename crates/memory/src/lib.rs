//! User memory for Kindred.
//!
//! Backends that persist user contexts and summarization logs, the two
//! model-driven stages (pattern analysis, integration), the deterministic
//! merge & migration engine, and the pipeline that runs them in order.

pub mod accessor;
pub mod analysis;
pub mod in_memory;
pub mod integration;
pub mod merge;
pub mod pipeline;
pub mod prompt;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use accessor::{ContextAccessor, LogHandle, LogOutcome};
pub use analysis::{analyze_patterns, build_transcript};
pub use in_memory::InMemoryStore;
pub use integration::{IntegrationOutcome, integrate, parse_extraction};
pub use merge::{CONSISTENT_PATTERN_CAP, merge, merge_at, migrate_legacy};
pub use pipeline::MemoryPipeline;
pub use prompt::{NO_CONTEXT_SENTINEL, format_context_for_prompt};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
