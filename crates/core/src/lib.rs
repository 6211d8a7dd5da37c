//! # Kindred Core
//!
//! Domain types, traits, and error definitions for the Kindred companion
//! backend. This crate has **zero framework dependencies** — it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every seam is a trait here: language-model providers, the summarization
//! entry point used by the memory pipeline, the context store and the message
//! source. Implementations live in their respective crates, which keeps the
//! memory pipeline testable with scripted mocks and lets the CLI choose
//! backends from configuration.

pub mod error;
pub mod message;
pub mod provider;
pub mod context;
pub mod store;
pub mod text;

// Re-export key types at crate root for ergonomics
pub use error::{Error, MemoryError, PipelineError, ProviderError};
pub use message::{Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, Summarizer, Usage};
pub use context::{
    CoreUnderstanding, EvolvingInsights, ExtractionResult, RelationshipPatterns, UserContext,
};
pub use store::{ContextStore, LogStatus, MessageSource, SummarizationLogEntry};
