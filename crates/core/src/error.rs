//! Error types for the Kindred domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all Kindred operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Storage errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Pipeline errors ---
    #[error("Memory update failed: {0}")]
    Pipeline(#[from] PipelineError),
}

// --- Bounded context errors ---

/// Failures raised by a language-model adapter.
///
/// Every variant is retried by the retry envelope; once attempts are
/// exhausted the last one reaches the caller unchanged.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),
}

/// A fatal failure of one memory pipeline run.
///
/// The `Display` text is what ends up in the log entry's `details` column.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to open summarization log: {0}")]
    Log(#[source] MemoryError),

    #[error("failed to load user context: {0}")]
    Load(#[source] MemoryError),

    #[error("failed to fetch recent messages: {0}")]
    MessageFetch(#[source] MemoryError),

    #[error("pattern analysis failed: {0}")]
    Analysis(#[source] ProviderError),

    #[error("context integration failed: {0}")]
    Integration(#[source] ProviderError),

    #[error("failed to persist user context: {0}")]
    Persistence(#[source] MemoryError),
}
