//! LLM Provider implementations for Kindred.
//!
//! All adapters implement the `kindred_core::Provider` trait.
//! The dispatch router selects the adapter from the model name and wraps
//! every call in the retry envelope.

pub mod anthropic;
pub mod gemini;
pub mod openai_compat;
pub mod retry;
pub mod router;
mod wire;

pub use anthropic::AnthropicProvider;
pub use gemini::GeminiProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use retry::{RetryPolicy, with_retry};
pub use router::{DispatchRouter, Vendor, build_from_config, normalize_model};
