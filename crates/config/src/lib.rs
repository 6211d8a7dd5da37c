//! Configuration loading, validation, and management for Kindred.
//!
//! Loads configuration from `~/.kindred/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Vendors the dispatch layer knows how to talk to, with the env var that
/// supplies each one's API key.
pub const PROVIDER_KEY_VARS: &[(&str, &str)] = &[
    ("openai", "OPENAI_API_KEY"),
    ("anthropic", "ANTHROPIC_API_KEY"),
    ("deepseek", "DEEPSEEK_API_KEY"),
    ("gemini", "GEMINI_API_KEY"),
];

/// The root configuration structure.
///
/// Maps directly to `~/.kindred/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Default model for conversational turns
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    /// Default model for the memory pipeline's summarization calls
    #[serde(default = "default_summary_model")]
    pub summary_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Provider-specific configurations, keyed by vendor name
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Retry envelope settings
    #[serde(default)]
    pub retry: RetryConfig,

    /// Memory pipeline and storage settings
    #[serde(default)]
    pub memory: MemoryConfig,
}

fn default_chat_model() -> String {
    "gpt-4o".into()
}
fn default_summary_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    2048
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("chat_model", &self.chat_model)
            .field("summary_model", &self.summary_model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("providers", &self.providers)
            .field("retry", &self.retry)
            .field("memory", &self.memory)
            .finish()
    }
}

/// Per-vendor credentials and endpoint override.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL override (proxies, self-hosted gateways)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

/// Upper bound accepted for `retry.max_attempts`.
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// "sqlite" or "in_memory"
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// How many recent messages feed one pipeline run
    #[serde(default = "default_transcript_limit")]
    pub transcript_limit: usize,

    /// Run the pipeline after every N stored messages (0 disables)
    #[serde(default = "default_update_every")]
    pub update_every_n_messages: usize,
}

fn default_memory_backend() -> String {
    "sqlite".into()
}
fn default_database_path() -> PathBuf {
    AppConfig::config_dir().join("kindred.db")
}
fn default_transcript_limit() -> usize {
    20
}
fn default_update_every() -> usize {
    10
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            database_path: default_database_path(),
            transcript_limit: default_transcript_limit(),
            update_every_n_messages: default_update_every(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location, then apply environment
    /// overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_with(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file. A missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides using the given lookup.
    ///
    /// Model variables always win; API key variables only fill keys the
    /// file left unset.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(model) = lookup("KINDRED_CHAT_MODEL") {
            self.chat_model = model;
        }
        if let Some(model) = lookup("KINDRED_SUMMARY_MODEL") {
            self.summary_model = model;
        }
        if let Some(path) = lookup("KINDRED_DATABASE_PATH") {
            self.memory.database_path = PathBuf::from(path);
        }

        for (vendor, var) in PROVIDER_KEY_VARS {
            let entry = self.providers.entry((*vendor).to_string()).or_default();
            if entry.api_key.is_none() {
                entry.api_key = lookup(var).filter(|k| !k.is_empty());
            }
        }
    }

    /// Get the config directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".kindred")
    }

    /// The API key configured for a vendor, if any.
    pub fn api_key(&self, vendor: &str) -> Option<&str> {
        self.providers
            .get(vendor)
            .and_then(|p| p.api_key.as_deref())
            .filter(|k| !k.is_empty())
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.temperature < 0.0 || self.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.retry.max_attempts == 0 || self.retry.max_attempts > MAX_RETRY_ATTEMPTS {
            return Err(ConfigError::ValidationError(format!(
                "retry.max_attempts must be between 1 and {MAX_RETRY_ATTEMPTS}"
            )));
        }

        if self.memory.transcript_limit == 0 {
            return Err(ConfigError::ValidationError(
                "memory.transcript_limit must be at least 1".into(),
            ));
        }

        if !matches!(self.memory.backend.as_str(), "sqlite" | "in_memory") {
            return Err(ConfigError::ValidationError(format!(
                "unknown memory backend '{}' (expected sqlite or in_memory)",
                self.memory.backend
            )));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            chat_model: default_chat_model(),
            summary_model: default_summary_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            providers: HashMap::new(),
            retry: RetryConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.chat_model, "gpt-4o");
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 1000);
        assert_eq!(config.memory.transcript_limit, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.summary_model, config.summary_model);
        assert_eq!(parsed.memory.backend, config.memory.backend);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut config = AppConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn excessive_attempts_rejected() {
        let mut config = AppConfig::default();
        config.retry.max_attempts = 200;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("retry.max_attempts"));

        config.retry.max_attempts = MAX_RETRY_ATTEMPTS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_backend_rejected() {
        let mut config = AppConfig::default();
        config.memory.backend = "redis".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("redis"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.chat_model, "gpt-4o");
    }

    #[test]
    fn loads_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
summary_model = "claude-3-5-haiku"

[providers.anthropic]
api_key = "sk-ant-file"

[memory]
backend = "in_memory"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.summary_model, "claude-3-5-haiku");
        assert_eq!(config.chat_model, "gpt-4o");
        assert_eq!(config.api_key("anthropic"), Some("sk-ant-file"));
        assert_eq!(config.memory.backend, "in_memory");
        assert_eq!(config.memory.transcript_limit, 20);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "chat_model = [").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides_models_and_fills_missing_keys() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "openai".into(),
            ProviderConfig {
                api_key: Some("sk-file".into()),
                api_url: None,
            },
        );

        config.apply_env_with(|key| match key {
            "KINDRED_SUMMARY_MODEL" => Some("deepseek-chat".into()),
            "OPENAI_API_KEY" => Some("sk-env".into()),
            "GEMINI_API_KEY" => Some("gm-env".into()),
            _ => None,
        });

        assert_eq!(config.summary_model, "deepseek-chat");
        assert_eq!(config.chat_model, "gpt-4o");
        assert_eq!(config.api_key("openai"), Some("sk-file"));
        assert_eq!(config.api_key("gemini"), Some("gm-env"));
        assert_eq!(config.api_key("anthropic"), None);
    }

    #[test]
    fn debug_redacts_keys() {
        let mut config = AppConfig::default();
        config.providers.insert(
            "anthropic".into(),
            ProviderConfig {
                api_key: Some("sk-ant-secret".into()),
                api_url: None,
            },
        );
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-ant-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gpt-4o"));
        assert!(toml_str.contains("transcript_limit"));
    }
}
