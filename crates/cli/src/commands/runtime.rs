//! Wiring shared by the commands: config, dispatch router, stores, pipeline.

use std::sync::Arc;

use kindred_config::AppConfig;
use kindred_core::error::MemoryError;
use kindred_core::message::Message;
use kindred_core::store::{ContextStore, MessageSource};
use kindred_memory::{InMemoryStore, MemoryPipeline, SqliteStore};
use kindred_providers::{DispatchRouter, build_from_config};
use tracing::debug;

/// The configured memory backend.
pub enum Stores {
    Sqlite(Arc<SqliteStore>),
    InMemory(Arc<InMemoryStore>),
}

impl Stores {
    pub async fn open(config: &AppConfig) -> Result<Self, MemoryError> {
        match config.memory.backend.as_str() {
            "in_memory" => Ok(Stores::InMemory(Arc::new(InMemoryStore::new()))),
            _ => {
                let path = &config.memory.database_path;
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        MemoryError::Storage(format!("create {}: {e}", parent.display()))
                    })?;
                }
                let store = SqliteStore::new(&path.to_string_lossy()).await?;
                Ok(Stores::Sqlite(Arc::new(store)))
            }
        }
    }

    pub fn context_store(&self) -> Arc<dyn ContextStore> {
        match self {
            Stores::Sqlite(s) => s.clone(),
            Stores::InMemory(s) => s.clone(),
        }
    }

    pub fn message_source(&self) -> Arc<dyn MessageSource> {
        match self {
            Stores::Sqlite(s) => s.clone(),
            Stores::InMemory(s) => s.clone(),
        }
    }

    /// Record a message and return the user's new message count.
    pub async fn record(&self, user_id: &str, message: &Message) -> Result<u64, MemoryError> {
        match self {
            Stores::Sqlite(s) => {
                s.append_message(user_id, message).await?;
                s.message_count(user_id).await
            }
            Stores::InMemory(s) => {
                s.append_message(user_id, message.clone()).await;
                Ok(s.message_count(user_id).await as u64)
            }
        }
    }
}

/// Everything a command needs.
pub struct Runtime {
    pub config: AppConfig,
    pub router: Arc<DispatchRouter>,
    pub stores: Stores,
}

impl Runtime {
    pub async fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
        let router = Arc::new(build_from_config(&config));
        debug!(vendors = ?router.vendors(), "Dispatch router ready");
        let stores = Stores::open(&config).await?;
        Ok(Self {
            config,
            router,
            stores,
        })
    }

    pub fn pipeline(&self) -> MemoryPipeline {
        MemoryPipeline::new(
            self.stores.context_store(),
            self.stores.message_source(),
            self.router.clone(),
        )
        .with_model(self.config.summary_model.clone())
        .with_transcript_limit(self.config.memory.transcript_limit)
    }
}
