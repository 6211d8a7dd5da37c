//! In-memory backend — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kindred_core::context::UserContext;
use kindred_core::error::MemoryError;
use kindred_core::message::Message;
use kindred_core::store::{ContextStore, LogStatus, MessageSource, SummarizationLogEntry};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Contexts, log entries, and messages held in process memory.
#[derive(Default)]
pub struct InMemoryStore {
    contexts: RwLock<HashMap<String, serde_json::Value>>,
    logs: RwLock<Vec<SummarizationLogEntry>>,
    messages: RwLock<HashMap<String, Vec<Message>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw context value as-is (e.g. a legacy shape).
    pub async fn put_raw_context(&self, user_id: &str, value: serde_json::Value) {
        self.contexts.write().await.insert(user_id.to_string(), value);
    }

    /// Append a message to the user's conversational log.
    pub async fn append_message(&self, user_id: &str, message: Message) {
        self.messages
            .write()
            .await
            .entry(user_id.to_string())
            .or_default()
            .push(message);
    }

    /// Number of stored messages for a user.
    pub async fn message_count(&self, user_id: &str) -> usize {
        self.messages
            .read()
            .await
            .get(user_id)
            .map_or(0, Vec::len)
    }
}

#[async_trait]
impl ContextStore for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn fetch_context(&self, user_id: &str) -> Result<Option<serde_json::Value>, MemoryError> {
        Ok(self.contexts.read().await.get(user_id).cloned())
    }

    async fn upsert_context(&self, user_id: &str, context: &UserContext) -> Result<(), MemoryError> {
        let value = serde_json::to_value(context)
            .map_err(|e| MemoryError::Serialization(e.to_string()))?;
        self.contexts.write().await.insert(user_id.to_string(), value);
        Ok(())
    }

    async fn insert_log(&self, entry: &SummarizationLogEntry) -> Result<(), MemoryError> {
        self.logs.write().await.push(entry.clone());
        Ok(())
    }

    async fn finalize_log(
        &self,
        id: &str,
        status: LogStatus,
        details: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, MemoryError> {
        let mut logs = self.logs.write().await;
        match logs
            .iter_mut()
            .find(|e| e.id == id && e.status == LogStatus::Started)
        {
            Some(entry) => {
                entry.status = status;
                entry.details = details.map(String::from);
                entry.updated_at = at;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn recent_logs(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<SummarizationLogEntry>, MemoryError> {
        let logs = self.logs.read().await;
        Ok(logs
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MessageSource for InMemoryStore {
    async fn recent_messages(&self, user_id: &str, limit: usize) -> Result<Vec<Message>, MemoryError> {
        let messages = self.messages.read().await;
        let Some(all) = messages.get(user_id) else {
            return Ok(Vec::new());
        };
        let mut sorted = all.clone();
        sorted.sort_by_key(|m| m.created_at);
        let skip = sorted.len().saturating_sub(limit);
        Ok(sorted.split_off(skip))
    }
}
