//! Storage traits — persistence for user contexts, summarization logs, and
//! the conversational message log.
//!
//! Backends implement these raw primitives; the memory crate layers the
//! default-fill, migration, and log lifecycle rules on top.
//!
//! Implementations: SQLite, in-memory (for testing).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::UserContext;
use crate::error::MemoryError;
use crate::message::Message;

/// Lifecycle state of one memory pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Started,
    Completed,
    Failed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Started => "started",
            LogStatus::Completed => "completed",
            LogStatus::Failed => "failed",
        }
    }

    /// Completed and failed entries are never revisited.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LogStatus::Started)
    }
}

impl std::fmt::Display for LogStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogStatus {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "started" => Ok(LogStatus::Started),
            "completed" => Ok(LogStatus::Completed),
            "failed" => Ok(LogStatus::Failed),
            other => Err(MemoryError::QueryFailed(format!("unknown log status: {other}"))),
        }
    }
}

/// One record per memory pipeline invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizationLogEntry {
    pub id: String,
    pub user_id: String,
    pub status: LogStatus,
    /// Free-form reason code (e.g. "manual", "message_count")
    pub trigger: String,
    /// Failure message or skip reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SummarizationLogEntry {
    /// A fresh entry in the `started` state.
    pub fn started(user_id: impl Into<String>, trigger: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            status: LogStatus::Started,
            trigger: trigger.into(),
            details: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Persistence for `UserContext` rows and summarization log entries.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// The raw stored context, in whatever shape it was written.
    async fn fetch_context(&self, user_id: &str) -> Result<Option<serde_json::Value>, MemoryError>;

    /// Insert or replace the user's context.
    async fn upsert_context(&self, user_id: &str, context: &UserContext) -> Result<(), MemoryError>;

    /// Record a new log entry.
    async fn insert_log(&self, entry: &SummarizationLogEntry) -> Result<(), MemoryError>;

    /// Move a `started` entry to a terminal status.
    ///
    /// Returns `false` when no `started` entry with that id exists; terminal
    /// entries are left untouched.
    async fn finalize_log(
        &self,
        id: &str,
        status: LogStatus,
        details: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, MemoryError>;

    /// Most recent log entries for a user, newest first.
    async fn recent_logs(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<SummarizationLogEntry>, MemoryError>;
}

/// Read access to the conversational message log.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// The last `limit` messages for a user, in ascending chronological order.
    async fn recent_messages(&self, user_id: &str, limit: usize) -> Result<Vec<Message>, MemoryError>;
}
