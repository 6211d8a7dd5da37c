//! Context store accessor — the only way the pipeline touches persistence.
//!
//! `load` never hands out a partially-shaped context: missing rows become
//! the all-empty default, partial rows are backfilled, legacy rows are
//! migrated. Log entries move from `started` to a terminal state exactly
//! once, since `finalize_log` consumes the handle.

use chrono::Utc;
use kindred_core::context::UserContext;
use kindred_core::error::MemoryError;
use kindred_core::store::{ContextStore, LogStatus, SummarizationLogEntry};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::merge::from_stored;

/// Proof that a `started` log entry exists and has not been finalized.
#[derive(Debug)]
#[must_use = "a started log entry must be finalized"]
pub struct LogHandle {
    id: String,
    user_id: String,
}

impl LogHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

/// How a pipeline run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutcome {
    Completed { details: Option<String> },
    Failed { details: String },
}

impl LogOutcome {
    fn status(&self) -> LogStatus {
        match self {
            LogOutcome::Completed { .. } => LogStatus::Completed,
            LogOutcome::Failed { .. } => LogStatus::Failed,
        }
    }

    fn details(&self) -> Option<&str> {
        match self {
            LogOutcome::Completed { details } => details.as_deref(),
            LogOutcome::Failed { details } => Some(details),
        }
    }
}

/// Typed access to user contexts and summarization logs.
#[derive(Clone)]
pub struct ContextAccessor {
    store: Arc<dyn ContextStore>,
}

impl ContextAccessor {
    pub fn new(store: Arc<dyn ContextStore>) -> Self {
        Self { store }
    }

    /// The user's context, default-filled and migrated.
    pub async fn load(&self, user_id: &str) -> Result<UserContext, MemoryError> {
        match self.store.fetch_context(user_id).await? {
            Some(value) => Ok(from_stored(value)),
            None => {
                debug!(user_id, "No stored context, using defaults");
                Ok(UserContext::default())
            }
        }
    }

    /// Upsert the user's context.
    pub async fn save(&self, user_id: &str, context: &UserContext) -> Result<(), MemoryError> {
        self.store.upsert_context(user_id, context).await
    }

    /// Open a `started` log entry for one pipeline run.
    pub async fn append_log(&self, user_id: &str, trigger: &str) -> Result<LogHandle, MemoryError> {
        let entry = SummarizationLogEntry::started(user_id, trigger);
        self.store.insert_log(&entry).await?;
        Ok(LogHandle {
            id: entry.id,
            user_id: entry.user_id,
        })
    }

    /// Close the entry with its terminal status.
    pub async fn finalize_log(&self, handle: LogHandle, outcome: LogOutcome) -> Result<(), MemoryError> {
        let updated = self
            .store
            .finalize_log(&handle.id, outcome.status(), outcome.details(), Utc::now())
            .await?;
        if !updated {
            warn!(
                log_id = %handle.id,
                user_id = %handle.user_id,
                "Log entry was not in started state; left unchanged"
            );
        }
        Ok(())
    }

    /// Most recent log entries for a user, newest first.
    pub async fn recent_logs(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<SummarizationLogEntry>, MemoryError> {
        self.store.recent_logs(user_id, limit).await
    }
}
