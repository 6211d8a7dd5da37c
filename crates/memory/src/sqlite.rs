//! SQLite backend for user contexts, summarization logs, and messages.
//!
//! Uses a single SQLite database file with three tables:
//! - `user_contexts` — one JSON document per user
//! - `summarization_logs` — one row per pipeline run
//! - `messages` — the conversational log the transcript is built from

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kindred_core::context::UserContext;
use kindred_core::error::MemoryError;
use kindred_core::message::{Message, Role};
use kindred_core::store::{ContextStore, LogStatus, MessageSource, SummarizationLogEntry};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// A SQLite-backed context store and message source.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    ///
    /// Pass `":memory:"` for an in-process ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, MemoryError> {
        let in_memory = path.contains(":memory:");
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| MemoryError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // An in-memory database lives and dies with its connection.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(4)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite context store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, MemoryError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_contexts (
                user_id     TEXT PRIMARY KEY,
                context     TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("user_contexts table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS summarization_logs (
                id          TEXT PRIMARY KEY,
                user_id     TEXT NOT NULL,
                status      TEXT NOT NULL,
                trigger     TEXT NOT NULL,
                details     TEXT,
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("summarization_logs table: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                iid         INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     TEXT NOT NULL,
                role        TEXT NOT NULL,
                content     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("messages table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_logs_user_created ON summarization_logs(user_id, created_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("logs index: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_user_created ON messages(user_id, created_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("messages index: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Append a message to the user's conversational log.
    pub async fn append_message(&self, user_id: &str, message: &Message) -> Result<(), MemoryError> {
        sqlx::query(
            "INSERT INTO messages (user_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(user_id)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("INSERT message failed: {e}")))?;
        Ok(())
    }

    /// Number of stored messages for a user.
    pub async fn message_count(&self, user_id: &str) -> Result<u64, MemoryError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM messages WHERE user_id = ?1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("COUNT messages: {e}")))?;
        let n: i64 = row
            .try_get("n")
            .map_err(|e| MemoryError::QueryFailed(format!("count column: {e}")))?;
        Ok(n.max(0) as u64)
    }

    fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>, MemoryError> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| MemoryError::QueryFailed(format!("{column} column: {e}")))
    }

    fn row_to_log(row: &sqlx::sqlite::SqliteRow) -> Result<SummarizationLogEntry, MemoryError> {
        let get = |column: &str| -> Result<String, MemoryError> {
            row.try_get(column)
                .map_err(|e| MemoryError::QueryFailed(format!("{column} column: {e}")))
        };
        let details: Option<String> = row
            .try_get("details")
            .map_err(|e| MemoryError::QueryFailed(format!("details column: {e}")))?;

        Ok(SummarizationLogEntry {
            id: get("id")?,
            user_id: get("user_id")?,
            status: get("status")?.parse()?,
            trigger: get("trigger")?,
            details,
            created_at: Self::parse_timestamp(&get("created_at")?, "created_at")?,
            updated_at: Self::parse_timestamp(&get("updated_at")?, "updated_at")?,
        })
    }

    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message, MemoryError> {
        let get = |column: &str| -> Result<String, MemoryError> {
            row.try_get(column)
                .map_err(|e| MemoryError::QueryFailed(format!("{column} column: {e}")))
        };
        let role = Role::from_str(&get("role")?).map_err(MemoryError::QueryFailed)?;
        Ok(Message {
            role,
            content: get("content")?,
            created_at: Self::parse_timestamp(&get("created_at")?, "created_at")?,
        })
    }
}

#[async_trait]
impl ContextStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn fetch_context(&self, user_id: &str) -> Result<Option<serde_json::Value>, MemoryError> {
        let row = sqlx::query("SELECT context FROM user_contexts WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("SELECT context: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };
        let raw: String = row
            .try_get("context")
            .map_err(|e| MemoryError::QueryFailed(format!("context column: {e}")))?;
        let value = serde_json::from_str(&raw)
            .map_err(|e| MemoryError::Serialization(format!("stored context: {e}")))?;
        Ok(Some(value))
    }

    async fn upsert_context(&self, user_id: &str, context: &UserContext) -> Result<(), MemoryError> {
        let json = serde_json::to_string(context)
            .map_err(|e| MemoryError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO user_contexts (user_id, context, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id) DO UPDATE SET
                context = excluded.context,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(&json)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("UPSERT context failed: {e}")))?;

        debug!(user_id, "Stored user context");
        Ok(())
    }

    async fn insert_log(&self, entry: &SummarizationLogEntry) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            INSERT INTO summarization_logs (id, user_id, status, trigger, details, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.user_id)
        .bind(entry.status.as_str())
        .bind(&entry.trigger)
        .bind(&entry.details)
        .bind(entry.created_at.to_rfc3339())
        .bind(entry.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("INSERT log failed: {e}")))?;
        Ok(())
    }

    async fn finalize_log(
        &self,
        id: &str,
        status: LogStatus,
        details: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool, MemoryError> {
        let result = sqlx::query(
            r#"
            UPDATE summarization_logs
            SET status = ?2, details = ?3, updated_at = ?4
            WHERE id = ?1 AND status = 'started'
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(details)
        .bind(at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::Storage(format!("UPDATE log failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn recent_logs(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<SummarizationLogEntry>, MemoryError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM summarization_logs
            WHERE user_id = ?1
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?2
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("SELECT logs: {e}")))?;

        rows.iter().map(Self::row_to_log).collect()
    }
}

#[async_trait]
impl MessageSource for SqliteStore {
    async fn recent_messages(&self, user_id: &str, limit: usize) -> Result<Vec<Message>, MemoryError> {
        let rows = sqlx::query(
            r#"
            SELECT role, content, created_at FROM messages
            WHERE user_id = ?1
            ORDER BY created_at DESC, iid DESC
            LIMIT ?2
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("SELECT messages: {e}")))?;

        let mut messages = rows
            .iter()
            .map(Self::row_to_message)
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }
}
