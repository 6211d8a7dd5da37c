//! The memory update pipeline.
//!
//! One run for one user: open a log entry, load the context, build a
//! transcript from recent messages, run pattern analysis then integration,
//! merge, save, and finalize the log entry. Stages run strictly in sequence
//! and nothing is retried here; the dispatch layer already retries model
//! calls.
//!
//! Runs for the same user are serialized inside the process by a per-user
//! async lock. Two processes updating the same user still race, and the
//! last writer wins.
//!
//! Dropping a run's future (a caller timeout, a shutdown) releases the
//! per-user lock but cannot finalize the log entry, which stays `started`.

use chrono::Utc;
use kindred_core::context::UserContext;
use kindred_core::error::PipelineError;
use kindred_core::provider::Summarizer;
use kindred_core::store::{ContextStore, MessageSource};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

use crate::accessor::{ContextAccessor, LogOutcome};
use crate::analysis::{analyze_patterns, build_transcript};
use crate::integration::{IntegrationOutcome, integrate};
use crate::merge;

/// Default number of recent messages fed to pattern analysis.
pub const DEFAULT_TRANSCRIPT_LIMIT: usize = 20;

const SKIPPED_NO_MESSAGES: &str = "skipped: no messages";
const DEGRADED_UNPARSEABLE: &str = "integration output unparseable; only last_update changed";

enum RunOutcome {
    Skipped(UserContext),
    Degraded(UserContext),
    Updated(UserContext),
}

impl RunOutcome {
    fn log_outcome(&self) -> LogOutcome {
        let details = match self {
            RunOutcome::Skipped(_) => Some(SKIPPED_NO_MESSAGES.to_string()),
            RunOutcome::Degraded(_) => Some(DEGRADED_UNPARSEABLE.to_string()),
            RunOutcome::Updated(_) => None,
        };
        LogOutcome::Completed { details }
    }

    fn into_context(self) -> UserContext {
        match self {
            RunOutcome::Skipped(c) | RunOutcome::Degraded(c) | RunOutcome::Updated(c) => c,
        }
    }
}

type LockRegistry = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// One run's share of a per-user lock. Dropping it removes the registry
/// entry once no other run holds or awaits the lock, on every exit path
/// including cancellation.
struct LockLease<'a> {
    registry: &'a LockRegistry,
    user_id: &'a str,
    lock: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> LockLease<'a> {
    fn acquire(registry: &'a LockRegistry, user_id: &'a str) -> Self {
        let lock = {
            let mut locks = registry.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(user_id.to_string()).or_default().clone()
        };
        Self {
            registry,
            user_id,
            lock,
        }
    }
}

impl Drop for LockLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one here.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(self.user_id);
        }
    }
}

/// Runs memory updates against a store, a message source and a summarizer.
pub struct MemoryPipeline {
    accessor: ContextAccessor,
    messages: Arc<dyn MessageSource>,
    summarizer: Arc<dyn Summarizer>,
    model: Option<String>,
    transcript_limit: usize,
    locks: LockRegistry,
}

impl MemoryPipeline {
    pub fn new(
        store: Arc<dyn ContextStore>,
        messages: Arc<dyn MessageSource>,
        summarizer: Arc<dyn Summarizer>,
    ) -> Self {
        Self {
            accessor: ContextAccessor::new(store),
            messages,
            summarizer,
            model: None,
            transcript_limit: DEFAULT_TRANSCRIPT_LIMIT,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Use this model for both stages instead of the summarizer's default.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_transcript_limit(mut self, limit: usize) -> Self {
        self.transcript_limit = limit.max(1);
        self
    }

    pub fn accessor(&self) -> &ContextAccessor {
        &self.accessor
    }

    /// The message-count heuristic: fire on every `every_n`-th message.
    /// `every_n == 0` disables it.
    pub fn should_trigger(message_count: u64, every_n: u64) -> bool {
        every_n > 0 && message_count > 0 && message_count % every_n == 0
    }

    /// Run one memory update for `user_id`.
    ///
    /// Returns the context as persisted (or as loaded, when the run was
    /// skipped). Every run that completes leaves exactly one log entry in a
    /// terminal state, unless the entry itself could not be opened. A run
    /// whose future is dropped midway leaves its entry `started`.
    pub async fn run_memory_update(
        &self,
        user_id: &str,
        trigger: &str,
    ) -> Result<UserContext, PipelineError> {
        let lease = LockLease::acquire(&self.locks, user_id);
        let _guard = lease.lock.lock().await;
        self.run_locked(user_id, trigger).await
    }

    async fn run_locked(&self, user_id: &str, trigger: &str) -> Result<UserContext, PipelineError> {
        info!(user_id, trigger, "Memory update started");
        let handle = self
            .accessor
            .append_log(user_id, trigger)
            .await
            .map_err(PipelineError::Log)?;

        let result = self.run_stages(user_id).await;

        let outcome = match &result {
            Ok(run) => run.log_outcome(),
            Err(e) => LogOutcome::Failed {
                details: e.to_string(),
            },
        };
        if let Err(e) = self.accessor.finalize_log(handle, outcome).await {
            warn!(user_id, error = %e, "Failed to finalize summarization log");
        }

        match result {
            Ok(run) => {
                info!(user_id, trigger, "Memory update completed");
                Ok(run.into_context())
            }
            Err(e) => {
                error!(user_id, trigger, error = %e, "Memory update failed");
                Err(e)
            }
        }
    }

    async fn run_stages(&self, user_id: &str) -> Result<RunOutcome, PipelineError> {
        let current = self
            .accessor
            .load(user_id)
            .await
            .map_err(PipelineError::Load)?;

        let messages = self
            .messages
            .recent_messages(user_id, self.transcript_limit)
            .await
            .map_err(PipelineError::MessageFetch)?;
        if messages.is_empty() {
            debug!(user_id, "No messages to analyze");
            return Ok(RunOutcome::Skipped(current));
        }
        let transcript = build_transcript(&messages);

        let model = self.model.as_deref();
        let analysis = analyze_patterns(self.summarizer.as_ref(), &transcript, model)
            .await
            .map_err(PipelineError::Analysis)?;
        let outcome = integrate(self.summarizer.as_ref(), &analysis, &current, model)
            .await
            .map_err(PipelineError::Integration)?;

        let now = Utc::now();
        let run = match outcome {
            IntegrationOutcome::Extracted(extraction) => {
                RunOutcome::Updated(merge::merge_at(&current, &extraction, now))
            }
            IntegrationOutcome::Unparseable => {
                warn!(user_id, "Integration output unparseable; keeping existing context");
                RunOutcome::Degraded(merge::touch(&current, now))
            }
        };

        let updated = match &run {
            RunOutcome::Updated(c) | RunOutcome::Degraded(c) | RunOutcome::Skipped(c) => c,
        };
        self.accessor
            .save(user_id, updated)
            .await
            .map_err(PipelineError::Persistence)?;
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryStore;
    use async_trait::async_trait;
    use chrono::DateTime;
    use kindred_core::error::{MemoryError, ProviderError};
    use kindred_core::message::Message;
    use kindred_core::store::{LogStatus, SummarizationLogEntry};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Replies by stage: free text for analysis, JSON for integration.
    struct ScriptedSummarizer {
        analysis: Result<String, ProviderError>,
        integration: Result<String, ProviderError>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delay: Option<Duration>,
    }

    impl ScriptedSummarizer {
        fn new(analysis: &str, integration: &str) -> Self {
            Self {
                analysis: Ok(analysis.to_string()),
                integration: Ok(integration.to_string()),
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl Summarizer for ScriptedSummarizer {
        async fn summarize(
            &self,
            _prompt: &str,
            expect_json: bool,
            _model_override: Option<&str>,
        ) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if expect_json {
                self.integration.clone()
            } else {
                self.analysis.clone()
            }
        }
    }

    /// Delegates to an in-memory store but refuses to save contexts.
    struct ReadOnlyStore(InMemoryStore);

    #[async_trait]
    impl ContextStore for ReadOnlyStore {
        fn name(&self) -> &str {
            "read_only"
        }
        async fn fetch_context(&self, user_id: &str) -> Result<Option<serde_json::Value>, MemoryError> {
            self.0.fetch_context(user_id).await
        }
        async fn upsert_context(&self, _: &str, _: &UserContext) -> Result<(), MemoryError> {
            Err(MemoryError::Storage("database is read-only".into()))
        }
        async fn insert_log(&self, entry: &SummarizationLogEntry) -> Result<(), MemoryError> {
            self.0.insert_log(entry).await
        }
        async fn finalize_log(
            &self,
            id: &str,
            status: LogStatus,
            details: Option<&str>,
            at: DateTime<Utc>,
        ) -> Result<bool, MemoryError> {
            self.0.finalize_log(id, status, details, at).await
        }
        async fn recent_logs(
            &self,
            user_id: &str,
            limit: usize,
        ) -> Result<Vec<SummarizationLogEntry>, MemoryError> {
            self.0.recent_logs(user_id, limit).await
        }
    }

    const EXTRACTION_JSON: &str = r#"{
        "core_understanding": {"personality": "curious and direct"},
        "evolving_insights": {"consistent_patterns": ["asks follow-up questions"]}
    }"#;

    async fn store_with_messages(n: usize) -> Arc<InMemoryStore> {
        let store = Arc::new(InMemoryStore::new());
        for i in 0..n {
            let msg = if i % 2 == 0 {
                Message::user(format!("question {i}"))
            } else {
                Message::assistant(format!("answer {i}"))
            };
            store.append_message("u1", msg).await;
        }
        store
    }

    fn pipeline(store: Arc<InMemoryStore>, summarizer: Arc<ScriptedSummarizer>) -> MemoryPipeline {
        MemoryPipeline::new(store.clone(), store, summarizer)
    }

    #[test]
    fn message_count_trigger() {
        assert!(MemoryPipeline::should_trigger(10, 10));
        assert!(MemoryPipeline::should_trigger(20, 10));
        assert!(!MemoryPipeline::should_trigger(15, 10));
        assert!(!MemoryPipeline::should_trigger(0, 10));
        assert!(!MemoryPipeline::should_trigger(10, 0));
    }

    #[tokio::test]
    async fn manual_update_for_new_user() {
        let store = store_with_messages(5).await;
        let summarizer = Arc::new(ScriptedSummarizer::new(
            "The user follows every answer with another question.",
            EXTRACTION_JSON,
        ));
        let pipeline = pipeline(store.clone(), summarizer.clone());

        let ctx = pipeline.run_memory_update("u1", "manual").await.unwrap();
        assert_eq!(ctx.core_understanding.personality, "curious and direct");
        assert_eq!(
            ctx.evolving_insights.consistent_patterns,
            vec!["asks follow-up questions"]
        );
        assert!(ctx.last_update.is_some());
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 2);

        let persisted = pipeline.accessor().load("u1").await.unwrap();
        assert_eq!(persisted, ctx);

        let logs = pipeline.accessor().recent_logs("u1", 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Completed);
        assert_eq!(logs[0].trigger, "manual");
    }

    #[tokio::test]
    async fn no_messages_skips_without_model_calls() {
        let store = Arc::new(InMemoryStore::new());
        let summarizer = Arc::new(ScriptedSummarizer::new("unused", "{}"));
        let pipeline = pipeline(store, summarizer.clone());

        let ctx = pipeline.run_memory_update("u1", "manual").await.unwrap();
        assert_eq!(ctx, UserContext::default());
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);

        let logs = pipeline.accessor().recent_logs("u1", 10).await.unwrap();
        assert_eq!(logs[0].status, LogStatus::Completed);
        assert_eq!(logs[0].details.as_deref(), Some(SKIPPED_NO_MESSAGES));
    }

    #[tokio::test]
    async fn unparseable_integration_only_moves_last_update() {
        let store = store_with_messages(3).await;
        let mut before = UserContext::default();
        before.core_understanding.personality = "reserved".into();
        before.evolving_insights.recent_observations = vec!["seemed tired".into()];
        before.evolving_insights.changing_patterns = vec!["warming up".into()];
        pipeline(store.clone(), Arc::new(ScriptedSummarizer::new("", "")))
            .accessor()
            .save("u1", &before)
            .await
            .unwrap();

        let summarizer = Arc::new(ScriptedSummarizer::new("some analysis", "not json at all"));
        let pipeline = pipeline(store, summarizer);
        let after = pipeline.run_memory_update("u1", "manual").await.unwrap();

        assert!(after.last_update.is_some());
        assert_eq!(UserContext { last_update: None, ..after }, before);

        let logs = pipeline.accessor().recent_logs("u1", 1).await.unwrap();
        assert_eq!(logs[0].status, LogStatus::Completed);
    }

    #[tokio::test]
    async fn provider_failure_marks_log_failed() {
        let store = store_with_messages(2).await;
        let mut summarizer = ScriptedSummarizer::new("", "{}");
        summarizer.analysis = Err(ProviderError::ApiError {
            status_code: 503,
            message: "overloaded".into(),
        });
        let pipeline = pipeline(store, Arc::new(summarizer));

        let err = pipeline.run_memory_update("u1", "manual").await.unwrap_err();
        assert!(matches!(err, PipelineError::Analysis(_)));

        let logs = pipeline.accessor().recent_logs("u1", 1).await.unwrap();
        assert_eq!(logs[0].status, LogStatus::Failed);
        assert_eq!(logs[0].details.as_deref(), Some(err.to_string().as_str()));
        assert!(logs[0].details.as_deref().unwrap().contains("overloaded"));
    }

    #[tokio::test]
    async fn persistence_failure_marks_log_failed() {
        let store = Arc::new(ReadOnlyStore(InMemoryStore::new()));
        let summarizer = Arc::new(ScriptedSummarizer::new("analysis", EXTRACTION_JSON));
        let messages: Arc<dyn MessageSource> = Arc::new({
            let source = InMemoryStore::new();
            source.append_message("u1", Message::user("hello")).await;
            source
        });
        let pipeline = MemoryPipeline::new(store.clone(), messages, summarizer);

        let err = pipeline.run_memory_update("u1", "manual").await.unwrap_err();
        assert!(matches!(err, PipelineError::Persistence(_)));

        let logs = store.recent_logs("u1", 1).await.unwrap();
        assert_eq!(logs[0].status, LogStatus::Failed);
        assert!(logs[0].details.as_deref().unwrap().contains("read-only"));
    }

    #[tokio::test(start_paused = true)]
    async fn same_user_runs_are_serialized() {
        let store = store_with_messages(4).await;
        let mut summarizer = ScriptedSummarizer::new("analysis", EXTRACTION_JSON);
        summarizer.delay = Some(Duration::from_millis(50));
        let summarizer = Arc::new(summarizer);
        let pipeline = pipeline(store, summarizer.clone());

        let (a, b) = tokio::join!(
            pipeline.run_memory_update("u1", "manual"),
            pipeline.run_memory_update("u1", "message_count"),
        );
        a.unwrap();
        b.unwrap();

        assert_eq!(summarizer.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 4);
        let logs = pipeline.accessor().recent_logs("u1", 10).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs.iter().all(|l| l.status == LogStatus::Completed));
        assert!(pipeline.locks.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_run_releases_user_lock() {
        let store = store_with_messages(2).await;
        let mut summarizer = ScriptedSummarizer::new("analysis", EXTRACTION_JSON);
        summarizer.delay = Some(Duration::from_secs(60));
        let pipeline = pipeline(store, Arc::new(summarizer));

        let cancelled = tokio::time::timeout(
            Duration::from_secs(1),
            pipeline.run_memory_update("u1", "manual"),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(pipeline.locks.lock().unwrap().is_empty());

        let logs = pipeline.accessor().recent_logs("u1", 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Started);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_waiter_keeps_lock_for_holder() {
        let store = store_with_messages(2).await;
        let mut summarizer = ScriptedSummarizer::new("analysis", EXTRACTION_JSON);
        summarizer.delay = Some(Duration::from_millis(50));
        let pipeline = pipeline(store, Arc::new(summarizer));

        let (holder, waiter) = tokio::join!(
            pipeline.run_memory_update("u1", "manual"),
            tokio::time::timeout(Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_millis(1)).await;
                pipeline.run_memory_update("u1", "message_count").await
            }),
        );
        holder.unwrap();
        assert!(waiter.is_err());
        assert!(pipeline.locks.lock().unwrap().is_empty());

        // The waiter never got the lock, so only the holder logged a run.
        let logs = pipeline.accessor().recent_logs("u1", 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, LogStatus::Completed);
    }
}
