//! Mneme — session-scoped conversational memory with semantic retrieval.
//!
//! Persists turn-by-turn dialogue under a caller-supplied session key and
//! reconstructs relevant context for a new turn by merging a recency window
//! of raw turns with similarity-ranked snippets from a retrieval backend.
//!
//! # Architecture
//!
//! ```text
//! save(key, inputs, outputs) ──► SessionStore (SQLite append log)
//!                                     │
//!                                     └─► RetrievalBackend::index (best-effort)
//!
//! load(key, query) ──► SessionStore::list_recent ──┐
//!                      RetrievalBackend::query ────┴─► merge ──► ContextPayload
//!
//! clear(key) ──► SessionStore::clear ──► RetrievalBackend::delete (best-effort)
//! ```
//!
//! # Degradation policy
//!
//! Local durability always wins. A failed remote index after a successful
//! append is logged, never raised; a failed semantic query degrades to a
//! recent-turns-only payload marked `partial`, and only escalates to
//! [`Error::RetrievalUnavailable`] when there are no recent turns to fall
//! back on.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod config;
pub mod error;
pub mod merge;
pub mod remote;
pub mod store;
pub mod types;

pub use backend::{IndexAck, InMemoryBackend, RetrievalBackend, ScoredSnippet};
pub use config::{make_key, KeyStrategy, MemoryConfig};
pub use error::{Error, Result};
pub use remote::{HttpBackend, HttpBackendConfig};
pub use store::{SessionHandle, SessionStore};
pub use types::{ContextPayload, ExchangeFields, Provenance, Snippet, Turn};

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Query text used when the caller's query is empty or whitespace-only.
const DEFAULT_QUERY: &str = "conversation";

/// Pause between retried backend calls.
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// Per-load overrides for retrieval breadth and recency window.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Override `config.top_k` for this load
    pub top_k: Option<usize>,
    /// Override `config.recent_n` for this load
    pub recent_n: Option<usize>,
}

/// The save/load/clear contract driven by the orchestration framework.
///
/// Owns nothing ambient: the store and backend are handed in by the
/// composition root. The store is the only holder of mutable session state;
/// this facade mutates it solely through `append`/`clear`.
pub struct ContextMemory {
    store: SessionStore,
    backend: Arc<dyn RetrievalBackend>,
    config: MemoryConfig,
}

impl ContextMemory {
    /// Assemble the memory component from its collaborators.
    pub fn new(
        store: SessionStore,
        backend: Arc<dyn RetrievalBackend>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            store,
            backend,
            config,
        }
    }

    /// The underlying session store.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// The active configuration.
    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Record one exchange: append locally, then index remotely.
    ///
    /// Only the designated `input` / `output` fields participate in memory
    /// content; both `extra` bags are forwarded to the backend as indexing
    /// metadata. The local append must succeed; a remote indexing failure
    /// (after bounded retries) is logged and the turn is still returned.
    pub async fn save(
        &self,
        key: &str,
        inputs: &ExchangeFields,
        outputs: &ExchangeFields,
    ) -> Result<Turn> {
        let input_text = inputs.input.as_deref().unwrap_or("");
        let output_text = outputs.output.as_deref();
        let turn = self.store.append(key, input_text, output_text).await?;

        let mut metadata: HashMap<String, serde_json::Value> = HashMap::new();
        metadata.extend(inputs.extra.clone());
        metadata.extend(outputs.extra.clone());
        metadata.insert("turn_id".into(), serde_json::json!(turn.id));
        metadata.insert("seq".into(), serde_json::json!(turn.seq));

        let backend = Arc::clone(&self.backend);
        let session_key = key.to_string();
        let text = turn.rendered();
        let indexed = self
            .call_backend("index", || {
                let backend = Arc::clone(&backend);
                let session_key = session_key.clone();
                let text = text.clone();
                let metadata = metadata.clone();
                async move { backend.index(&session_key, &text, &metadata).await }
            })
            .await;

        if let Err(e) = indexed {
            warn!(
                session_key = key,
                seq = turn.seq,
                error = %e,
                "Remote indexing failed; turn is persisted locally only"
            );
        }

        Ok(turn)
    }

    /// Assemble context for a new turn using the configured defaults.
    pub async fn load(&self, key: &str, query: &str) -> Result<ContextPayload> {
        self.load_with(key, query, LoadOptions::default()).await
    }

    /// Assemble context for a new turn with per-call overrides.
    ///
    /// Merges the `recent_n` most recent raw turns with the `top_k` snippets
    /// most similar to `query`, deduplicated by turn identity and ordered
    /// score-first. See the crate docs for the degradation policy.
    pub async fn load_with(
        &self,
        key: &str,
        query: &str,
        options: LoadOptions,
    ) -> Result<ContextPayload> {
        let recent_n = options.recent_n.unwrap_or(self.config.recent_n);
        let top_k = options.top_k.unwrap_or(self.config.top_k);

        let recent = self.store.list_recent(key, recent_n).await?;

        let query_text = if query.trim().is_empty() {
            DEFAULT_QUERY
        } else {
            query
        };

        let backend = Arc::clone(&self.backend);
        let session_key = key.to_string();
        let query_owned = query_text.to_string();
        let retrieved = self
            .call_backend("query", || {
                let backend = Arc::clone(&backend);
                let session_key = session_key.clone();
                let query = query_owned.clone();
                async move { backend.query(&session_key, &query, top_k).await }
            })
            .await;

        match retrieved {
            Ok(snippets) => {
                // A cleared or never-used session yields an empty payload even
                // when stale entries survived a failed remote delete.
                if recent.is_empty()
                    && !snippets.is_empty()
                    && self.store.turn_count(key).await? == 0
                {
                    debug!(session_key = key, "Ignoring stale remote entries for empty session");
                    return Ok(ContextPayload::empty(key));
                }
                let merged = merge::assemble(&recent, snippets, self.config.min_score);
                Ok(ContextPayload {
                    session_key: key.to_string(),
                    snippets: merged,
                    partial: false,
                })
            }
            Err(e) if recent.is_empty() => Err(Error::RetrievalUnavailable(e.to_string())),
            Err(e) => {
                warn!(
                    session_key = key,
                    error = %e,
                    "Retrieval backend unavailable; serving recent turns only"
                );
                Ok(ContextPayload {
                    session_key: key.to_string(),
                    snippets: merge::assemble(&recent, Vec::new(), self.config.min_score),
                    partial: true,
                })
            }
        }
    }

    /// Clear a session: delete local turns, best-effort delete remote entries.
    ///
    /// Returns the number of local turns removed. Local state is the source
    /// of truth for "cleared"; a failed remote delete is logged only.
    pub async fn clear(&self, key: &str) -> Result<u64> {
        let deleted = self.store.clear(key).await?;

        let backend = Arc::clone(&self.backend);
        let session_key = key.to_string();
        let remote = self
            .call_backend("delete", || {
                let backend = Arc::clone(&backend);
                let session_key = session_key.clone();
                async move { backend.delete(&session_key).await }
            })
            .await;

        if let Err(e) = remote {
            warn!(
                session_key = key,
                error = %e,
                "Remote delete failed; local state is authoritative"
            );
        }

        Ok(deleted)
    }

    /// Run a backend call with the configured timeout and bounded retries.
    async fn call_backend<T, F, Fut>(&self, op: &'static str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = self.config.remote_timeout();
        let mut last_err = Error::Backend("backend call never attempted".into());

        for attempt in 0..=self.config.remote_retries {
            match tokio::time::timeout(timeout, call()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => last_err = e,
                Err(_) => last_err = Error::Timeout(self.config.remote_timeout_secs),
            }
            if attempt < self.config.remote_retries {
                debug!(op, attempt, error = %last_err, "Retrying backend call");
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
        }

        Err(last_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    /// Backend that fails every call.
    struct FailingBackend;

    #[async_trait::async_trait]
    impl RetrievalBackend for FailingBackend {
        async fn index(
            &self,
            _session_key: &str,
            _text: &str,
            _metadata: &HashMap<String, serde_json::Value>,
        ) -> Result<IndexAck> {
            Err(Error::Backend("unreachable".into()))
        }

        async fn query(
            &self,
            _session_key: &str,
            _text: &str,
            _top_k: usize,
        ) -> Result<Vec<ScoredSnippet>> {
            Err(Error::Backend("unreachable".into()))
        }

        async fn delete(&self, _session_key: &str) -> Result<()> {
            Err(Error::Backend("unreachable".into()))
        }
    }

    /// Backend that records the last query and fails the first N calls.
    #[derive(Default)]
    struct RecordingBackend {
        last_query: Mutex<Option<String>>,
        failures_remaining: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl RetrievalBackend for RecordingBackend {
        async fn index(
            &self,
            _session_key: &str,
            _text: &str,
            _metadata: &HashMap<String, serde_json::Value>,
        ) -> Result<IndexAck> {
            Ok(IndexAck::default())
        }

        async fn query(
            &self,
            _session_key: &str,
            text: &str,
            _top_k: usize,
        ) -> Result<Vec<ScoredSnippet>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_query.lock().await = Some(text.to_string());
            if self
                .failures_remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::Backend("transient".into()));
            }
            Ok(Vec::new())
        }

        async fn delete(&self, _session_key: &str) -> Result<()> {
            Ok(())
        }
    }

    async fn memory_with(backend: Arc<dyn RetrievalBackend>) -> ContextMemory {
        let store = SessionStore::in_memory().await.unwrap();
        ContextMemory::new(store, backend, MemoryConfig::default())
    }

    #[tokio::test]
    async fn test_save_appends_and_indexes() {
        let backend = Arc::new(InMemoryBackend::new());
        let memory = memory_with(backend.clone()).await;

        let turn = memory
            .save("u1", &ExchangeFields::input("hello"), &ExchangeFields::output("hi"))
            .await
            .unwrap();
        assert_eq!(turn.seq, 0);
        assert_eq!(memory.store().turn_count("u1").await.unwrap(), 1);
        assert_eq!(backend.entry_count("u1").await, 1);
    }

    #[tokio::test]
    async fn test_save_survives_indexing_failure() {
        let memory = memory_with(Arc::new(FailingBackend)).await;

        let turn = memory
            .save("u1", &ExchangeFields::input("hello"), &ExchangeFields::output("hi"))
            .await
            .unwrap();
        assert_eq!(turn.seq, 0);
        // The local copy is readable despite the degraded index
        let recent = memory.store().list_recent("u1", 10).await.unwrap();
        assert_eq!(recent.len(), 1);
    }

    #[tokio::test]
    async fn test_save_validation_precedes_remote() {
        let memory = memory_with(Arc::new(FailingBackend)).await;
        let err = memory
            .save("u1", &ExchangeFields::default(), &ExchangeFields::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(matches!(
            memory
                .save("", &ExchangeFields::input("x"), &ExchangeFields::default())
                .await
                .unwrap_err(),
            Error::InvalidSessionKey(_)
        ));
    }

    #[tokio::test]
    async fn test_offline_round_trip_is_partial_recent() {
        let memory = memory_with(Arc::new(FailingBackend)).await;
        memory
            .save("u1", &ExchangeFields::input("hello"), &ExchangeFields::output("hi"))
            .await
            .unwrap();

        let payload = memory.load("u1", "hello").await.unwrap();
        assert!(payload.partial);
        assert_eq!(payload.snippets.len(), 1);
        assert_eq!(payload.snippets[0].provenance, Provenance::Recent);
        assert_eq!(payload.snippets[0].text, "hello\nhi");
    }

    #[tokio::test]
    async fn test_load_empty_session_is_empty_payload() {
        let memory = memory_with(Arc::new(InMemoryBackend::new())).await;
        let payload = memory.load("nobody", "anything").await.unwrap();
        assert!(payload.is_empty());
        assert!(!payload.partial);
    }

    #[tokio::test]
    async fn test_load_empty_session_with_dead_backend_propagates() {
        let memory = memory_with(Arc::new(FailingBackend)).await;
        let err = memory.load("nobody", "anything").await.unwrap_err();
        assert!(matches!(err, Error::RetrievalUnavailable(_)));
    }

    #[tokio::test]
    async fn test_load_dedups_recent_and_retrieved() {
        let backend = Arc::new(InMemoryBackend::new());
        let memory = memory_with(backend).await;
        memory
            .save(
                "u1",
                &ExchangeFields::input("what is 2+2"),
                &ExchangeFields::output("4"),
            )
            .await
            .unwrap();

        // The one turn is both in the recency window and the top search hit
        let payload = memory.load("u1", "what is 2+2").await.unwrap();
        assert_eq!(payload.snippets.len(), 1);
        assert_eq!(payload.snippets[0].provenance, Provenance::RecentRetrieved);
        assert!(payload.snippets[0].score.is_some());
    }

    #[tokio::test]
    async fn test_load_options_override_defaults() {
        let memory = memory_with(Arc::new(FailingBackend)).await;
        for i in 0..5 {
            memory
                .save(
                    "u1",
                    &ExchangeFields::input(format!("q{i}")),
                    &ExchangeFields::output(format!("a{i}")),
                )
                .await
                .unwrap();
        }

        let payload = memory
            .load_with(
                "u1",
                "anything",
                LoadOptions {
                    recent_n: Some(2),
                    top_k: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(payload.snippets.len(), 2);
        // Chronological within the window
        assert_eq!(payload.snippets[0].seq, Some(3));
        assert_eq!(payload.snippets[1].seq, Some(4));
    }

    #[tokio::test]
    async fn test_empty_query_falls_back_to_conversation() {
        let backend = Arc::new(RecordingBackend::default());
        let memory = memory_with(backend.clone()).await;
        memory
            .save("u1", &ExchangeFields::input("hello"), &ExchangeFields::output("hi"))
            .await
            .unwrap();

        memory.load("u1", "   ").await.unwrap();
        assert_eq!(
            backend.last_query.lock().await.as_deref(),
            Some("conversation")
        );
    }

    #[tokio::test]
    async fn test_transient_backend_failure_is_retried() {
        let backend = Arc::new(RecordingBackend {
            failures_remaining: AtomicU32::new(1),
            ..RecordingBackend::default()
        });
        let memory = memory_with(backend.clone()).await;
        memory
            .save("u1", &ExchangeFields::input("hello"), &ExchangeFields::output("hi"))
            .await
            .unwrap();

        let payload = memory.load("u1", "hello").await.unwrap();
        assert!(!payload.partial);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clear_resets_local_and_remote() {
        let backend = Arc::new(InMemoryBackend::new());
        let memory = memory_with(backend.clone()).await;
        memory
            .save("u1", &ExchangeFields::input("hello"), &ExchangeFields::output("hi"))
            .await
            .unwrap();

        assert_eq!(memory.clear("u1").await.unwrap(), 1);
        assert_eq!(backend.entry_count("u1").await, 0);

        let payload = memory.load("u1", "hello").await.unwrap();
        assert!(payload.is_empty());
    }

    #[tokio::test]
    async fn test_clear_succeeds_despite_remote_failure() {
        let memory = memory_with(Arc::new(FailingBackend)).await;
        memory
            .save("u1", &ExchangeFields::input("hello"), &ExchangeFields::output("hi"))
            .await
            .unwrap();

        // Remote delete fails, local clear is still reported
        assert_eq!(memory.clear("u1").await.unwrap(), 1);
        assert_eq!(memory.store().turn_count("u1").await.unwrap(), 0);

        // Clearing an already-empty session is not an error
        assert_eq!(memory.clear("u1").await.unwrap(), 0);
    }
}
