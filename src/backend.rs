//! Retrieval backend contract.
//!
//! The remote embedding/storage service is an opaque collaborator: it indexes
//! text under a session scope, answers similarity queries, and deletes a
//! session's entries. Any concrete client implements [`RetrievalBackend`];
//! [`InMemoryBackend`] is the deterministic in-process implementation used for
//! development and tests.
//!
//! All three operations may fail at any time — the backend being unreachable
//! must never crash the calling application. The facade degrades per the
//! policy in [`crate::ContextMemory`].

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Acknowledgement of a successful index operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexAck {
    /// Backend-assigned document ID, when the backend reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
}

/// One similarity-ranked result from a semantic query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredSnippet {
    /// Snippet text as stored at index time
    pub text: String,
    /// Similarity score, higher is more relevant
    pub score: f32,
}

/// Capability interface for the remote retrieval backend.
///
/// # Failure modes
///
/// Every method returns [`crate::Error::Backend`] (or
/// [`crate::Error::Timeout`] when wrapped by the facade) on network or
/// service failure. Implementations must not panic on unreachable services.
#[async_trait::async_trait]
pub trait RetrievalBackend: Send + Sync {
    /// Index `text` under `session_key` so later queries scoped to that
    /// session can retrieve it. `metadata` is forwarded opaquely.
    async fn index(
        &self,
        session_key: &str,
        text: &str,
        metadata: &HashMap<String, serde_json::Value>,
    ) -> Result<IndexAck>;

    /// Up to `top_k` snippets most similar to `text`, restricted to
    /// `session_key`, ordered by descending score.
    async fn query(
        &self,
        session_key: &str,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredSnippet>>;

    /// Delete every index entry belonging to `session_key`.
    async fn delete(&self, session_key: &str) -> Result<()>;
}

/// In-process backend with deterministic word-overlap scoring.
///
/// Scores a stored text by the fraction of query words it contains, which is
/// crude but stable — identical inputs always rank identically, which is what
/// tests and local development need. Not a substitute for real embeddings.
#[derive(Default)]
pub struct InMemoryBackend {
    entries: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries indexed for a session.
    pub async fn entry_count(&self, session_key: &str) -> usize {
        self.entries
            .read()
            .await
            .get(session_key)
            .map_or(0, Vec::len)
    }

    fn overlap_score(query: &str, text: &str) -> f32 {
        let query_words: Vec<String> = query
            .split_whitespace()
            .map(str::to_lowercase)
            .collect();
        if query_words.is_empty() {
            return 0.0;
        }
        let text_lower = text.to_lowercase();
        let text_words: Vec<&str> = text_lower.split_whitespace().collect();
        let matches = query_words
            .iter()
            .filter(|qw| text_words.contains(&qw.as_str()))
            .count();
        matches as f32 / query_words.len() as f32
    }
}

#[async_trait::async_trait]
impl RetrievalBackend for InMemoryBackend {
    async fn index(
        &self,
        session_key: &str,
        text: &str,
        _metadata: &HashMap<String, serde_json::Value>,
    ) -> Result<IndexAck> {
        let mut entries = self.entries.write().await;
        entries
            .entry(session_key.to_string())
            .or_default()
            .push(text.to_string());
        debug!(session_key, "Indexed text in-memory");
        Ok(IndexAck::default())
    }

    async fn query(
        &self,
        session_key: &str,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredSnippet>> {
        let entries = self.entries.read().await;
        let Some(session_entries) = entries.get(session_key) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<ScoredSnippet> = session_entries
            .iter()
            .map(|stored| ScoredSnippet {
                text: stored.clone(),
                score: Self::overlap_score(text, stored),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete(&self, session_key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(session_key);
        debug!(session_key, "Deleted in-memory index entries");
        Ok(())
    }
}
