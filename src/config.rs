//! Memory configuration and session-key resolution.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default retrieval breadth for semantic queries
const DEFAULT_TOP_K: usize = 8;

/// Default recency window (raw turns merged into every load)
const DEFAULT_RECENT_N: usize = 8;

/// Default timeout for a single remote backend call, in seconds
const DEFAULT_REMOTE_TIMEOUT_SECS: u64 = 10;

/// Default number of retries after a failed remote call
const DEFAULT_REMOTE_RETRIES: u32 = 2;

/// How the component resolves a session key from the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    /// Use the caller-supplied key verbatim.
    #[default]
    Explicit,
    /// Derive the key from caller identity via [`make_key`].
    CallerIdentity,
}

/// Build a session key from caller identity parts.
///
/// Keys take the form `channel:conversation:user`, so one user talking to the
/// same bot over two channels gets two independent sessions.
pub fn make_key(channel: &str, conversation: &str, user: &str) -> String {
    format!("{channel}:{conversation}:{user}")
}

/// Configuration recognized by the memory component.
///
/// Every field has a serde default, so a partial TOML/JSON table (or an empty
/// one) deserializes into working settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum snippets requested from semantic retrieval per load
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Number of most recent raw turns merged into every load
    #[serde(default = "default_recent_n")]
    pub recent_n: usize,
    /// Retrieved snippets scoring below this are dropped before merging
    #[serde(default)]
    pub min_score: f32,
    /// Timeout for a single remote backend call, in seconds
    #[serde(default = "default_remote_timeout_secs")]
    pub remote_timeout_secs: u64,
    /// Retries after a failed remote call (0 = single attempt)
    #[serde(default = "default_remote_retries")]
    pub remote_retries: u32,
    /// Session-key resolution strategy
    #[serde(default)]
    pub key_strategy: KeyStrategy,
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_recent_n() -> usize {
    DEFAULT_RECENT_N
}

fn default_remote_timeout_secs() -> u64 {
    DEFAULT_REMOTE_TIMEOUT_SECS
}

fn default_remote_retries() -> u32 {
    DEFAULT_REMOTE_RETRIES
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            recent_n: DEFAULT_RECENT_N,
            min_score: 0.0,
            remote_timeout_secs: DEFAULT_REMOTE_TIMEOUT_SECS,
            remote_retries: DEFAULT_REMOTE_RETRIES,
            key_strategy: KeyStrategy::Explicit,
        }
    }
}

impl MemoryConfig {
    /// Remote call timeout as a [`Duration`].
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_secs)
    }

    /// Set the retrieval breadth.
    #[must_use]
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Set the recency window.
    #[must_use]
    pub fn with_recent_n(mut self, recent_n: usize) -> Self {
        self.recent_n = recent_n;
        self
    }

    /// Set the remote call timeout.
    #[must_use]
    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout_secs = timeout.as_secs();
        self
    }

    /// Resolve the session key for a caller per the configured strategy.
    ///
    /// `Explicit` uses `explicit` verbatim; `CallerIdentity` derives the key
    /// from the identity parts and ignores `explicit`.
    pub fn resolve_key(
        &self,
        explicit: &str,
        channel: &str,
        conversation: &str,
        user: &str,
    ) -> String {
        match self.key_strategy {
            KeyStrategy::Explicit => explicit.to_string(),
            KeyStrategy::CallerIdentity => make_key(channel, conversation, user),
        }
    }
}
