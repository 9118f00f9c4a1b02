//! Core data types for the memory component.
//!
//! A **turn** is one recorded dialogue exchange inside a session. A **snippet**
//! is one piece of context assembled for the caller, tagged with where it came
//! from (the recency window, semantic retrieval, or both).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single dialogue exchange recorded in a session.
///
/// Immutable once written; turns are only appended or purged en masse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Unique turn ID (UUID)
    pub id: String,
    /// Session this turn belongs to
    pub session_key: String,
    /// Position within the session (0-based, gap-free)
    pub seq: u64,
    /// User input text
    pub input: String,
    /// Assistant output text, absent when not yet generated
    pub output: Option<String>,
    /// When this turn was recorded
    pub created_at: DateTime<Utc>,
}

impl Turn {
    /// Text form of this turn, as indexed remotely and used for dedup identity.
    ///
    /// Non-empty input and output joined by a newline.
    pub fn rendered(&self) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(2);
        if !self.input.is_empty() {
            parts.push(&self.input);
        }
        if let Some(out) = self.output.as_deref() {
            if !out.is_empty() {
                parts.push(out);
            }
        }
        parts.join("\n")
    }
}

/// The caller's input/output mapping in closed, validated form.
///
/// Orchestration frameworks hand the memory component arbitrary key/value
/// maps; only the designated `input` / `output` fields participate in memory
/// content. Everything else lands in the `extra` bag and is forwarded to the
/// remote backend as indexing metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExchangeFields {
    /// User input text (`"input"` key of the caller's mapping)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// Assistant output text (`"output"` key of the caller's mapping)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Pass-through bag for caller-extensible metadata
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ExchangeFields {
    /// Fields carrying only an input text.
    pub fn input(text: impl Into<String>) -> Self {
        Self {
            input: Some(text.into()),
            ..Self::default()
        }
    }

    /// Fields carrying only an output text.
    pub fn output(text: impl Into<String>) -> Self {
        Self {
            output: Some(text.into()),
            ..Self::default()
        }
    }
}

/// Where an assembled snippet came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    /// From the recency window only
    #[serde(rename = "recent")]
    Recent,
    /// From semantic retrieval only
    #[serde(rename = "retrieved")]
    Retrieved,
    /// In the recency window and also returned by semantic retrieval
    #[serde(rename = "recent+retrieved")]
    RecentRetrieved,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Recent => write!(f, "recent"),
            Self::Retrieved => write!(f, "retrieved"),
            Self::RecentRetrieved => write!(f, "recent+retrieved"),
        }
    }
}

/// One piece of assembled context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snippet {
    /// Snippet text
    pub text: String,
    /// Snippet provenance
    pub provenance: Provenance,
    /// Relevance score, when semantic retrieval supplied one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    /// Sequence number of the matching local turn, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

/// The value returned by a `load`: ordered context snippets plus metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextPayload {
    /// Session the context was assembled for
    pub session_key: String,
    /// Ordered snippets: scored (descending) first, then recent chronological
    pub snippets: Vec<Snippet>,
    /// True when the remote backend was unavailable and only the recency
    /// window could be served
    pub partial: bool,
}

impl ContextPayload {
    /// Empty payload for a session with no turns.
    pub fn empty(session_key: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            snippets: Vec::new(),
            partial: false,
        }
    }

    /// Whether the payload carries no snippets.
    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    /// Newline-joined snippet texts, the history string chat frameworks
    /// interpolate into their prompts.
    pub fn render_history(&self) -> String {
        self.snippets
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
