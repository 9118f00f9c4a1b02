//! HttpBackend — JSON client for the remote context retrieval service.
//!
//! Implements [`RetrievalBackend`] over three endpoints:
//!
//! - `POST /v1/context/memory/add` — index text under a session scope
//! - `POST /v1/context/search` — similarity query restricted to a session
//! - `POST /v1/context/memory/delete` — drop a session's index entries
//!
//! The client carries its own request timeout; the facade adds retry and an
//! outer timeout on top, so a slow service never blocks local durability.

use crate::backend::{IndexAck, RetrievalBackend, ScoredSnippet};
use crate::error::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Maximum error-body length echoed into error messages
const ERROR_BODY_LIMIT: usize = 200;

/// Connection settings for [`HttpBackend`].
#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    /// Service base URL, e.g. `https://memory.example.com`
    pub base_url: String,
    /// Bearer token, sent when present
    pub api_key: Option<String>,
    /// Organization scope forwarded with every request
    pub organization: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl HttpBackendConfig {
    /// Config for the given base URL with a 10-second timeout and no auth.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            organization: None,
            timeout: Duration::from_secs(10),
        }
    }

    /// Set the bearer token.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the organization scope.
    #[must_use]
    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    /// Set the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Reqwest-based [`RetrievalBackend`] implementation.
pub struct HttpBackend {
    client: Client,
    config: HttpBackendConfig,
}

impl HttpBackend {
    /// Build a client from the given config.
    pub fn new(config: HttpBackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Backend(format!("http client build failed: {e}")))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        let mut request = self.client.post(self.url(path)).json(body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Backend(format!("{path}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(ERROR_BODY_LIMIT);
            return Err(Error::Backend(format!("{path}: HTTP {status}: {body}")));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Backend(format!("{path}: invalid response: {e}")))
    }

    /// POST where only the status matters (delete responses may have no body).
    async fn post_no_body<B: Serialize>(&self, path: &str, body: &B) -> Result<()> {
        let mut request = self.client.post(self.url(path)).json(body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Backend(format!("{path}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().await.unwrap_or_default();
            body.truncate(ERROR_BODY_LIMIT);
            return Err(Error::Backend(format!("{path}: HTTP {status}: {body}")));
        }
        Ok(())
    }
}

// ── Wire types ──────────────────────────────────────────────────────

/// Session scoping tag attached to index and search requests.
#[derive(Serialize)]
struct GroupScope<'a> {
    group_name: [&'a str; 1],
}

#[derive(Serialize)]
struct AddRequest<'a> {
    session_id: &'a str,
    contents: Vec<AddContent<'a>>,
    metadata: GroupScope<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization_id: Option<&'a str>,
}

#[derive(Serialize)]
struct AddContent<'a> {
    content: &'a str,
    metadata: &'a HashMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct AddResponse {
    #[serde(default)]
    document_id: Option<String>,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    top_k: usize,
    scope: &'static str,
    metadata: GroupScope<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    contexts: Vec<ContextEntry>,
}

#[derive(Deserialize)]
struct ContextEntry {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    score: Option<f32>,
}

#[derive(Serialize)]
struct DeleteRequest<'a> {
    memory_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization_id: Option<&'a str>,
}

#[async_trait::async_trait]
impl RetrievalBackend for HttpBackend {
    async fn index(
        &self,
        session_key: &str,
        text: &str,
        metadata: &HashMap<String, serde_json::Value>,
    ) -> Result<IndexAck> {
        let request = AddRequest {
            session_id: session_key,
            contents: vec![AddContent {
                content: text,
                metadata,
            }],
            metadata: GroupScope {
                group_name: [session_key],
            },
            organization_id: self.config.organization.as_deref(),
        };
        let response: AddResponse = self.post("/v1/context/memory/add", &request).await?;
        debug!(session_key, "Indexed text remotely");
        Ok(IndexAck {
            document_id: response.document_id,
        })
    }

    async fn query(
        &self,
        session_key: &str,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredSnippet>> {
        let request = SearchRequest {
            query: text,
            top_k,
            scope: "internal",
            metadata: GroupScope {
                group_name: [session_key],
            },
            organization_id: self.config.organization.as_deref(),
        };
        let response: SearchResponse = self.post("/v1/context/search", &request).await?;

        // Entries without content are useless downstream; drop them here.
        let snippets = response
            .contexts
            .into_iter()
            .filter_map(|entry| {
                entry.content.filter(|c| !c.is_empty()).map(|text| ScoredSnippet {
                    text,
                    score: entry.score.unwrap_or(0.0),
                })
            })
            .collect();
        Ok(snippets)
    }

    async fn delete(&self, session_key: &str) -> Result<()> {
        let request = DeleteRequest {
            memory_id: session_key,
            organization_id: self.config.organization.as_deref(),
        };
        self.post_no_body("/v1/context/memory/delete", &request).await?;
        debug!(session_key, "Deleted remote index entries");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn backend_for(server: &MockServer) -> HttpBackend {
        HttpBackend::new(
            HttpBackendConfig::new(server.uri())
                .with_api_key("test-key")
                .with_organization("org-1"),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_index_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/context/memory/add"))
            .and(body_partial_json(serde_json::json!({
                "session_id": "s1",
                "metadata": { "group_name": ["s1"] },
                "organization_id": "org-1",
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "document_id": "doc-7" })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend_for(&server);
        let ack = backend
            .index("s1", "hello\nhi", &HashMap::new())
            .await
            .unwrap();
        assert_eq!(ack.document_id.as_deref(), Some("doc-7"));
    }

    #[tokio::test]
    async fn test_query_maps_contexts_and_skips_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/context/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "contexts": [
                    { "content": "what is 2+2\n4", "score": 0.9 },
                    { "content": null },
                    { "content": "", "score": 0.5 },
                    { "content": "unscored entry" },
                ]
            })))
            .mount(&server)
            .await;

        let backend = backend_for(&server);
        let snippets = backend.query("s1", "arithmetic", 5).await.unwrap();
        assert_eq!(snippets.len(), 2);
        assert_eq!(snippets[0].text, "what is 2+2\n4");
        assert!((snippets[0].score - 0.9).abs() < 0.001);
        assert_eq!(snippets[1].score, 0.0);
    }

    #[tokio::test]
    async fn test_delete_posts_session_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/context/memory/delete"))
            .and(body_partial_json(serde_json::json!({ "memory_id": "s1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let backend = backend_for(&server);
        backend.delete("s1").await.unwrap();
    }

    #[tokio::test]
    async fn test_http_error_surfaces_as_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/context/search"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let backend = backend_for(&server);
        let err = backend.query("s1", "anything", 5).await.unwrap_err();
        match err {
            Error::Backend(msg) => {
                assert!(msg.contains("503"));
                assert!(msg.contains("overloaded"));
            }
            other => panic!("expected Backend error, got {other:?}"),
        }
    }
}
