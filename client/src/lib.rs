//! HTTP client for the grouping endpoints.
//!
//! One request, one settlement: the store layer owns optimistic selection
//! state and a retry is always a user-initiated re-submit, so this client
//! carries no retry or backoff machinery. Every failure surfaces as a typed
//! [`ClientError`]; a non-2xx status is a failure like any transport error,
//! with a capped excerpt of the response body kept for diagnostics.
//!
//! Paged reads return a [`Page`] so the caller also gets the raw `Link`
//! header, which the upstream uses for cursor pagination.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::LINK;
use serde::de::DeserializeOwned;
use serde_json::json;
use thiserror::Error;

use regroup_types::{GroupId, HashId, IssueRef, MergedHash, SimilarityScores};

const CONNECT_TIMEOUT_SECS: u64 = 30;
const REQUEST_TIMEOUT_SECS: u64 = 30;
const MAX_ERROR_BODY_BYTES: usize = 32 * 1024;

/// Error from a single request. No variant is retried internally.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request never produced a response (DNS, TLS, timeout, ...).
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: StatusCode, body: String },
    /// The response body was not the expected JSON shape.
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

/// One page of a paged read: the decoded body plus the raw `Link` header
/// (empty when the server sent none).
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub body: T,
    pub links: String,
}

/// Parameters for the merge mutation.
///
/// `item_ids` is the full set the server should merge: the checked
/// candidate issues plus the primary group itself. Ids are plain strings
/// here because the endpoint treats them uniformly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeRequest {
    pub org_id: String,
    pub project_id: String,
    pub item_ids: Vec<String>,
    /// Issue-search filter forwarded verbatim as a query parameter.
    pub query: Option<String>,
}

/// Client for the grouping endpoints, rooted at one service base URL.
#[derive(Debug, Clone)]
pub struct GroupingClient {
    http: reqwest::Client,
    base_url: String,
}

impl GroupingClient {
    /// Build a client for `base_url` (scheme and host; a trailing slash is
    /// tolerated). Endpoint paths passed to the read methods are joined
    /// onto it verbatim.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|e| {
                tracing::error!("Failed to build configured HTTP client: {e}. Using defaults.");
                reqwest::Client::new()
            });
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{endpoint}", self.base_url)
    }

    /// Read similar-issue candidates: ordered `[issue, scores]` pairs.
    pub async fn similar(
        &self,
        endpoint: &str,
    ) -> Result<Page<Vec<(IssueRef, SimilarityScores)>>, ClientError> {
        self.get_page(endpoint).await
    }

    /// Read the merged hash records for a group.
    pub async fn hashes(&self, endpoint: &str) -> Result<Page<Vec<MergedHash>>, ClientError> {
        self.get_page(endpoint).await
    }

    /// Queue a merge of every item named in `request`.
    ///
    /// `PUT /projects/{org}/{project}/issues/` with one `id` query parameter
    /// per item and `{"merge": 1}` as the body.
    pub async fn merge_issues(&self, request: &MergeRequest) -> Result<(), ClientError> {
        let endpoint = format!(
            "/projects/{}/{}/issues/",
            request.org_id, request.project_id
        );
        let mut builder = self.http.put(self.url(&endpoint)).json(&json!({ "merge": 1 }));
        for id in &request.item_ids {
            builder = builder.query(&[("id", id)]);
        }
        if let Some(query) = &request.query {
            builder = builder.query(&[("query", query)]);
        }
        let response = builder.send().await?;
        check_status(response).await?;
        Ok(())
    }

    /// Split hashes back out of a group.
    ///
    /// `DELETE /issues/{group}/hashes/` with one `id` query parameter per
    /// hash.
    pub async fn unmerge_hashes(
        &self,
        group_id: &GroupId,
        hash_ids: &[HashId],
    ) -> Result<(), ClientError> {
        let endpoint = format!("/issues/{group_id}/hashes/");
        let mut builder = self.http.delete(self.url(&endpoint));
        for id in hash_ids {
            builder = builder.query(&[("id", id.as_str())]);
        }
        let response = builder.send().await?;
        check_status(response).await?;
        Ok(())
    }

    async fn get_page<T: DeserializeOwned>(&self, endpoint: &str) -> Result<Page<T>, ClientError> {
        let response = self.http.get(self.url(endpoint)).send().await?;
        let response = check_status(response).await?;
        let links = response
            .headers()
            .get(LINK)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = response.bytes().await?;
        let body = serde_json::from_slice(&bytes)?;
        Ok(Page { body, links })
    }
}

/// Pass a successful response through; map anything else to
/// [`ClientError::Status`] with a capped body excerpt.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = read_capped_error_body(response).await;
    Err(ClientError::Status { status, body })
}

async fn read_capped_error_body(response: reqwest::Response) -> String {
    use futures_util::StreamExt;
    let mut body = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        body.extend_from_slice(&chunk);
        if body.len() > MAX_ERROR_BODY_BYTES {
            body.truncate(MAX_ERROR_BODY_BYTES);
            let text = String::from_utf8_lossy(&body);
            return format!("{text}...(truncated)");
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}
