// crates/server/src/jobs/refiner.rs
//! External collaborator seams: the refinement engine that rewrites a
//! pass's content, and the file source that provides the original.
//!
//! The orchestrator only sees these traits; production wiring uses
//! `HttpRefiner` + `DirFileSource`, tests substitute scripted fakes.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// Failure modes of a single refinement pass.
///
/// `Transient` failures are retried up to the configured bound;
/// `Fatal` failures fail the job immediately.
#[derive(Debug, Error)]
pub enum RefineError {
    #[error("transient refinement failure: {0}")]
    Transient(String),

    #[error("fatal refinement failure: {0}")]
    Fatal(String),
}

/// Failure modes of fetching a file's original content.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("file not found: {0}")]
    NotFound(String),

    #[error("failed to fetch file {file_id}: {message}")]
    Unavailable { file_id: String, message: String },
}

/// The external engine that rewrites one pass of content.
#[async_trait]
pub trait Refiner: Send + Sync {
    async fn run_pass(
        &self,
        file_id: &str,
        pass_number: u32,
        content: &str,
        model: &str,
    ) -> Result<String, RefineError>;
}

/// Source of a file's original (pass 0) content.
#[async_trait]
pub trait FileSource: Send + Sync {
    async fn fetch_original(&self, file_id: &str) -> Result<String, FetchError>;
}

// =============================================================================
// Production implementations
// =============================================================================

#[derive(Debug, Deserialize)]
struct RefineResponse {
    content: String,
}

/// Refiner backed by an HTTP service: POST `{base}/refine` with the pass
/// payload, expecting `{"content": "..."}` back.
pub struct HttpRefiner {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRefiner {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Refiner for HttpRefiner {
    async fn run_pass(
        &self,
        file_id: &str,
        pass_number: u32,
        content: &str,
        model: &str,
    ) -> Result<String, RefineError> {
        let url = format!("{}/refine", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "fileId": file_id,
                "passNumber": pass_number,
                "content": content,
                "model": model,
            }))
            .send()
            .await
            // Connection errors and client-side timeouts are retryable.
            .map_err(|e| RefineError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let body: RefineResponse = response
                .json()
                .await
                .map_err(|e| RefineError::Fatal(format!("malformed refiner response: {e}")))?;
            return Ok(body.content);
        }

        let body = response.text().await.unwrap_or_default();
        let message = format!("refiner returned {status}: {body}");
        if status.is_server_error()
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        {
            Err(RefineError::Transient(message))
        } else {
            Err(RefineError::Fatal(message))
        }
    }
}

/// File source reading originals from a content directory, one file per
/// `file_id`.
pub struct DirFileSource {
    root: PathBuf,
}

impl DirFileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl FileSource for DirFileSource {
    async fn fetch_original(&self, file_id: &str) -> Result<String, FetchError> {
        // file_id is an opaque key, not a path: reject separators outright.
        if file_id.contains('/') || file_id.contains('\\') || file_id.contains("..") {
            return Err(FetchError::NotFound(file_id.to_string()));
        }
        let path = self.root.join(file_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FetchError::NotFound(file_id.to_string()))
            }
            Err(e) => Err(FetchError::Unavailable {
                file_id: file_id.to_string(),
                message: e.to_string(),
            }),
        }
    }
}
