//! Document store session
//!
//! The delivery worker writes through the [`DocumentStore`] trait so tests
//! can script responses; [`FirebaseStore`] is the production implementation
//! against the Firebase Realtime Database REST API.

mod credential;
mod firebase;
mod oauth;


use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;

pub use credential::{Credential, CredentialError, ServiceAccountKey, DEFAULT_TOKEN_URI};
pub use firebase::FirebaseStore;

/// Successful write
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreResponse {
    /// HTTP status code
    pub status: u16,
    /// Generated child key, when the store returned one
    pub key: Option<String>,
}

/// Failed write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No complete response within the per-attempt timeout
    Timeout(Duration),
    /// The store answered with a non-success status
    Status { status: u16, body: String },
    /// Connection or protocol failure before a response arrived
    Request(String),
    /// Success status with a body we could not read
    InvalidResponse(String),
    /// No usable URL for the document
    InvalidUrl(String),
    /// Service-account token could not be obtained
    Auth(String),
    /// The session was closed during shutdown
    Closed,
}

impl StoreError {
    /// Only timeouts are worth another attempt
    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Timeout(_))
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Timeout(d) => write!(f, "request timed out after {:?}", d),
            StoreError::Status { status, body } => {
                write!(f, "store returned HTTP {}: {}", status, body)
            }
            StoreError::Request(msg) => write!(f, "request failed: {}", msg),
            StoreError::InvalidResponse(msg) => write!(f, "invalid store response: {}", msg),
            StoreError::InvalidUrl(msg) => write!(f, "invalid document URL: {}", msg),
            StoreError::Auth(msg) => write!(f, "authentication failed: {}", msg),
            StoreError::Closed => write!(f, "store session is closed"),
        }
    }
}

impl std::error::Error for StoreError {}

/// A remote JSON document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// POST a JSON document to `url`, giving up after `timeout`
    async fn post(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<StoreResponse, StoreError>;

    /// Release the session; later posts fail with [`StoreError::Closed`]
    async fn close(&self) {}
}

/// REST URL for a store path: `base` + `path` + `.json`
///
/// Each path segment is percent-encoded, so topic levels holding `?`, `%`
/// or spaces stay inside the path. The root path maps to `/.json`.
pub fn document_url(base_url: &str, path: &str) -> Result<String, StoreError> {
    let mut url = Url::parse(base_url)
        .map_err(|e| StoreError::InvalidUrl(format!("{}: {}", base_url, e)))?;
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    {
        let mut parts = url
            .path_segments_mut()
            .map_err(|_| StoreError::InvalidUrl(format!("{} cannot hold a path", base_url)))?;
        parts.pop_if_empty();
        match segments.split_last() {
            Some((last, parents)) => {
                parts.extend(parents);
                parts.push(&format!("{}.json", last));
            }
            None => {
                parts.push(".json");
            }
        }
    }

    Ok(url.into())
}

/// Longest error body kept in an error
const MAX_ERROR_BODY: usize = 256;

pub(crate) fn clip_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

/// Map a transport error, keeping timeouts distinguishable
pub(crate) fn request_error(e: reqwest::Error, timeout: Duration) -> StoreError {
    if e.is_timeout() {
        StoreError::Timeout(timeout)
    } else {
        StoreError::Request(e.to_string())
    }
}
