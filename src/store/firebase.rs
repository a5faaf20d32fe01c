//! Firebase Realtime Database over REST
//!
//! `POST <base>/<path>.json` appends a child with a generated key and
//! answers `{"name": "<key>"}`. Service-account credentials are turned into
//! access tokens on demand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::oauth::TokenSource;
use super::{clip_body, request_error, Credential, DocumentStore, StoreError, StoreResponse};

#[derive(Deserialize)]
struct PushResponse {
    name: String,
}

/// Firebase REST session, authenticated unless built without a credential
pub struct FirebaseStore {
    client: Client,
    credential: Option<Credential>,
    tokens: Option<TokenSource>,
    closed: AtomicBool,
}

impl FirebaseStore {
    pub fn new(credential: Option<Credential>) -> Result<Self, StoreError> {
        let client = Client::builder()
            .user_agent(concat!("firebridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StoreError::Request(e.to_string()))?;

        Ok(Self::with_client(client, credential))
    }

    /// Use a preconfigured HTTP client
    pub fn with_client(client: Client, credential: Option<Credential>) -> Self {
        let tokens = match &credential {
            Some(Credential::ServiceAccount(key)) => Some(TokenSource::new(key.clone())),
            _ => None,
        };
        Self {
            client,
            credential,
            tokens,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl DocumentStore for FirebaseStore {
    async fn post(
        &self,
        url: &str,
        body: &Value,
        timeout: Duration,
    ) -> Result<StoreResponse, StoreError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }

        let mut request = self.client.post(url);
        if let Some(tokens) = &self.tokens {
            let token = tokens.token(&self.client, timeout).await?;
            request = request.query(&[("access_token", token.as_str())]);
        } else if let Some(pair) = self.credential.as_ref().and_then(Credential::query_pair) {
            request = request.query(&[pair]);
        }
        let resp = request
            .json(body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| request_error(e, timeout))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| request_error(e, timeout))?;

        if !status.is_success() {
            return Err(StoreError::Status {
                status: status.as_u16(),
                body: clip_body(text),
            });
        }

        let push: PushResponse = serde_json::from_str(&text)
            .map_err(|e| StoreError::InvalidResponse(format!("{} in {:?}", e, text)))?;
        debug!(url = %url, key = %push.name, "Document stored");

        Ok(StoreResponse {
            status: status.as_u16(),
            key: Some(push.name),
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
