//! Access tokens for service-account credentials
//!
//! An RS256-signed assertion is exchanged at the key's token endpoint for a
//! bearer token, which is reused until shortly before it expires.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::{clip_body, request_error, ServiceAccountKey, StoreError};

const SCOPES: &str = "https://www.googleapis.com/auth/firebase.database \
                      https://www.googleapis.com/auth/userinfo.email";
const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Lifetime requested for each assertion, the longest Google accepts
const ASSERTION_LIFETIME_SECS: u64 = 3600;

/// Tokens are replaced this long before they expire
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    ASSERTION_LIFETIME_SECS
}

struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Mints and caches access tokens for one service account
pub(crate) struct TokenSource {
    key: ServiceAccountKey,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    pub(crate) fn new(key: ServiceAccountKey) -> Self {
        Self {
            key,
            cached: Mutex::new(None),
        }
    }

    /// Current access token, exchanging a fresh one when needed
    pub(crate) async fn token(
        &self,
        client: &Client,
        timeout: Duration,
    ) -> Result<String, StoreError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let fresh = self.exchange(client, timeout).await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    async fn exchange(&self, client: &Client, timeout: Duration) -> Result<CachedToken, StoreError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| StoreError::Auth(format!("system clock is before 1970: {}", e)))?
            .as_secs();
        let claims = Claims {
            iss: &self.key.client_email,
            scope: SCOPES,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();
        let assertion = jsonwebtoken::encode(&header, &claims, &self.key.signing_key)
            .map_err(|e| StoreError::Auth(format!("cannot sign assertion: {}", e)))?;

        let requested = Instant::now();
        let resp = client
            .post(&self.key.token_uri)
            .form(&[("grant_type", GRANT_TYPE), ("assertion", assertion.as_str())])
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| request_error(e, timeout))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| request_error(e, timeout))?;
        if !status.is_success() {
            return Err(StoreError::Auth(format!(
                "token endpoint returned HTTP {}: {}",
                status.as_u16(),
                clip_body(text)
            )));
        }

        let token: TokenResponse = serde_json::from_str(&text)
            .map_err(|e| StoreError::Auth(format!("unreadable token response: {}", e)))?;
        debug!(
            account = %self.key.client_email,
            expires_in = token.expires_in,
            "Access token refreshed"
        );

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(REFRESH_MARGIN);
        Ok(CachedToken {
            value: token.access_token,
            refresh_at: requested + lifetime,
        })
    }
}
