//! Store credential loading
//!
//! A credential source is either inline JSON (anything starting with `{`),
//! the path of a file holding such JSON or a bare token, or the bare token
//! itself. Sources that look like paths must name a readable file.

use std::fmt;
use std::path::Path;

use jsonwebtoken::EncodingKey;
use serde::Deserialize;

/// Token endpoint used when a service-account key does not name one
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Credential attached to every store request as a query parameter
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// OAuth2 bearer token, sent as `access_token=`
    AccessToken(String),
    /// Legacy database secret or ID token, sent as `auth=`
    DatabaseSecret(String),
    /// Service-account key, exchanged for short-lived access tokens
    ServiceAccount(ServiceAccountKey),
}

/// Google service-account key with its private key already parsed
#[derive(Clone)]
pub struct ServiceAccountKey {
    pub(super) client_email: String,
    pub(super) private_key_id: Option<String>,
    pub(super) token_uri: String,
    pub(super) signing_key: EncodingKey,
}

impl ServiceAccountKey {
    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    pub fn token_uri(&self) -> &str {
        &self.token_uri
    }
}

impl PartialEq for ServiceAccountKey {
    fn eq(&self, other: &Self) -> bool {
        self.client_email == other.client_email
            && self.private_key_id == other.private_key_id
            && self.token_uri == other.token_uri
    }
}

impl Eq for ServiceAccountKey {}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

/// Why a credential source was rejected
#[derive(Debug)]
pub enum CredentialError {
    /// Credential file could not be read
    Io(std::io::Error),
    /// Inline or file JSON did not parse
    Json(serde_json::Error),
    /// Service-account key lacks a required field
    IncompleteServiceAccount(&'static str),
    /// Service-account private key is not a usable RSA PEM
    PrivateKey(jsonwebtoken::errors::Error),
    /// JSON carried none of the supported forms
    Missing,
    /// Source was blank
    Empty,
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialError::Io(e) => write!(f, "cannot read credential file: {}", e),
            CredentialError::Json(e) => write!(f, "credential JSON is invalid: {}", e),
            CredentialError::IncompleteServiceAccount(field) => {
                write!(f, "service account key has no \"{}\"", field)
            }
            CredentialError::PrivateKey(e) => {
                write!(f, "service account private key is invalid: {}", e)
            }
            CredentialError::Missing => write!(
                f,
                "credential JSON must be a service account key or contain \"access_token\" or \"database_secret\""
            ),
            CredentialError::Empty => write!(f, "credential is empty"),
        }
    }
}

impl std::error::Error for CredentialError {}

impl From<std::io::Error> for CredentialError {
    fn from(e: std::io::Error) -> Self {
        CredentialError::Io(e)
    }
}

impl From<serde_json::Error> for CredentialError {
    fn from(e: serde_json::Error) -> Self {
        CredentialError::Json(e)
    }
}

#[derive(Deserialize)]
struct CredentialJson {
    #[serde(rename = "type")]
    kind: Option<String>,
    client_email: Option<String>,
    private_key_id: Option<String>,
    private_key: Option<String>,
    token_uri: Option<String>,
    access_token: Option<String>,
    database_secret: Option<String>,
}

/// A mistyped path must not be mistaken for a token
fn looks_like_path(source: &str) -> bool {
    source.contains('/') || source.contains('\\') || source.ends_with(".json")
}

impl Credential {
    /// Resolve a credential source
    pub fn load(source: &str) -> Result<Self, CredentialError> {
        let source = source.trim();
        if source.is_empty() {
            return Err(CredentialError::Empty);
        }
        if source.starts_with('{') {
            return Self::from_json(source);
        }

        let path = Path::new(source);
        if path.is_file() {
            let content = std::fs::read_to_string(path)?;
            let content = content.trim();
            if content.starts_with('{') {
                return Self::from_json(content);
            }
            if content.is_empty() {
                return Err(CredentialError::Empty);
            }
            return Ok(Credential::DatabaseSecret(content.to_string()));
        }

        if looks_like_path(source) {
            return Err(CredentialError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is not a file", source),
            )));
        }

        Ok(Credential::DatabaseSecret(source.to_string()))
    }

    fn from_json(json: &str) -> Result<Self, CredentialError> {
        let parsed: CredentialJson = serde_json::from_str(json)?;
        if let Some(token) = parsed.access_token.filter(|t| !t.is_empty()) {
            return Ok(Credential::AccessToken(token));
        }
        if let Some(secret) = parsed.database_secret.filter(|s| !s.is_empty()) {
            return Ok(Credential::DatabaseSecret(secret));
        }
        if parsed.kind.as_deref() == Some("service_account") || parsed.private_key.is_some() {
            let private_key = parsed
                .private_key
                .filter(|k| !k.is_empty())
                .ok_or(CredentialError::IncompleteServiceAccount("private_key"))?;
            let client_email = parsed
                .client_email
                .filter(|e| !e.is_empty())
                .ok_or(CredentialError::IncompleteServiceAccount("client_email"))?;
            let signing_key = EncodingKey::from_rsa_pem(private_key.as_bytes())
                .map_err(CredentialError::PrivateKey)?;

            return Ok(Credential::ServiceAccount(ServiceAccountKey {
                client_email,
                private_key_id: parsed.private_key_id.filter(|id| !id.is_empty()),
                token_uri: parsed
                    .token_uri
                    .filter(|uri| !uri.is_empty())
                    .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
                signing_key,
            }));
        }
        Err(CredentialError::Missing)
    }

    /// Query parameter carrying this credential
    ///
    /// Service-account keys have none; their token is minted per request.
    pub fn query_pair(&self) -> Option<(&'static str, &str)> {
        match self {
            Credential::AccessToken(token) => Some(("access_token", token)),
            Credential::DatabaseSecret(secret) => Some(("auth", secret)),
            Credential::ServiceAccount(_) => None,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::AccessToken(_) => write!(f, "AccessToken(<redacted>)"),
            Credential::DatabaseSecret(_) => write!(f, "DatabaseSecret(<redacted>)"),
            Credential::ServiceAccount(key) => write!(f, "ServiceAccount({})", key.client_email),
        }
    }
}
