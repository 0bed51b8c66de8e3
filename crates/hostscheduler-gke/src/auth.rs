//! Service-account authentication.
//!
//! Reads a gcloud service account key file, signs an RS256 JWT assertion
//! with its private key, and exchanges the assertion at the key's token
//! endpoint for an OAuth2 access token. Tokens are cached until shortly
//! before they expire.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

use hostscheduler_core::{ErrorCode, ProviderError, SchedulerError};

pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const ASSERTION_LIFETIME_SECS: u64 = 3600;
/// Refresh this long before the provider's stated expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("cannot read key file {path}: {source}")]
    ReadKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed key file {path}: {source}")]
    ParseKey {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("unsupported key type {0:?}, expected \"service_account\"")]
    UnsupportedKeyType(String),

    #[error("invalid private key: {0}")]
    InvalidPrivateKey(#[source] jsonwebtoken::errors::Error),

    #[error("token exchange rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("token exchange failed: {0}")]
    Transport(#[from] reqwest::Error),
}

pub type AuthResult<T> = Result<T, AuthError>;

impl AuthError {
    /// Mid-call view of a token failure, for the REST transport.
    pub fn into_provider(self) -> ProviderError {
        let code = match &self {
            AuthError::Transport(_) => ErrorCode::Unavailable,
            _ => ErrorCode::Unauthenticated,
        };
        ProviderError::new(code, self.to_string())
    }
}

impl From<AuthError> for SchedulerError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::ReadKey { .. }
            | AuthError::ParseKey { .. }
            | AuthError::UnsupportedKeyType(_)
            | AuthError::InvalidPrivateKey(_) => SchedulerError::Configuration(err.to_string()),
            AuthError::Rejected { .. } => SchedulerError::Authentication(err.to_string()),
            AuthError::Transport(_) => SchedulerError::Provider {
                resource: "oauth2 token".to_string(),
                source: err.into_provider(),
            },
        }
    }
}

/// The fields of a service account key file the exchange needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(rename = "type")]
    pub key_type: String,
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> AuthResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| AuthError::ReadKey {
            path: path.to_path_buf(),
            source,
        })?;
        let key: ServiceAccountKey =
            serde_json::from_str(&content).map_err(|source| AuthError::ParseKey {
                path: path.to_path_buf(),
                source,
            })?;
        if key.key_type != "service_account" {
            return Err(AuthError::UnsupportedKeyType(key.key_type));
        }
        Ok(key)
    }

    pub fn token_uri(&self) -> &str {
        self.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct AssertionClaims {
    iss: String,
    scope: String,
    aud: String,
    iat: u64,
    exp: u64,
}

impl AssertionClaims {
    fn new(key: &ServiceAccountKey, now: u64) -> Self {
        Self {
            iss: key.client_email.clone(),
            scope: CLOUD_PLATFORM_SCOPE.to_string(),
            aud: key.token_uri().to_string(),
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    refresh_at: Instant,
}

/// Supplies bearer tokens to the REST transport.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> AuthResult<String>;
}

pub struct ServiceAccountTokenSource {
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    http: reqwest::Client,
    cached: RwLock<Option<CachedToken>>,
}

impl std::fmt::Debug for ServiceAccountTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountTokenSource")
            .field("client_email", &self.key.client_email)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountTokenSource {
    /// Load the key file and prepare the signer. No network I/O.
    pub fn from_file(path: &Path, http: reqwest::Client) -> AuthResult<Self> {
        let key = ServiceAccountKey::from_file(path)?;
        Self::from_key(key, http)
    }

    pub fn from_key(key: ServiceAccountKey, http: reqwest::Client) -> AuthResult<Self> {
        let signing_key =
            EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(AuthError::InvalidPrivateKey)?;
        Ok(Self {
            key,
            signing_key,
            http,
            cached: RwLock::new(None),
        })
    }

    pub fn client_email(&self) -> &str {
        &self.key.client_email
    }

    fn assertion(&self) -> AuthResult<String> {
        let claims = AssertionClaims::new(&self.key, epoch_secs());
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.signing_key)
            .map_err(AuthError::InvalidPrivateKey)
    }

    async fn exchange(&self) -> AuthResult<CachedToken> {
        let assertion = self.assertion()?;
        let response = self
            .http
            .post(self.key.token_uri())
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(ASSERTION_LIFETIME_SECS));
        debug!(
            client_email = %self.key.client_email,
            expires_in_secs = lifetime.as_secs(),
            "access token issued"
        );
        Ok(CachedToken {
            value: token.access_token,
            refresh_at: Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN),
        })
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokenSource {
    async fn token(&self) -> AuthResult<String> {
        if let Some(cached) = self.cached.read().await.as_ref() {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.value.clone());
            }
        }

        let mut slot = self.cached.write().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(cached) = slot.as_ref() {
            if Instant::now() < cached.refresh_at {
                return Ok(cached.value.clone());
            }
        }
        let fresh = self.exchange().await?;
        info!(client_email = %self.key.client_email, "refreshed access token");
        let value = fresh.value.clone();
        *slot = Some(fresh);
        Ok(value)
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
