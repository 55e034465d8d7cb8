//! Bearer tokens for the broker handshake.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::CredentialError;

/// Re-fetch cached tokens this long before they would expire.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Assumed lifetime of a session token when the endpoint does not say.
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// Source of bearer tokens for the signed-in user.
///
/// `Ok(None)` means nobody is signed in.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self, skip_cache: bool) -> Result<Option<String>, CredentialError>;
}

// ---------------------------------------------------------------------------
// Fixed token (tests, scripts, pre-issued service tokens)
// ---------------------------------------------------------------------------

pub struct StaticToken {
    token: Option<String>,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            token: (!token.is_empty()).then_some(token),
        }
    }

    /// A source for a signed-out session.
    pub fn signed_out() -> Self {
        Self { token: None }
    }
}

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self, _skip_cache: bool) -> Result<Option<String>, CredentialError> {
        Ok(self.token.clone())
    }
}

// ---------------------------------------------------------------------------
// Session-token endpoint
// ---------------------------------------------------------------------------

/// Mints short-lived session tokens by POSTing to the auth provider's token
/// endpoint with a long-lived session key.
#[derive(Clone)]
pub struct HttpTokenSource {
    token_url: String,
    session_key: String,
    http: reqwest::Client,
    cache: Arc<RwLock<Option<CachedToken>>>,
}

struct CachedToken {
    jwt: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    jwt: String,
    /// Lifetime in seconds, if the endpoint reports one.
    #[serde(default)]
    expires_in: Option<u64>,
}

impl HttpTokenSource {
    pub fn new(token_url: &str, session_key: &str) -> Self {
        Self {
            token_url: token_url.to_string(),
            session_key: session_key.to_string(),
            http: reqwest::Client::new(),
            cache: Arc::new(RwLock::new(None)),
        }
    }

    async fn fetch(&self) -> Result<Option<String>, CredentialError> {
        let resp = self
            .http
            .post(&self.token_url)
            .bearer_auth(&self.session_key)
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => {}
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::NOT_FOUND => {
                // Session is gone: treat as signed out.
                *self.cache.write().await = None;
                return Ok(None);
            }
            s => return Err(CredentialError::Status(s)),
        }

        let body: TokenResponse = resp.json().await?;
        let ttl = body
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_TTL);
        // A lifetime too large for the clock is not cached at all.
        *self.cache.write().await = Instant::now()
            .checked_add(ttl)
            .map(|expires_at| CachedToken {
                jwt: body.jwt.clone(),
                expires_at,
            });
        Ok(Some(body.jwt))
    }
}

#[async_trait]
impl TokenSource for HttpTokenSource {
    async fn token(&self, skip_cache: bool) -> Result<Option<String>, CredentialError> {
        if !skip_cache {
            let cache = self.cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if Instant::now() + EXPIRY_MARGIN < cached.expires_at {
                    return Ok(Some(cached.jwt.clone()));
                }
            }
        }
        self.fetch().await
    }
}
